//! Data types for the download event stream
//!
//! This module contains the messages exchanged between the stream and its consumer.

mod message;

pub use message::{kinds, BatchMessage, CoalesceKey, InboundMessage, StreamMessage};
