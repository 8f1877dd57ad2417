//! Event stream core
//!
//! Keeps a persistent server-sent events connection to `/api/events` and
//! turns its frames into consumer callbacks.
//!
//! ## Features
//! - Control messages (`heartbeat`, `connection`) are consumed locally
//! - Terminal job states and refresh requests are delivered immediately
//! - Other `status_update`s are coalesced per job (window 50ms, last write wins)
//! - Linear capped reconnect backoff (1s + 0.5s per attempt, max 8s, 15 attempts)

pub mod classifier;
pub mod client;
pub mod coalescer;
pub mod connection;
pub mod reconnect;
pub mod timer;

pub use classifier::{classify, decode_frame, Category, DecodeError};
pub use client::{ClientError, EventStreamClient};
pub use coalescer::UpdateCoalescer;
pub use connection::{
    ConnectionState, FrameOutcome, MessageHandler, StreamConnection, StreamStatus,
};
pub use reconnect::{ReconnectDecision, ReconnectPolicy};
pub use timer::TimerSlot;
