//! Transport seam between the stream connection and the network
//!
//! A transport opens handles; each handle reports events through a channel,
//! tagged with the generation it was opened for so the connection can ignore
//! anything coming from a handle it already replaced.

pub mod sse;

use thiserror::Error;

pub use sse::{SseHandle, SseParser, SseTransport};

/// Readiness of a transport handle, mirroring the platform's readyState
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ReadyState {
    Connecting = 0,
    Open = 1,
    Closed = 2,
}

impl ReadyState {
    pub fn from_u8(value: u8) -> Self {
        match value {
            0 => ReadyState::Connecting,
            1 => ReadyState::Open,
            _ => ReadyState::Closed,
        }
    }
}

/// Failure of the underlying connection
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("request failed: {0}")]
    Request(String),

    #[error("server answered with status {0}")]
    Status(u16),

    #[error("stream read failed: {0}")]
    Body(String),

    #[error("server closed the stream")]
    EndOfStream,
}

/// Something that happened on a transport handle
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    /// The stream is established
    Opened,
    /// One complete frame of text
    Frame(String),
    /// The handle is dead; at most one per handle
    Failed(TransportError),
}

/// A transport event together with the generation of the handle that raised it
#[derive(Debug, Clone, PartialEq)]
pub struct TaggedEvent {
    pub generation: u64,
    pub event: TransportEvent,
}

impl TaggedEvent {
    pub fn new(generation: u64, event: TransportEvent) -> Self {
        Self { generation, event }
    }
}

/// Opens connection handles
pub trait Transport {
    type Handle: TransportHandle;

    /// Start a new connection; its events must carry `generation`
    fn open(&mut self, generation: u64) -> Self::Handle;
}

/// A live (or dead) connection
pub trait TransportHandle {
    fn ready_state(&self) -> ReadyState;

    /// Stop the connection; no events may follow
    fn close(&mut self);
}
