//! Download Stream Client
//!
//! Keeps a download manager UI in sync with its server through the
//! server-sent events stream at `/api/events`.
//!
//! # Features
//!
//! - **Classification**: heartbeats and connection notices are consumed,
//!   terminal job states are delivered at once, progress is coalesced
//! - **Coalescing**: one `batch_status_update` per 50ms window, last write wins per job
//! - **Reconnect**: linear capped backoff, bounded attempts, stale handles ignored
//! - **Sans-IO core**: the state machine takes events and an injected clock
//! - **Companion stores**: auth, locale, theme and toast state
//!
//! # Modules
//!
//! - `types`: Wire messages (`InboundMessage`, `BatchMessage`, `StreamMessage`)
//! - `stream`: Classifier, coalescer, reconnect policy, connection state machine, async driver
//! - `transport`: Transport seam and the reqwest SSE implementation
//! - `config`: `StreamConfig` with environment loading
//! - `stores`: Observable application stores
//!
//! # Example
//!
//! ```no_run
//! use download_stream::{EventStreamClient, StreamConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = StreamConfig::from_env()?;
//!     let client = EventStreamClient::spawn(&config)?;
//!     client.connect(|message| println!("{}", message.message_type()))?;
//!     tokio::signal::ctrl_c().await?;
//!     client.shutdown().await;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod stores;
pub mod stream;
pub mod transport;
pub mod types;

// Re-export commonly used items at crate root
pub use config::{ConfigError, StreamConfig};
pub use stream::{
    ClientError, ConnectionState, EventStreamClient, FrameOutcome, MessageHandler,
    ReconnectPolicy, StreamConnection, StreamStatus,
};
pub use transport::{ReadyState, TaggedEvent, Transport, TransportEvent, TransportHandle};
pub use types::{kinds, BatchMessage, CoalesceKey, InboundMessage, StreamMessage};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");
