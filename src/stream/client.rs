//! Async driver for a [`StreamConnection`]
//!
//! One task owns the connection and is the only code that touches it. The
//! task waits on three things: commands from the application, events from
//! the transport's reader tasks, and the connection's next timer deadline.

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant};
use tracing::{debug, info};

use super::connection::{MessageHandler, StreamConnection, StreamStatus};
use crate::config::{ConfigError, StreamConfig};
use crate::transport::{SseTransport, TaggedEvent, Transport};
use crate::types::StreamMessage;

/// Errors from the client handle
#[derive(Debug, Error)]
pub enum ClientError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("failed to build HTTP client: {0}")]
    Http(#[from] reqwest::Error),

    #[error("event stream task has stopped")]
    Stopped,
}

enum Command {
    Connect(MessageHandler),
    Disconnect,
    Shutdown,
}

/// Handle to a running event stream
pub struct EventStreamClient {
    commands: mpsc::UnboundedSender<Command>,
    status: watch::Receiver<StreamStatus>,
    task: Option<JoinHandle<()>>,
}

impl EventStreamClient {
    /// Build the SSE transport from `config` and start the driver task
    ///
    /// The stream is not opened until [`connect`](Self::connect) is called.
    pub fn spawn(config: &StreamConfig) -> Result<Self, ClientError> {
        config.validate()?;
        let url = config.events_url()?;
        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()?;

        let (transport, events) = SseTransport::new(http, url.as_str());
        let transport = transport.with_bearer(config.auth_token.clone());
        let connection = StreamConnection::new(
            transport,
            config.reconnect_policy(),
            config.coalesce_window(),
        );

        info!(url = %url, "Event stream client started");
        Ok(Self::spawn_with(connection, events))
    }

    /// Start the driver task for an already built connection
    pub fn spawn_with<T>(
        connection: StreamConnection<T>,
        events: mpsc::UnboundedReceiver<TaggedEvent>,
    ) -> Self
    where
        T: Transport + Send + 'static,
        T::Handle: Send,
    {
        let (commands, command_rx) = mpsc::unbounded_channel();
        let (status_tx, status) = watch::channel(connection.status());
        let task = tokio::spawn(drive(connection, command_rx, events, status_tx));

        Self {
            commands,
            status,
            task: Some(task),
        }
    }

    /// Open the stream and deliver every message to `on_message`
    ///
    /// Calling it again replaces the callback and reopens the stream.
    pub fn connect<F>(&self, on_message: F) -> Result<(), ClientError>
    where
        F: Fn(StreamMessage) + Send + Sync + 'static,
    {
        self.send(Command::Connect(Arc::new(on_message)))
    }

    /// Close the stream and cancel pending work; the task keeps running
    pub fn disconnect(&self) -> Result<(), ClientError> {
        self.send(Command::Disconnect)
    }

    pub fn is_connected(&self) -> bool {
        self.status.borrow().connected
    }

    pub fn status(&self) -> StreamStatus {
        self.status.borrow().clone()
    }

    /// Watch status changes
    pub fn subscribe_status(&self) -> watch::Receiver<StreamStatus> {
        self.status.clone()
    }

    /// Disconnect and wait for the driver task to finish
    pub async fn shutdown(mut self) {
        let _ = self.commands.send(Command::Shutdown);
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }

    fn send(&self, command: Command) -> Result<(), ClientError> {
        self.commands.send(command).map_err(|_| ClientError::Stopped)
    }
}

impl Drop for EventStreamClient {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

async fn drive<T>(
    mut connection: StreamConnection<T>,
    mut commands: mpsc::UnboundedReceiver<Command>,
    mut events: mpsc::UnboundedReceiver<TaggedEvent>,
    status: watch::Sender<StreamStatus>,
) where
    T: Transport,
{
    loop {
        let deadline = connection.next_deadline();

        tokio::select! {
            command = commands.recv() => match command {
                Some(Command::Connect(handler)) => connection.connect(handler),
                Some(Command::Disconnect) => connection.disconnect(),
                Some(Command::Shutdown) | None => {
                    connection.disconnect();
                    status.send_replace(connection.status());
                    break;
                }
            },
            Some(event) = events.recv() => connection.handle_event(event, Instant::now()),
            () = wait_for(deadline) => connection.poll_timers(Instant::now()),
        }

        status.send_if_modified(|current| {
            let next = connection.status();
            if *current == next {
                return false;
            }
            *current = next;
            true
        });
    }

    debug!("Event stream driver stopped");
}

async fn wait_for(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
