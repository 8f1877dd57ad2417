//! Stream connection lifecycle
//!
//! [`StreamConnection`] is a synchronous state machine. The caller feeds it
//! transport events and the current time; it decides what reaches the
//! consumer, what gets buffered, and when to reconnect. It never sleeps, so
//! its whole timing behavior can be exercised with a made-up clock.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::time::Instant;
use tracing::{debug, error, info, trace, warn};

use super::classifier::{classify, decode_frame, Category, DecodeError};
use super::coalescer::UpdateCoalescer;
use super::reconnect::{ReconnectDecision, ReconnectPolicy};
use super::timer::{earliest, TimerSlot};
use crate::transport::{
    ReadyState, TaggedEvent, Transport, TransportError, TransportEvent, TransportHandle,
};
use crate::types::{kinds, CoalesceKey, InboundMessage, StreamMessage};

/// Consumer callback; must return quickly
pub type MessageHandler = Arc<dyn Fn(StreamMessage) + Send + Sync>;

/// Lifecycle state of a connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    /// Never opened yet
    Idle,
    /// Stream established
    Open,
    /// Lost the stream, waiting to retry (or given up)
    Reconnecting,
    /// Explicitly disconnected
    Closed,
}

/// What happened to a single frame
#[derive(Debug, Clone, PartialEq)]
pub enum FrameOutcome {
    /// Malformed; nothing else happened
    Dropped(DecodeError),
    /// Arrived after `disconnect`
    Ignored,
    /// Control message, logged only
    Consumed,
    /// Handed to the consumer right away
    Dispatched,
    /// Buffered until the coalesce window closes
    Buffered(CoalesceKey),
}

/// Snapshot of a connection for observers
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StreamStatus {
    pub state: ConnectionState,
    pub attempt: u32,
    pub connected: bool,
    /// Automatic recovery has stopped
    pub exhausted: bool,
    pub pending_updates: usize,
}

impl Default for StreamStatus {
    fn default() -> Self {
        Self {
            state: ConnectionState::Idle,
            attempt: 0,
            connected: false,
            exhausted: false,
            pending_updates: 0,
        }
    }
}

/// Owns one transport handle and everything derived from its messages
pub struct StreamConnection<T: Transport> {
    transport: T,
    handle: Option<T::Handle>,

    /// Bumped for every handle opened and on disconnect
    generation: u64,

    on_message: Option<MessageHandler>,
    state: ConnectionState,

    /// Consecutive failures since the last successful open
    attempt: u32,
    exhausted: bool,

    policy: ReconnectPolicy,
    coalescer: UpdateCoalescer,
    reconnect_timer: TimerSlot,
}

impl<T: Transport> StreamConnection<T> {
    pub fn new(transport: T, policy: ReconnectPolicy, window: Duration) -> Self {
        Self {
            transport,
            handle: None,
            generation: 0,
            on_message: None,
            state: ConnectionState::Idle,
            attempt: 0,
            exhausted: false,
            policy,
            coalescer: UpdateCoalescer::new(window),
            reconnect_timer: TimerSlot::new(),
        }
    }

    /// Open a fresh handle and route its messages to `on_message`
    ///
    /// Any existing handle is closed first and a pending reconnect is
    /// cancelled. Updates still buffered for the previous callback are
    /// delivered to it before the switch.
    pub fn connect(&mut self, on_message: MessageHandler) {
        self.reconnect_timer.cancel();
        self.flush_pending();
        self.close_handle();

        self.generation += 1;
        self.on_message = Some(on_message);
        self.exhausted = false;
        if self.state == ConnectionState::Closed {
            self.state = ConnectionState::Idle;
        }
        self.handle = Some(self.transport.open(self.generation));
        debug!(generation = self.generation, "Opening event stream");
    }

    /// Tear everything down; nothing is delivered afterwards
    pub fn disconnect(&mut self) {
        self.close_handle();
        self.generation += 1;

        let reconnect_cancelled = self.reconnect_timer.cancel();
        let dropped = self.coalescer.clear();
        self.on_message = None;

        if self.state != ConnectionState::Closed {
            info!(
                dropped_updates = dropped,
                reconnect_cancelled, "Event stream disconnected"
            );
        }
        self.state = ConnectionState::Closed;
    }

    /// Route one transport event
    ///
    /// Events from a handle that has since been replaced or closed are ignored.
    pub fn handle_event(&mut self, tagged: TaggedEvent, now: Instant) {
        if tagged.generation != self.generation || self.handle.is_none() {
            trace!(
                generation = tagged.generation,
                current = self.generation,
                "Ignoring event from stale handle"
            );
            return;
        }

        match tagged.event {
            TransportEvent::Opened => self.handle_open(),
            TransportEvent::Frame(frame) => {
                self.handle_frame(&frame, now);
            }
            TransportEvent::Failed(err) => self.handle_error(&err, now),
        }
    }

    /// The current handle finished opening
    pub fn handle_open(&mut self) {
        if self.attempt > 0 {
            info!(after_attempts = self.attempt, "Event stream reconnected");
        } else {
            info!("Event stream connected");
        }
        self.state = ConnectionState::Open;
        self.attempt = 0;
    }

    /// Decode, classify and route one frame
    ///
    /// Ignored once the connection is closed.
    pub fn handle_frame(&mut self, frame: &str, now: Instant) -> FrameOutcome {
        if self.state == ConnectionState::Closed {
            return FrameOutcome::Ignored;
        }

        let message = match decode_frame(frame) {
            Ok(message) => message,
            Err(err) => {
                warn!(error = %err, "Dropping malformed event frame");
                return FrameOutcome::Dropped(err);
            }
        };

        match classify(&message) {
            Category::Control => {
                log_control(&message);
                FrameOutcome::Consumed
            }
            Category::Priority => {
                debug!(kind = %message.msg_type, "Priority event");
                if message.is_type(kinds::STATUS_UPDATE) {
                    // A newer state for the job supersedes the buffered one
                    if let Some(key) = message.coalesce_key() {
                        self.coalescer.evict(&key);
                    }
                }
                self.dispatch(message.into());
                FrameOutcome::Dispatched
            }
            Category::Generic => {
                debug!(kind = %message.msg_type, "Event received");
                self.dispatch(message.into());
                FrameOutcome::Dispatched
            }
            Category::Coalescable(key) => {
                trace!(id = %key, status = ?message.job_status(), "Buffering status update");
                self.coalescer.offer(key.clone(), message, now);
                FrameOutcome::Buffered(key)
            }
        }
    }

    /// The current handle died
    pub fn handle_error(&mut self, err: &TransportError, now: Instant) {
        if self.state == ConnectionState::Closed {
            return;
        }
        if self.exhausted || self.reconnect_timer.is_pending() {
            debug!(error = %err, "Transport error while already recovering");
            return;
        }

        self.state = ConnectionState::Reconnecting;
        // Reset only on Open; capped at ceiling + 1
        self.attempt = self
            .attempt
            .saturating_add(1)
            .min(self.policy.max_attempts.saturating_add(1));

        match self.policy.next_delay(self.attempt) {
            ReconnectDecision::RetryAfter(delay) => {
                self.reconnect_timer.schedule(now, delay);
                warn!(
                    error = %err,
                    attempt = self.attempt,
                    max_attempts = self.policy.max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    "Event stream lost, reconnecting"
                );
            }
            ReconnectDecision::GiveUp => {
                self.exhausted = true;
                self.close_handle();
                error!(
                    error = %err,
                    attempts = self.policy.max_attempts,
                    "Event stream reconnect attempts exhausted"
                );
            }
        }
    }

    /// Run whichever timers are due at `now`
    pub fn poll_timers(&mut self, now: Instant) {
        if let Some(batch) = self.coalescer.poll(now) {
            info!(count = batch.len(), "Flushing coalesced status updates");
            self.dispatch(batch.into());
        }

        if self.reconnect_timer.fire_if_due(now) {
            self.reconnect();
        }
    }

    /// Earliest moment [`poll_timers`](Self::poll_timers) has work to do
    pub fn next_deadline(&self) -> Option<Instant> {
        earliest(self.coalescer.deadline(), self.reconnect_timer.deadline())
    }

    pub fn is_connected(&self) -> bool {
        self.handle
            .as_ref()
            .is_some_and(|h| h.ready_state() == ReadyState::Open)
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn is_exhausted(&self) -> bool {
        self.exhausted
    }

    pub fn is_reconnect_pending(&self) -> bool {
        self.reconnect_timer.is_pending()
    }

    pub fn pending_updates(&self) -> usize {
        self.coalescer.len()
    }

    pub fn is_coalesce_pending(&self) -> bool {
        self.coalescer.is_pending()
    }

    pub fn policy(&self) -> &ReconnectPolicy {
        &self.policy
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn status(&self) -> StreamStatus {
        StreamStatus {
            state: self.state,
            attempt: self.attempt,
            connected: self.is_connected(),
            exhausted: self.exhausted,
            pending_updates: self.coalescer.len(),
        }
    }

    fn reconnect(&mut self) {
        match self.on_message.clone() {
            Some(handler) => {
                info!(attempt = self.attempt, "Reconnecting event stream");
                self.connect(handler);
            }
            None => debug!("Reconnect fired without a registered handler"),
        }
    }

    fn flush_pending(&mut self) {
        if let Some(batch) = self.coalescer.on_window_expiry() {
            self.dispatch(batch.into());
        }
    }

    fn close_handle(&mut self) {
        if let Some(mut handle) = self.handle.take() {
            handle.close();
        }
    }

    fn dispatch(&self, message: StreamMessage) {
        if let Some(handler) = &self.on_message {
            handler(message);
        }
    }
}

impl<T: Transport> fmt::Debug for StreamConnection<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamConnection")
            .field("state", &self.state)
            .field("generation", &self.generation)
            .field("attempt", &self.attempt)
            .field("exhausted", &self.exhausted)
            .field("pending_updates", &self.coalescer.len())
            .finish_non_exhaustive()
    }
}

fn log_control(message: &InboundMessage) {
    match message.msg_type.as_str() {
        kinds::HEARTBEAT => debug!(queue_size = ?message.queue_size, "Heartbeat received"),
        _ => info!(status = ?message.status, "Server acknowledged connection"),
    }
}
