//! Update coalescer for debouncing high-frequency job updates

use std::collections::HashMap;
use std::time::Duration;
use tokio::time::Instant;

use super::timer::TimerSlot;
use crate::types::{BatchMessage, CoalesceKey, InboundMessage};

/// Default coalesce window
pub const DEFAULT_WINDOW: Duration = Duration::from_millis(50);

/// Keyed buffer that turns a burst of updates into a single batch
///
/// Only the latest message per key survives a window. The window starts with
/// the first offer into an empty buffer and is not pushed back by later
/// offers, so a busy stream still flushes at a fixed cadence.
#[derive(Debug)]
pub struct UpdateCoalescer {
    /// Latest message per job
    pending: HashMap<CoalesceKey, InboundMessage>,

    /// Window length
    window: Duration,

    /// Armed iff `pending` is non-empty
    timer: TimerSlot,
}

impl UpdateCoalescer {
    /// Create a coalescer with the given window
    pub fn new(window: Duration) -> Self {
        Self {
            pending: HashMap::new(),
            window,
            timer: TimerSlot::new(),
        }
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// Buffer `message` under `key`, replacing any earlier one
    ///
    /// Returns true if this offer opened a new window.
    pub fn offer(&mut self, key: CoalesceKey, message: InboundMessage, now: Instant) -> bool {
        self.pending.insert(key, message);
        self.timer.schedule_if_idle(now, self.window)
    }

    /// Drop the buffered entry for `key`
    pub fn evict(&mut self, key: &CoalesceKey) -> Option<InboundMessage> {
        let evicted = self.pending.remove(key);
        if self.pending.is_empty() {
            self.timer.cancel();
        }
        evicted
    }

    /// Drain the buffer into one batch
    ///
    /// Returns `None` when there was nothing buffered.
    pub fn on_window_expiry(&mut self) -> Option<BatchMessage> {
        self.timer.cancel();
        if self.pending.is_empty() {
            return None;
        }

        let data = self
            .pending
            .drain()
            .filter_map(|(_, message)| message.data)
            .collect();
        Some(BatchMessage::new(data))
    }

    /// Flush if the window has closed at `now`
    pub fn poll(&mut self, now: Instant) -> Option<BatchMessage> {
        if self.timer.fire_if_due(now) {
            self.on_window_expiry()
        } else {
            None
        }
    }

    /// Discard everything and disarm the timer; returns how many were dropped
    pub fn clear(&mut self) -> usize {
        self.timer.cancel();
        let dropped = self.pending.len();
        self.pending.clear();
        dropped
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.timer.deadline()
    }

    pub fn is_pending(&self) -> bool {
        self.timer.is_pending()
    }

    pub fn contains(&self, key: &CoalesceKey) -> bool {
        self.pending.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

impl Default for UpdateCoalescer {
    fn default() -> Self {
        Self::new(DEFAULT_WINDOW)
    }
}
