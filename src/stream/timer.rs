//! Cancellable one-shot timer slots
//!
//! The connection never sleeps itself. It records deadlines here and the
//! driver wakes it up once the earliest one has passed.

use std::time::Duration;
use tokio::time::Instant;

/// A single pending deadline that can be armed, cancelled or fired
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct TimerSlot {
    deadline: Option<Instant>,
}

impl TimerSlot {
    pub const fn new() -> Self {
        Self { deadline: None }
    }

    /// Arm the slot to fire `delay` after `now`, replacing any pending deadline
    pub fn schedule(&mut self, now: Instant, delay: Duration) -> Instant {
        let deadline = now + delay;
        self.deadline = Some(deadline);
        deadline
    }

    /// Arm the slot only if nothing is pending; returns true if it was armed
    pub fn schedule_if_idle(&mut self, now: Instant, delay: Duration) -> bool {
        if self.deadline.is_some() {
            return false;
        }
        self.schedule(now, delay);
        true
    }

    /// Disarm the slot; returns true if a deadline was pending
    pub fn cancel(&mut self) -> bool {
        self.deadline.take().is_some()
    }

    pub fn is_pending(&self) -> bool {
        self.deadline.is_some()
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Disarm and report true if the deadline has passed at `now`
    pub fn fire_if_due(&mut self, now: Instant) -> bool {
        match self.deadline {
            Some(deadline) if deadline <= now => {
                self.deadline = None;
                true
            }
            _ => false,
        }
    }
}

/// The earlier of two optional deadlines
pub fn earliest(a: Option<Instant>, b: Option<Instant>) -> Option<Instant> {
    match (a, b) {
        (Some(a), Some(b)) => Some(a.min(b)),
        (a, None) => a,
        (None, b) => b,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fires_only_after_deadline() {
        let now = Instant::now();
        let mut slot = TimerSlot::new();
        slot.schedule(now, Duration::from_millis(50));

        assert!(!slot.fire_if_due(now + Duration::from_millis(49)));
        assert!(slot.fire_if_due(now + Duration::from_millis(50)));
        assert!(!slot.is_pending());
        assert!(!slot.fire_if_due(now + Duration::from_secs(10)));
    }

    #[test]
    fn test_schedule_if_idle_keeps_first_deadline() {
        let now = Instant::now();
        let mut slot = TimerSlot::new();

        assert!(slot.schedule_if_idle(now, Duration::from_millis(50)));
        assert!(!slot.schedule_if_idle(now + Duration::from_millis(30), Duration::from_millis(50)));
        assert_eq!(slot.deadline(), Some(now + Duration::from_millis(50)));
    }

    #[test]
    fn test_cancel_is_idempotent() {
        let mut slot = TimerSlot::new();
        slot.schedule(Instant::now(), Duration::from_secs(1));

        assert!(slot.cancel());
        assert!(!slot.cancel());
    }

    #[test]
    fn test_earliest() {
        let now = Instant::now();
        let later = now + Duration::from_secs(1);

        assert_eq!(earliest(Some(later), Some(now)), Some(now));
        assert_eq!(earliest(None, Some(later)), Some(later));
        assert_eq!(earliest(None, None), None);
    }
}
