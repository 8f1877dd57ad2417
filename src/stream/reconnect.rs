//! Reconnect backoff policy

use std::time::Duration;

/// Outcome of asking the policy about a failed attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconnectDecision {
    /// Try again after the delay
    RetryAfter(Duration),
    /// Stop recovering automatically
    GiveUp,
}

impl ReconnectDecision {
    pub fn is_give_up(&self) -> bool {
        matches!(self, ReconnectDecision::GiveUp)
    }

    pub fn delay(&self) -> Option<Duration> {
        match self {
            ReconnectDecision::RetryAfter(delay) => Some(*delay),
            ReconnectDecision::GiveUp => None,
        }
    }
}

/// Linear, capped backoff with an attempt ceiling
///
/// `delay = min(base + attempt * increment, cap)` while `attempt <= max_attempts`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub base_delay: Duration,
    pub increment: Duration,
    pub cap_delay: Duration,
    pub max_attempts: u32,
}

impl ReconnectPolicy {
    pub const DEFAULT_BASE: Duration = Duration::from_millis(1000);
    pub const DEFAULT_INCREMENT: Duration = Duration::from_millis(500);
    pub const DEFAULT_CAP: Duration = Duration::from_millis(8000);
    pub const DEFAULT_MAX_ATTEMPTS: u32 = 15;

    pub const fn new(
        base_delay: Duration,
        increment: Duration,
        cap_delay: Duration,
        max_attempts: u32,
    ) -> Self {
        Self {
            base_delay,
            increment,
            cap_delay,
            max_attempts,
        }
    }

    /// Decide what to do after the `attempt`-th consecutive failure
    pub fn next_delay(&self, attempt: u32) -> ReconnectDecision {
        if attempt > self.max_attempts {
            return ReconnectDecision::GiveUp;
        }

        let delay = self
            .base_delay
            .saturating_add(self.increment.saturating_mul(attempt))
            .min(self.cap_delay);
        ReconnectDecision::RetryAfter(delay)
    }
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self::new(
            Self::DEFAULT_BASE,
            Self::DEFAULT_INCREMENT,
            Self::DEFAULT_CAP,
            Self::DEFAULT_MAX_ATTEMPTS,
        )
    }
}
