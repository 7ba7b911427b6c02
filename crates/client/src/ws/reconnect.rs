//! Reconnect delay policy.
//!
//! The policy only answers "how long to wait". Scheduling belongs to the
//! coordinator, which owns the single reconnect timer.

use std::time::Duration;

/// Delay before the first retry, and the value restored after a handshake
pub const INITIAL_DELAY: Duration = Duration::from_millis(1000);
/// Upper bound on the delay between attempts
pub const MAX_DELAY: Duration = Duration::from_millis(32000);

/// Exponential backoff bounds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    pub initial: Duration,
    pub max: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            initial: INITIAL_DELAY,
            max: MAX_DELAY,
        }
    }
}

impl BackoffPolicy {
    /// `min(previous * 2, max)`
    pub fn next_delay(&self, previous: Duration) -> Duration {
        previous.saturating_mul(2).min(self.max)
    }
}

/// The delay currently in effect for one coordinator.
#[derive(Debug, Clone)]
pub struct Backoff {
    policy: BackoffPolicy,
    current: Duration,
}

impl Backoff {
    pub fn new(policy: BackoffPolicy) -> Self {
        Self {
            policy,
            current: policy.initial,
        }
    }

    pub fn current(&self) -> Duration {
        self.current
    }

    /// Record a failed attempt and return the delay before the next one.
    pub fn advance(&mut self) -> Duration {
        self.current = self.policy.next_delay(self.current);
        self.current
    }

    /// Called after every successful handshake.
    pub fn reset(&mut self) {
        self.current = self.policy.initial;
    }
}
