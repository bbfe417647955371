//! Capped exponential backoff.
//!
//! The delay for attempt `n` (1-based) is `first × 2^(n-1)`, clamped to
//! `max`. Attempt 0 is treated like attempt 1.

use std::time::Duration;

/// Retry backoff policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    /// Delay before the first retry.
    pub first: Duration,
    /// Upper bound of every delay.
    pub max: Duration,
}

impl Default for BackoffPolicy {
    /// `first = 1s`, `max = 30s`.
    fn default() -> Self {
        Self {
            first: Duration::from_secs(1),
            max: Duration::from_secs(30),
        }
    }
}

impl BackoffPolicy {
    pub const fn new(first: Duration, max: Duration) -> Self {
        Self { first, max }
    }

    /// Delay before retry number `attempt`.
    pub fn delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1);
        2u32.checked_pow(exponent)
            .and_then(|factor| self.first.checked_mul(factor))
            .map_or(self.max, |delay| delay.min(self.max))
    }
}
