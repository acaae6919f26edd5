//! Retry Policy Module
//!
//! Exponential backoff between attempts against the same backend.

use std::time::Duration;

/// Attempt budget and backoff schedule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, the first call included
    pub max_retries: u32,
    /// Delay before the second attempt
    pub base_delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_retries: u32, base_delay: Duration) -> Self {
        Self {
            max_retries,
            base_delay,
        }
    }

    /// Number of attempts made, never less than one.
    pub fn attempts(&self) -> u32 {
        self.max_retries.max(1)
    }

    /// Delay after failed attempt number `attempt` (1-based): base × 2^(attempt-1).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        self.base_delay.saturating_mul(1u32 << exponent)
    }
}
