//! Resilience Module
//!
//! Fault tolerance around backend calls: per-backend circuit breakers,
//! exponential-backoff retries with a per-attempt timeout, and a
//! prioritised fallback chain.

mod breaker;
mod executor;
mod fallback;
mod retry;

pub use breaker::{BreakerPhase, CircuitBreakerState, CircuitBreakers};
pub use executor::ResilienceLayer;
pub use fallback::{default_strategies, ErrorClass, FallbackStrategy, Recovery, StrategyAction};
pub use retry::RetryPolicy;

use std::time::Duration;

/// Tuning of the resilience layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResilienceConfig {
    /// Attempts per call, the first one included
    pub max_retries: u32,
    pub base_delay: Duration,
    /// Deadline of each attempt
    pub operation_timeout: Duration,
    /// Consecutive availability failures that open a breaker
    pub failure_threshold: u32,
    /// How long an open breaker rejects calls
    pub cooldown: Duration,
}

impl Default for ResilienceConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(50),
            operation_timeout: Duration::from_secs(2),
            failure_threshold: 5,
            cooldown: Duration::from_secs(30),
        }
    }
}
