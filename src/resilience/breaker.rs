//! Circuit Breaker Module
//!
//! Per-backend breaker state.
//!
//! ```text
//! Closed → Open:      consecutive_failures >= threshold
//! Open → Half-Open:   now >= retry_after
//! Half-Open → Closed: next call succeeds
//! Half-Open → Open:   next call fails (fresh retry_after)
//! ```

use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde::Serialize;
use tracing::{info, warn};

use crate::cache::current_timestamp_ms;

// == Breaker State ==
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CircuitBreakerState {
    pub is_open: bool,
    pub consecutive_failures: u32,
    /// Unix milliseconds of the last opening
    pub opened_at: Option<u64>,
    /// Unix milliseconds from which a probe call is allowed
    pub retry_after: Option<u64>,
}

/// Where a breaker stands for the next call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerPhase {
    Closed,
    Open { retry_in_ms: u64 },
    HalfOpen,
}

impl CircuitBreakerState {
    pub fn phase_at(&self, now_ms: u64) -> BreakerPhase {
        if !self.is_open {
            return BreakerPhase::Closed;
        }
        match self.retry_after {
            Some(retry_after) if now_ms < retry_after => BreakerPhase::Open {
                retry_in_ms: retry_after - now_ms,
            },
            _ => BreakerPhase::HalfOpen,
        }
    }
}

// == Breaker Registry ==
/// Breakers keyed by backend name, created lazily on the first failure.
#[derive(Debug)]
pub struct CircuitBreakers {
    threshold: u32,
    cooldown: Duration,
    states: Mutex<HashMap<String, CircuitBreakerState>>,
}

impl CircuitBreakers {
    pub fn new(threshold: u32, cooldown: Duration) -> Self {
        Self {
            threshold: threshold.max(1),
            cooldown,
            states: Mutex::new(HashMap::new()),
        }
    }

    fn states(&self) -> MutexGuard<'_, HashMap<String, CircuitBreakerState>> {
        self.states.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn phase(&self, backend: &str) -> BreakerPhase {
        self.states()
            .get(backend)
            .map(|state| state.phase_at(current_timestamp_ms()))
            .unwrap_or(BreakerPhase::Closed)
    }

    /// Clears the failure counter and closes the breaker.
    pub fn record_success(&self, backend: &str) {
        let mut states = self.states();
        if let Some(state) = states.get_mut(backend) {
            if state.is_open {
                info!(backend, "Circuit closed after successful probe");
            }
            state.is_open = false;
            state.consecutive_failures = 0;
            state.retry_after = None;
        }
    }

    /// Counts a failure; returns true when this failure opened the breaker.
    pub fn record_failure(&self, backend: &str) -> bool {
        let now = current_timestamp_ms();
        let mut states = self.states();
        let state = states.entry(backend.to_string()).or_default();
        let was_half_open = state.phase_at(now) == BreakerPhase::HalfOpen;
        state.consecutive_failures += 1;

        if was_half_open || (!state.is_open && state.consecutive_failures >= self.threshold) {
            state.is_open = true;
            state.opened_at = Some(now);
            state.retry_after = Some(now + self.cooldown.as_millis() as u64);
            warn!(
                backend,
                failures = state.consecutive_failures,
                cooldown_ms = self.cooldown.as_millis() as u64,
                "Circuit opened"
            );
            return true;
        }
        false
    }

    pub fn state(&self, backend: &str) -> Option<CircuitBreakerState> {
        self.states().get(backend).cloned()
    }

    /// Forgets a backend's breaker entirely.
    pub fn reset(&self, backend: &str) {
        self.states().remove(backend);
    }

    pub fn snapshot(&self) -> BTreeMap<String, CircuitBreakerState> {
        self.states()
            .iter()
            .map(|(name, state)| (name.clone(), state.clone()))
            .collect()
    }
}
