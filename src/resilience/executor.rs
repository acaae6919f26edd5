//! Resilience Executor Module
//!
//! Wraps every backend call: breaker check, bounded retries with backoff,
//! per-attempt timeout, then the fallback chain.

use std::future::Future;

use tokio::time::{sleep, timeout};
use tracing::{debug, info, warn};

use super::breaker::{BreakerPhase, CircuitBreakerState, CircuitBreakers};
use super::fallback::{default_strategies, ErrorClass, FallbackStrategy, Recovery, StrategyAction};
use super::retry::RetryPolicy;
use super::ResilienceConfig;
use crate::error::{CacheError, Result};

// == Resilience Layer ==
#[derive(Debug)]
pub struct ResilienceLayer {
    config: ResilienceConfig,
    retry: RetryPolicy,
    breakers: CircuitBreakers,
    strategies: Vec<FallbackStrategy>,
}

impl ResilienceLayer {
    pub fn new(config: ResilienceConfig) -> Self {
        Self::with_strategies(config, default_strategies())
    }

    pub fn with_strategies(config: ResilienceConfig, mut strategies: Vec<FallbackStrategy>) -> Self {
        strategies.sort_by(|a, b| b.priority.cmp(&a.priority));
        Self {
            retry: RetryPolicy::new(config.max_retries, config.base_delay),
            breakers: CircuitBreakers::new(config.failure_threshold, config.cooldown),
            strategies,
            config,
        }
    }

    pub fn config(&self) -> &ResilienceConfig {
        &self.config
    }

    pub fn strategies(&self) -> &[FallbackStrategy] {
        &self.strategies
    }

    pub fn breaker_phase(&self, backend: &str) -> BreakerPhase {
        self.breakers.phase(backend)
    }

    pub fn breaker_state(&self, backend: &str) -> Option<CircuitBreakerState> {
        self.breakers.state(backend)
    }

    pub fn reset_breaker(&self, backend: &str) {
        self.breakers.reset(backend);
    }

    pub fn breakers(&self) -> &CircuitBreakers {
        &self.breakers
    }

    /// Runs `operation` against `backend` under the breaker, retry and
    /// timeout policy, recovering through `recovery` when it still fails.
    ///
    /// Recovery order: caller fallback, then the highest-priority strategy
    /// for the error class, then the alternate lookup. When none yields a
    /// value the original error is returned.
    pub async fn execute_with_fallback<'a, T, F, Fut>(
        &self,
        backend: &str,
        operation: F,
        recovery: Recovery<'a, T>,
    ) -> Result<T>
    where
        T: Send + 'a,
        F: Fn() -> Fut + Send + Sync,
        Fut: Future<Output = Result<T>> + Send,
    {
        let error = match self.breakers.phase(backend) {
            BreakerPhase::Open { retry_in_ms } => {
                debug!(backend, retry_in_ms, "Short-circuiting call, circuit open");
                CacheError::CircuitOpen {
                    backend: backend.to_string(),
                    retry_in_ms,
                }
            }
            _ => match self.attempt(backend, &operation).await {
                Ok(value) => {
                    self.breakers.record_success(backend);
                    return Ok(value);
                }
                Err(err) => {
                    if err.is_availability() {
                        self.breakers.record_failure(backend);
                    }
                    err
                }
            },
        };

        self.recover(backend, error, &operation, recovery).await
    }

    /// Runs `operation` without any fallback.
    pub async fn execute<T, F, Fut>(&self, backend: &str, operation: F) -> Result<T>
    where
        T: Send,
        F: Fn() -> Fut + Send + Sync,
        Fut: Future<Output = Result<T>> + Send,
    {
        self.execute_with_fallback(backend, operation, Recovery::none())
            .await
    }

    async fn attempt<T, F, Fut>(&self, backend: &str, operation: &F) -> Result<T>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let attempts = self.retry.attempts();
        let mut attempt = 1;
        loop {
            let outcome = match timeout(self.config.operation_timeout, operation()).await {
                Ok(result) => result,
                Err(_) => Err(CacheError::Timeout(format!(
                    "backend '{}' did not answer within {}ms",
                    backend,
                    self.config.operation_timeout.as_millis()
                ))),
            };

            match outcome {
                Err(err) if err.is_retryable() && attempt < attempts => {
                    let delay = self.retry.delay_for(attempt);
                    debug!(backend, attempt, delay_ms = delay.as_millis() as u64, error = %err, "Retrying backend call");
                    sleep(delay).await;
                    attempt += 1;
                }
                other => return other,
            }
        }
    }

    fn strategy_for(&self, error: &CacheError) -> Option<&FallbackStrategy> {
        let class = ErrorClass::of(error)?;
        self.strategies.iter().find(|s| s.handles == class)
    }

    async fn recover<'a, T, F, Fut>(
        &self,
        backend: &str,
        error: CacheError,
        operation: &F,
        recovery: Recovery<'a, T>,
    ) -> Result<T>
    where
        T: Send + 'a,
        F: Fn() -> Fut + Send + Sync,
        Fut: Future<Output = Result<T>> + Send,
    {
        let Recovery {
            fallback,
            evict,
            alternate,
            default_value,
        } = recovery;

        if let Some(fallback) = fallback {
            match fallback(error.clone()).await {
                Ok(value) => {
                    debug!(backend, "Recovered through caller fallback");
                    return Ok(value);
                }
                Err(fallback_err) => debug!(backend, error = %fallback_err, "Caller fallback failed"),
            }
        }

        if let Some(strategy) = self.strategy_for(&error) {
            match strategy.action {
                StrategyAction::EvictAndRetry => {
                    if let Some(evict) = evict {
                        match evict().await {
                            Ok(evicted) => {
                                info!(backend, evicted, strategy = %strategy.name, "Evicted to make room, retrying");
                                match self.attempt(backend, operation).await {
                                    Ok(value) => {
                                        self.breakers.record_success(backend);
                                        return Ok(value);
                                    }
                                    Err(err) => debug!(backend, error = %err, "Retry after eviction failed"),
                                }
                            }
                            Err(err) => warn!(backend, error = %err, "Eviction for retry failed"),
                        }
                    }
                }
                StrategyAction::LastKnownValue => {
                    if let Some(alternate) = &alternate {
                        if let Some(value) = alternate().await {
                            debug!(backend, strategy = %strategy.name, "Serving last known value");
                            return Ok(value);
                        }
                    }
                }
                StrategyAction::DefaultValue => {
                    if let Some(value) = default_value {
                        debug!(backend, strategy = %strategy.name, "Serving default value");
                        return Ok(value);
                    }
                }
            }
        }

        if let Some(alternate) = &alternate {
            if let Some(value) = alternate().await {
                debug!(backend, "Recovered from alternate backend");
                return Ok(value);
            }
        }

        Err(error)
    }
}
