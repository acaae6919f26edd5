//! Configuration Module
//!
//! Handles loading and managing coordinator configuration from environment variables.

use std::env;
use std::str::FromStr;
use std::time::Duration;

use crate::resilience::ResilienceConfig;

/// Coordinator and server configuration parameters.
///
/// All values can be configured via environment variables with sensible defaults.
#[derive(Debug, Clone)]
pub struct Config {
    /// Maximum number of entries each backend can hold
    pub max_entries: usize,
    /// Default TTL in seconds for entries without explicit TTL
    pub default_ttl: u64,
    /// HTTP server port
    pub server_port: u16,
    /// Background expiry sweep interval in seconds
    pub cleanup_interval: u64,
    /// Byte quota of each web storage area
    pub storage_quota_bytes: usize,
    /// Attempts per backend call before giving up
    pub max_retries: u32,
    /// First retry delay in milliseconds, doubled on each attempt
    pub retry_base_delay_ms: u64,
    /// Deadline of a single backend call in milliseconds
    pub operation_timeout_ms: u64,
    /// Consecutive failures that open a backend's circuit
    pub breaker_threshold: u32,
    /// How long an open circuit rejects calls, in milliseconds
    pub breaker_cooldown_ms: u64,
    /// Interval in seconds between logged performance reports
    pub report_interval: u64,
}

impl Config {
    /// Creates a new Config by loading values from environment variables.
    ///
    /// # Environment Variables
    /// - `MAX_ENTRIES` - Maximum entries per backend (default: 1000)
    /// - `DEFAULT_TTL` - Default TTL in seconds (default: 300)
    /// - `SERVER_PORT` - HTTP server port (default: 3000)
    /// - `CLEANUP_INTERVAL` - Sweep frequency in seconds (default: 1)
    /// - `STORAGE_QUOTA_BYTES` - Web storage quota (default: 5 MiB)
    /// - `MAX_RETRIES` - Attempts per backend call (default: 3)
    /// - `RETRY_BASE_DELAY_MS` - Initial backoff (default: 50)
    /// - `OPERATION_TIMEOUT_MS` - Per-call deadline (default: 2000)
    /// - `BREAKER_THRESHOLD` - Failures before opening (default: 5)
    /// - `BREAKER_COOLDOWN_MS` - Open-circuit cooldown (default: 30000)
    /// - `REPORT_INTERVAL` - Report frequency in seconds (default: 60)
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            max_entries: env_or("MAX_ENTRIES", defaults.max_entries),
            default_ttl: env_or("DEFAULT_TTL", defaults.default_ttl),
            server_port: env_or("SERVER_PORT", defaults.server_port),
            cleanup_interval: env_or("CLEANUP_INTERVAL", defaults.cleanup_interval),
            storage_quota_bytes: env_or("STORAGE_QUOTA_BYTES", defaults.storage_quota_bytes),
            max_retries: env_or("MAX_RETRIES", defaults.max_retries),
            retry_base_delay_ms: env_or("RETRY_BASE_DELAY_MS", defaults.retry_base_delay_ms),
            operation_timeout_ms: env_or("OPERATION_TIMEOUT_MS", defaults.operation_timeout_ms),
            breaker_threshold: env_or("BREAKER_THRESHOLD", defaults.breaker_threshold),
            breaker_cooldown_ms: env_or("BREAKER_COOLDOWN_MS", defaults.breaker_cooldown_ms),
            report_interval: env_or("REPORT_INTERVAL", defaults.report_interval),
        }
    }

    /// Default TTL as a Duration.
    pub fn default_ttl_duration(&self) -> Duration {
        Duration::from_secs(self.default_ttl)
    }

    /// Resilience settings derived from this configuration.
    pub fn resilience(&self) -> ResilienceConfig {
        ResilienceConfig {
            max_retries: self.max_retries,
            base_delay: Duration::from_millis(self.retry_base_delay_ms),
            operation_timeout: Duration::from_millis(self.operation_timeout_ms),
            failure_threshold: self.breaker_threshold,
            cooldown: Duration::from_millis(self.breaker_cooldown_ms),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_entries: 1000,
            default_ttl: 300,
            server_port: 3000,
            cleanup_interval: 1,
            storage_quota_bytes: 5 * 1024 * 1024,
            max_retries: 3,
            retry_base_delay_ms: 50,
            operation_timeout_ms: 2000,
            breaker_threshold: 5,
            breaker_cooldown_ms: 30_000,
            report_interval: 60,
        }
    }
}

fn env_or<T: FromStr>(name: &str, default: T) -> T {
    env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
