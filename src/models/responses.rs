//! Response DTOs for the admin API
//!
//! Defines the structure of outgoing HTTP response bodies.

use std::collections::{BTreeMap, BTreeSet};

use serde::Serialize;
use serde_json::Value;

use crate::backend::PersistenceClass;
use crate::cache::{CacheEntry, CacheStats};
use crate::invalidation::InvalidationReport;
use crate::monitoring::Alert;
use crate::resilience::CircuitBreakerState;

/// Response body for GET /cache/:key
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GetResponse {
    pub key: String,
    pub value: Value,
    pub ttl_remaining_ms: u64,
    pub hit_count: u64,
    pub tags: BTreeSet<String>,
    pub stale: bool,
}

impl GetResponse {
    pub fn from_entry(entry: CacheEntry) -> Self {
        Self {
            ttl_remaining_ms: entry.ttl_remaining_ms(),
            stale: entry.is_stale(),
            key: entry.key,
            value: entry.value,
            hit_count: entry.hit_count,
            tags: entry.tags,
        }
    }
}

/// Response body for PUT /cache
#[derive(Debug, Clone, Serialize)]
pub struct SetResponse {
    /// Success message
    pub message: String,
    pub key: String,
    /// False when the backend was unreachable
    pub stored: bool,
}

impl SetResponse {
    pub fn new(key: impl Into<String>, stored: bool) -> Self {
        let key = key.into();
        let message = if stored {
            format!("Key '{}' set successfully", key)
        } else {
            format!("Key '{}' not stored: backend unavailable", key)
        };
        Self {
            message,
            key,
            stored,
        }
    }
}

/// Response body for DELETE /cache/:key
#[derive(Debug, Clone, Serialize)]
pub struct DeleteResponse {
    /// Success message
    pub message: String,
    pub key: String,
}

impl DeleteResponse {
    pub fn new(key: impl Into<String>) -> Self {
        let key = key.into();
        Self {
            message: format!("Key '{}' deleted successfully", key),
            key,
        }
    }
}

/// Response body for GET /stats
#[derive(Debug, Clone, Serialize)]
pub struct StatsResponse {
    /// Selected backend, or None for the aggregate
    #[serde(skip_serializing_if = "Option::is_none")]
    pub backend: Option<String>,
    #[serde(flatten)]
    pub stats: CacheStats,
    /// Per-backend breakdown, present on the aggregate only
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub backends: BTreeMap<String, CacheStats>,
}

impl StatsResponse {
    pub fn single(backend: impl Into<String>, stats: CacheStats) -> Self {
        Self {
            backend: Some(backend.into()),
            stats,
            backends: BTreeMap::new(),
        }
    }

    pub fn aggregate(backends: BTreeMap<String, CacheStats>) -> Self {
        Self {
            backend: None,
            stats: CacheStats::aggregate(backends.values()),
            backends,
        }
    }
}

/// Response body for POST /invalidate/pattern
#[derive(Debug, Clone, Serialize)]
pub struct PatternInvalidationResponse {
    pub pattern: String,
    #[serde(flatten)]
    pub report: InvalidationReport,
}

/// Response body for POST /invalidate/tag
#[derive(Debug, Clone, Serialize)]
pub struct TagInvalidationResponse {
    pub tag: String,
    pub removed: usize,
}

/// Response body for GET /alerts
#[derive(Debug, Clone, Serialize)]
pub struct AlertsResponse {
    pub count: usize,
    pub alerts: Vec<Alert>,
}

impl AlertsResponse {
    pub fn new(alerts: Vec<Alert>) -> Self {
        Self {
            count: alerts.len(),
            alerts,
        }
    }
}

/// One backend's entry in the health response.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BackendHealth {
    pub name: String,
    pub persistence: PersistenceClass,
    pub is_default: bool,
    /// Present once the backend has failed at least once
    #[serde(skip_serializing_if = "Option::is_none")]
    pub circuit: Option<CircuitBreakerState>,
}

/// Response body for GET /health
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    /// "healthy", or "degraded" while any circuit is open
    pub status: String,
    /// Current timestamp in ISO 8601 format
    pub timestamp: String,
    pub backends: Vec<BackendHealth>,
}

impl HealthResponse {
    pub fn new(backends: Vec<BackendHealth>) -> Self {
        let degraded = backends
            .iter()
            .any(|b| b.circuit.as_ref().is_some_and(|c| c.is_open));
        Self {
            status: if degraded { "degraded" } else { "healthy" }.to_string(),
            timestamp: chrono::Utc::now().to_rfc3339(),
            backends,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::time::Duration;

    #[test]
    fn test_get_response_from_entry() {
        let entry = CacheEntry::new("k", json!({"a": 1}), Duration::from_secs(60)).unwrap();
        let resp = GetResponse::from_entry(entry);
        let json = serde_json::to_value(&resp).unwrap();
        assert_eq!(json["key"], "k");
        assert_eq!(json["value"]["a"], 1);
        assert_eq!(json["stale"], false);
        assert!(json["ttlRemainingMs"].as_u64().unwrap() > 0);
    }

    #[test]
    fn test_set_response_messages() {
        assert!(SetResponse::new("my_key", true).message.contains("successfully"));
        assert!(SetResponse::new("my_key", false).message.contains("not stored"));
    }

    #[test]
    fn test_delete_response_serialize() {
        let resp = DeleteResponse::new("deleted_key");
        let json = serde_json::to_string(&resp).unwrap();
        assert!(json.contains("deleted_key"));
        assert!(json.contains("deleted"));
    }

    #[test]
    fn test_stats_response_flattens() {
        let mut backends = BTreeMap::new();
        let mut stats = CacheStats::new();
        stats.record_hit();
        backends.insert("memory".to_string(), stats.snapshot(1, 10));

        let json = serde_json::to_value(StatsResponse::aggregate(backends)).unwrap();
        assert_eq!(json["hits"], 1);
        assert_eq!(json["entryCount"], 1);
        assert_eq!(json["backends"]["memory"]["hits"], 1);
        assert!(json.get("backend").is_none());
    }

    #[test]
    fn test_health_status() {
        let healthy = HealthResponse::new(vec![BackendHealth {
            name: "memory".into(),
            persistence: PersistenceClass::VolatileMemory,
            is_default: true,
            circuit: None,
        }]);
        assert_eq!(healthy.status, "healthy");

        let degraded = HealthResponse::new(vec![BackendHealth {
            name: "local".into(),
            persistence: PersistenceClass::DurablePerOrigin,
            is_default: false,
            circuit: Some(CircuitBreakerState {
                is_open: true,
                consecutive_failures: 5,
                opened_at: Some(1),
                retry_after: Some(2),
            }),
        }]);
        assert_eq!(degraded.status, "degraded");
    }
}
