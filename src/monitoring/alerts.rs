//! Alerts Module
//!
//! Threshold definitions and the alerts raised when they are crossed.

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Limits checked after every recorded operation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AlertThresholds {
    pub max_latency_ms: f64,
    pub min_hit_rate: f64,
    pub max_error_rate: f64,
    /// Samples required before rates are judged
    pub min_samples: usize,
}

impl Default for AlertThresholds {
    fn default() -> Self {
        Self {
            max_latency_ms: 100.0,
            min_hit_rate: 0.5,
            max_error_rate: 0.1,
            min_samples: 20,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum AlertKind {
    HighLatency,
    LowHitRate,
    HighErrorRate,
}

impl AlertKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertKind::HighLatency => "high-latency",
            AlertKind::LowHitRate => "low-hit-rate",
            AlertKind::HighErrorRate => "high-error-rate",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Alert {
    pub kind: AlertKind,
    /// None for cache-wide alerts
    pub backend: Option<String>,
    pub message: String,
    pub value: f64,
    pub threshold: f64,
    pub raised_at: DateTime<Utc>,
}

impl Alert {
    pub fn new(kind: AlertKind, backend: Option<&str>, value: f64, threshold: f64) -> Self {
        let scope = backend
            .map(|name| format!("backend '{}'", name))
            .unwrap_or_else(|| "cache".to_string());
        let message = match kind {
            AlertKind::HighLatency => {
                format!("{} latency {:.1}ms above {:.1}ms", scope, value, threshold)
            }
            AlertKind::LowHitRate => format!(
                "{} hit rate {:.1}% below {:.1}%",
                scope,
                value * 100.0,
                threshold * 100.0
            ),
            AlertKind::HighErrorRate => format!(
                "{} error rate {:.1}% above {:.1}%",
                scope,
                value * 100.0,
                threshold * 100.0
            ),
        };
        Self {
            kind,
            backend: backend.map(str::to_string),
            message,
            value,
            threshold,
            raised_at: Utc::now(),
        }
    }

    /// Same condition on the same scope.
    pub fn same_condition(&self, kind: AlertKind, backend: Option<&str>) -> bool {
        self.kind == kind && self.backend.as_deref() == backend
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_messages() {
        let alert = Alert::new(AlertKind::HighLatency, Some("local"), 150.0, 100.0);
        assert_eq!(alert.message, "backend 'local' latency 150.0ms above 100.0ms");

        let alert = Alert::new(AlertKind::LowHitRate, None, 0.25, 0.5);
        assert_eq!(alert.message, "cache hit rate 25.0% below 50.0%");
    }

    #[test]
    fn test_same_condition() {
        let alert = Alert::new(AlertKind::HighErrorRate, Some("local"), 0.5, 0.1);
        assert!(alert.same_condition(AlertKind::HighErrorRate, Some("local")));
        assert!(!alert.same_condition(AlertKind::HighErrorRate, Some("memory")));
        assert!(!alert.same_condition(AlertKind::HighLatency, Some("local")));
    }
}
