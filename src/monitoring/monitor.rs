//! Monitor Module
//!
//! Records per-operation latency and outcome, tracks lookup hit rate,
//! raises threshold alerts and builds performance reports.

use std::collections::{BTreeMap, VecDeque};
use std::fmt;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::warn;

use super::alerts::{Alert, AlertKind, AlertThresholds};

// == Operations ==
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Operation {
    Get,
    Set,
    Delete,
    Clear,
    Has,
    Keys,
    GetOrSet,
    Invalidate,
}

impl Operation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::Get => "get",
            Operation::Set => "set",
            Operation::Delete => "delete",
            Operation::Clear => "clear",
            Operation::Has => "has",
            Operation::Keys => "keys",
            Operation::GetOrSet => "get-or-set",
            Operation::Invalidate => "invalidate",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// == Configuration ==
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MonitorConfig {
    /// Operation samples kept for rates and percentiles
    pub max_samples: usize,
    /// Alerts kept, oldest dropped first
    pub max_alerts: usize,
    /// Window in which a repeated condition does not raise a new alert
    pub alert_cooldown: Duration,
    pub thresholds: AlertThresholds,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            max_samples: 1000,
            max_alerts: 100,
            alert_cooldown: Duration::from_secs(60),
            thresholds: AlertThresholds::default(),
        }
    }
}

// == Reports ==
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BackendReport {
    pub operations: usize,
    pub errors: usize,
    pub error_rate: f64,
    pub average_latency_ms: f64,
    pub hits: u64,
    pub misses: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PerformanceReport {
    pub generated_at: DateTime<Utc>,
    /// Operations recorded since start
    pub total_operations: u64,
    /// Operations in the sample window the figures below describe
    pub window_size: usize,
    pub error_rate: f64,
    pub hit_rate: f64,
    pub average_latency_ms: f64,
    pub p95_latency_ms: f64,
    pub max_latency_ms: f64,
    pub operations: BTreeMap<Operation, usize>,
    pub backends: BTreeMap<String, BackendReport>,
    pub alerts: Vec<Alert>,
    pub recommendations: Vec<String>,
}

#[derive(Debug, Clone)]
struct Sample {
    operation: Operation,
    backend: String,
    success: bool,
    latency_ms: f64,
}

#[derive(Debug, Clone)]
struct Lookup {
    backend: String,
    hit: bool,
}

#[derive(Debug, Default)]
struct MonitorState {
    samples: VecDeque<Sample>,
    lookups: VecDeque<Lookup>,
    alerts: VecDeque<Alert>,
    total_operations: u64,
}

// == Monitor ==
#[derive(Debug)]
pub struct Monitor {
    config: MonitorConfig,
    state: Mutex<MonitorState>,
}

impl Default for Monitor {
    fn default() -> Self {
        Self::new(MonitorConfig::default())
    }
}

impl Monitor {
    pub fn new(config: MonitorConfig) -> Self {
        Self {
            config,
            state: Mutex::new(MonitorState::default()),
        }
    }

    pub fn config(&self) -> &MonitorConfig {
        &self.config
    }

    fn state(&self) -> MutexGuard<'_, MonitorState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Records one backend call and checks latency and error-rate thresholds.
    pub fn record_operation(&self, operation: Operation, backend: &str, success: bool, latency_ms: f64) {
        let thresholds = self.config.thresholds;
        let mut state = self.state();
        state.total_operations += 1;
        state.samples.push_back(Sample {
            operation,
            backend: backend.to_string(),
            success,
            latency_ms,
        });
        while state.samples.len() > self.config.max_samples {
            state.samples.pop_front();
        }

        if latency_ms > thresholds.max_latency_ms {
            self.raise(&mut state, AlertKind::HighLatency, Some(backend), latency_ms, thresholds.max_latency_ms);
        }

        let (total, errors) = state
            .samples
            .iter()
            .filter(|s| s.backend == backend)
            .fold((0usize, 0usize), |(total, errors), s| {
                (total + 1, errors + usize::from(!s.success))
            });
        if total >= thresholds.min_samples {
            let error_rate = errors as f64 / total as f64;
            if error_rate > thresholds.max_error_rate {
                self.raise(&mut state, AlertKind::HighErrorRate, Some(backend), error_rate, thresholds.max_error_rate);
            }
        }
    }

    /// Records the outcome of a read and checks the cache-wide hit rate.
    pub fn record_lookup(&self, backend: &str, hit: bool) {
        let thresholds = self.config.thresholds;
        let mut state = self.state();
        state.lookups.push_back(Lookup {
            backend: backend.to_string(),
            hit,
        });
        while state.lookups.len() > self.config.max_samples {
            state.lookups.pop_front();
        }

        if state.lookups.len() >= thresholds.min_samples {
            let hit_rate = hit_rate(state.lookups.iter());
            if hit_rate < thresholds.min_hit_rate {
                self.raise(&mut state, AlertKind::LowHitRate, None, hit_rate, thresholds.min_hit_rate);
            }
        }
    }

    fn raise(&self, state: &mut MonitorState, kind: AlertKind, backend: Option<&str>, value: f64, threshold: f64) {
        let now = Utc::now();
        let cooldown_ms = self.config.alert_cooldown.as_millis() as i64;
        let recent = state.alerts.iter().any(|alert| {
            alert.same_condition(kind, backend)
                && (now - alert.raised_at).num_milliseconds() < cooldown_ms
        });
        if recent {
            return;
        }

        let alert = Alert::new(kind, backend, value, threshold);
        warn!(kind = kind.as_str(), backend = backend.unwrap_or("*"), "{}", alert.message);
        state.alerts.push_back(alert);
        while state.alerts.len() > self.config.max_alerts {
            state.alerts.pop_front();
        }
    }

    pub fn get_alerts(&self) -> Vec<Alert> {
        self.state().alerts.iter().cloned().collect()
    }

    pub fn clear_alerts(&self) {
        self.state().alerts.clear();
    }

    /// Summarises the current sample window.
    pub fn generate_report(&self) -> PerformanceReport {
        let thresholds = self.config.thresholds;
        let state = self.state();

        let window_size = state.samples.len();
        let errors = state.samples.iter().filter(|s| !s.success).count();
        let mut latencies: Vec<f64> = state.samples.iter().map(|s| s.latency_ms).collect();
        latencies.sort_by(|a, b| a.total_cmp(b));

        let mut operations = BTreeMap::new();
        let mut backends: BTreeMap<String, BackendReport> = BTreeMap::new();
        for sample in &state.samples {
            *operations.entry(sample.operation).or_insert(0) += 1;
            let report = backends.entry(sample.backend.clone()).or_default();
            report.operations += 1;
            report.errors += usize::from(!sample.success);
            report.average_latency_ms += sample.latency_ms;
        }
        for lookup in &state.lookups {
            let report = backends.entry(lookup.backend.clone()).or_default();
            if lookup.hit {
                report.hits += 1;
            } else {
                report.misses += 1;
            }
        }
        for report in backends.values_mut() {
            if report.operations > 0 {
                report.error_rate = report.errors as f64 / report.operations as f64;
                report.average_latency_ms /= report.operations as f64;
            }
        }

        let error_rate = ratio(errors, window_size);
        let hit_rate = hit_rate(state.lookups.iter());
        let average_latency_ms = if latencies.is_empty() {
            0.0
        } else {
            latencies.iter().sum::<f64>() / latencies.len() as f64
        };
        let p95_latency_ms = percentile(&latencies, 0.95);
        let max_latency_ms = latencies.last().copied().unwrap_or(0.0);

        let mut recommendations = Vec::new();
        if state.lookups.len() >= thresholds.min_samples && hit_rate < thresholds.min_hit_rate {
            recommendations.push(format!(
                "Hit rate {:.1}% is below {:.1}%: lengthen TTLs or warm frequently read keys",
                hit_rate * 100.0,
                thresholds.min_hit_rate * 100.0
            ));
        }
        if p95_latency_ms > thresholds.max_latency_ms {
            recommendations.push(format!(
                "p95 latency {:.1}ms exceeds {:.1}ms: move hot keys to the memory backend",
                p95_latency_ms, thresholds.max_latency_ms
            ));
        }
        for (name, report) in &backends {
            if report.operations >= thresholds.min_samples && report.error_rate > thresholds.max_error_rate {
                recommendations.push(format!(
                    "Backend '{}' fails {:.1}% of calls: check its storage availability and quota",
                    name,
                    report.error_rate * 100.0
                ));
            }
        }

        PerformanceReport {
            generated_at: Utc::now(),
            total_operations: state.total_operations,
            window_size,
            error_rate,
            hit_rate,
            average_latency_ms,
            p95_latency_ms,
            max_latency_ms,
            operations,
            backends,
            alerts: state.alerts.iter().cloned().collect(),
            recommendations,
        }
    }
}

fn ratio(part: usize, total: usize) -> f64 {
    if total == 0 {
        0.0
    } else {
        part as f64 / total as f64
    }
}

fn hit_rate<'a>(lookups: impl Iterator<Item = &'a Lookup>) -> f64 {
    let (total, hits) = lookups.fold((0, 0), |(total, hits), l| (total + 1, hits + usize::from(l.hit)));
    ratio(hits, total)
}

/// Nearest-rank percentile of sorted values.
fn percentile(sorted: &[f64], p: f64) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    let rank = (p * sorted.len() as f64).ceil() as usize;
    sorted[rank.clamp(1, sorted.len()) - 1]
}
