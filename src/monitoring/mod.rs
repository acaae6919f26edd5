//! Monitoring Module
//!
//! Operation latency, hit rate and error rate tracking with threshold alerts.

mod alerts;
mod monitor;

pub use alerts::{Alert, AlertKind, AlertThresholds};
pub use monitor::{BackendReport, Monitor, MonitorConfig, Operation, PerformanceReport};
