//! Performance Report Task
//!
//! Logs a performance summary at a fixed interval.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::monitoring::Monitor;

pub fn spawn_report_task(monitor: Arc<Monitor>, report_interval_secs: u64) -> JoinHandle<()> {
    let interval = Duration::from_secs(report_interval_secs.max(1));

    tokio::spawn(async move {
        info!(
            "Starting report task with interval of {} seconds",
            interval.as_secs()
        );

        loop {
            tokio::time::sleep(interval).await;

            let report = monitor.generate_report();
            info!(
                operations = report.window_size,
                hit_rate = report.hit_rate,
                error_rate = report.error_rate,
                avg_latency_ms = report.average_latency_ms,
                p95_latency_ms = report.p95_latency_ms,
                alerts = report.alerts.len(),
                "Performance report"
            );
            for recommendation in &report.recommendations {
                warn!("{}", recommendation);
            }
        }
    })
}
