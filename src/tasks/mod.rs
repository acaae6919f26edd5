//! Background Tasks Module
//!
//! Contains background tasks that run during server operation.
//!
//! # Tasks
//! - Expiry sweep: purges expired entries from every backend
//! - Report: logs a periodic performance summary
//! - Listener: replays invalidations broadcast by other instances

mod cleanup;
mod listener;
mod report;

pub use cleanup::spawn_cleanup_task;
pub use listener::spawn_invalidation_listener;
pub use report::spawn_report_task;
