//! Cache Coordinator - client-side cache coordination engine
//!
//! Coordinates several storage backends behind one API with TTL, LRU
//! eviction, rule-driven invalidation, circuit breaking and monitoring.

pub mod api;
pub mod backend;
pub mod cache;
pub mod config;
pub mod error;
pub mod invalidation;
pub mod models;
pub mod monitoring;
pub mod resilience;
pub mod tasks;

pub use api::AppState;
pub use backend::Backend;
pub use cache::{CacheCoordinator, CacheEntry, SetOptions};
pub use config::Config;
pub use error::{CacheError, Result};
pub use invalidation::InvalidationEngine;
pub use monitoring::Monitor;
pub use tasks::{spawn_cleanup_task, spawn_invalidation_listener, spawn_report_task};
