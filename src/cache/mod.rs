//! Cache Module
//!
//! The coordinator facade and the data model shared by every backend:
//! entries with TTL, LRU bookkeeping, statistics and single-flight loading.

mod coordinator;
mod entry;
mod lru;
mod memoize;
mod single_flight;
mod stats;


// Re-export public types
pub use coordinator::{CacheCoordinator, CoordinatorBuilder};
pub use entry::{current_timestamp_ms, estimate_size, Annotation, CacheEntry, SetOptions, STALE_FLAG};
pub use lru::LruTracker;
pub use memoize::Memoized;
pub use single_flight::SingleFlight;
pub use stats::CacheStats;

// == Public Constants ==
/// Maximum allowed key length in bytes
pub const MAX_KEY_LENGTH: usize = 256;

/// Maximum allowed encoded value size in bytes
pub const MAX_VALUE_SIZE: usize = 1024 * 1024; // 1 MB
