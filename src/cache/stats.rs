//! Cache Statistics Module
//!
//! Tracks per-backend performance counters and aggregates them across backends.

use serde::Serialize;

// == Cache Stats ==
/// Performance counters plus footprint for one backend, or a sum of backends.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheStats {
    /// Number of successful cache retrievals
    pub hits: u64,
    /// Number of failed cache retrievals (key not found, expired or corrupt)
    pub misses: u64,
    /// Number of entries evicted to satisfy a capacity bound
    pub evictions: u64,
    /// hits / (hits + misses), 0.0 before any request
    pub hit_rate: f64,
    /// Sum of estimated entry sizes in bytes
    pub total_size: usize,
    /// Current number of live entries
    pub entry_count: usize,
    /// total_size / entry_count, 0.0 when empty
    pub average_size: f64,
}

impl CacheStats {
    // == Constructor ==
    /// Creates a new CacheStats with all counters at zero.
    pub fn new() -> Self {
        Self::default()
    }

    // == Record Hit ==
    pub fn record_hit(&mut self) {
        self.hits += 1;
    }

    // == Record Miss ==
    pub fn record_miss(&mut self) {
        self.misses += 1;
    }

    // == Record Eviction ==
    /// Adds `count` evicted entries to the counter.
    pub fn record_evictions(&mut self, count: usize) {
        self.evictions += count as u64;
    }

    // == Snapshot ==
    /// Returns a copy with footprint and derived ratios filled in.
    pub fn snapshot(&self, entry_count: usize, total_size: usize) -> Self {
        let mut stats = self.clone();
        stats.entry_count = entry_count;
        stats.total_size = total_size;
        stats.refresh();
        stats
    }

    // == Aggregate ==
    /// Sums several snapshots and recomputes the derived ratios.
    pub fn aggregate<'a>(parts: impl IntoIterator<Item = &'a CacheStats>) -> Self {
        let mut total = CacheStats::new();
        for part in parts {
            total.hits += part.hits;
            total.misses += part.misses;
            total.evictions += part.evictions;
            total.total_size += part.total_size;
            total.entry_count += part.entry_count;
        }
        total.refresh();
        total
    }

    fn refresh(&mut self) {
        let lookups = self.hits + self.misses;
        self.hit_rate = if lookups == 0 {
            0.0
        } else {
            self.hits as f64 / lookups as f64
        };
        self.average_size = if self.entry_count == 0 {
            0.0
        } else {
            self.total_size as f64 / self.entry_count as f64
        };
    }
}
