//! LRU Tracker Module
//!
//! Access-order bookkeeping shared by the memory and web storage backends.

use std::collections::{HashSet, VecDeque};

// == LRU Tracker ==
/// Tracks access order for batch LRU eviction.
///
/// Keys are stored in a VecDeque where:
/// - Front = Most recently used
/// - Back = Least recently used
#[derive(Debug, Default)]
pub struct LruTracker {
    /// Order of keys by access time
    order: VecDeque<String>,
}

impl LruTracker {
    // == Constructor ==
    /// Creates a new empty LRU tracker.
    pub fn new() -> Self {
        Self {
            order: VecDeque::new(),
        }
    }

    // == Touch ==
    /// Marks a key as recently used (moves to front).
    pub fn touch(&mut self, key: &str) {
        self.remove(key);
        self.order.push_front(key.to_string());
    }

    // == Push Oldest ==
    /// Inserts a key at the least-recently-used end, unless already tracked.
    pub fn push_oldest(&mut self, key: &str) {
        if !self.contains(key) {
            self.order.push_back(key.to_string());
        }
    }

    // == Remove ==
    /// Removes a key from the tracker.
    pub fn remove(&mut self, key: &str) {
        self.order.retain(|k| k != key);
    }

    // == Evict Oldest ==
    /// Returns and removes up to `count` least recently used keys, oldest first.
    pub fn evict_oldest_n(&mut self, count: usize) -> Vec<String> {
        let mut evicted = Vec::with_capacity(count.min(self.order.len()));
        while evicted.len() < count {
            match self.order.pop_back() {
                Some(key) => evicted.push(key),
                None => break,
            }
        }
        evicted
    }

    // == Peek Oldest ==
    /// Returns the least recently used key without removing it.
    pub fn peek_oldest(&self) -> Option<&String> {
        self.order.back()
    }

    // == Reconcile ==
    /// Aligns the tracker with the keys actually present in a store.
    ///
    /// Keys no longer present are dropped; keys the tracker never saw (written
    /// by another instance sharing the substrate) are treated as oldest.
    pub fn reconcile(&mut self, present: &[String]) {
        let present_set: HashSet<&str> = present.iter().map(String::as_str).collect();
        self.order.retain(|k| present_set.contains(k.as_str()));
        for key in present {
            self.push_oldest(key);
        }
    }

    pub fn clear(&mut self) {
        self.order.clear();
    }

    // == Length ==
    /// Returns the number of tracked keys.
    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    // == Contains ==
    /// Checks if a key is being tracked.
    pub fn contains(&self, key: &str) -> bool {
        self.order.iter().any(|k| k == key)
    }
}
