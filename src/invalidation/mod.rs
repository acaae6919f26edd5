//! Invalidation Module
//!
//! Rule-driven invalidation: key patterns, prioritised rule groups with
//! conditions and cascading dependencies, and cross-instance broadcast.

mod broadcast;
mod engine;
mod pattern;
mod rules;

pub use broadcast::{
    EventBus, EventSubscription, InvalidationEvent, NoopEventBus, StorageEventBus, EVENT_CLEAR,
    EVENT_INVALIDATE_PATTERN, EVENT_INVALIDATE_TAG, EVENT_STORAGE_KEY,
};
pub use engine::{InvalidationEngine, InvalidationReport};
pub use pattern::KeyPattern;
pub use rules::{EntryCondition, InvalidationAction, InvalidationRule, RuleGroup};
