//! Invalidation Broadcast Module
//!
//! Propagates invalidations to other coordinator instances sharing the same
//! durable storage area. Events are written to a reserved key; the storage
//! change feed delivers them to every other attached instance.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::{debug, warn};

use crate::backend::{StorageChange, StorageSubstrate};
use crate::cache::current_timestamp_ms;
use crate::error::Result;

pub const EVENT_INVALIDATE_PATTERN: &str = "invalidate-pattern";
pub const EVENT_INVALIDATE_TAG: &str = "invalidate-tag";
pub const EVENT_CLEAR: &str = "clear";

/// Reserved storage key carrying broadcast events.
pub const EVENT_STORAGE_KEY: &str = "__cache_invalidation__";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvalidationEvent {
    #[serde(rename = "type")]
    pub event_type: String,
    pub payload: Value,
    /// Unix milliseconds
    pub timestamp: u64,
}

impl InvalidationEvent {
    pub fn new(event_type: &str, payload: Value) -> Self {
        Self {
            event_type: event_type.to_string(),
            payload,
            timestamp: current_timestamp_ms(),
        }
    }
}

// == Bus Traits ==
pub trait EventBus: Send + Sync {
    fn publish(&self, event: &InvalidationEvent) -> Result<()>;

    /// Feed of events published by other instances, if the bus has one.
    fn subscribe(&self) -> Option<Box<dyn EventSubscription>>;
}

#[async_trait]
pub trait EventSubscription: Send {
    /// Next remote event; None once the feed is closed.
    async fn recv(&mut self) -> Option<InvalidationEvent>;
}

/// Bus for a single instance: publishing goes nowhere.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopEventBus;

impl EventBus for NoopEventBus {
    fn publish(&self, _event: &InvalidationEvent) -> Result<()> {
        Ok(())
    }

    fn subscribe(&self) -> Option<Box<dyn EventSubscription>> {
        None
    }
}

// == Storage Event Bus ==
pub struct StorageEventBus {
    substrate: Arc<dyn StorageSubstrate>,
}

impl StorageEventBus {
    pub fn new(substrate: Arc<dyn StorageSubstrate>) -> Self {
        Self { substrate }
    }
}

impl EventBus for StorageEventBus {
    fn publish(&self, event: &InvalidationEvent) -> Result<()> {
        let encoded = serde_json::to_string(event)?;
        self.substrate.set_item(EVENT_STORAGE_KEY, &encoded)?;
        // Listeners already saw the write; the slot need not hold quota
        self.substrate.remove_item(EVENT_STORAGE_KEY)?;
        debug!(event_type = %event.event_type, "Broadcast invalidation event");
        Ok(())
    }

    fn subscribe(&self) -> Option<Box<dyn EventSubscription>> {
        let changes = self.substrate.subscribe()?;
        Some(Box::new(StorageSubscription {
            changes,
            own_instance: self.substrate.instance_id(),
        }))
    }
}

struct StorageSubscription {
    changes: broadcast::Receiver<StorageChange>,
    own_instance: u64,
}

#[async_trait]
impl EventSubscription for StorageSubscription {
    async fn recv(&mut self) -> Option<InvalidationEvent> {
        loop {
            let change = match self.changes.recv().await {
                Ok(change) => change,
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "Invalidation feed lagged, events dropped");
                    continue;
                }
                Err(RecvError::Closed) => return None,
            };

            if change.source == self.own_instance || change.key != EVENT_STORAGE_KEY {
                continue;
            }
            let Some(raw) = change.new_value else {
                continue;
            };
            match serde_json::from_str(&raw) {
                Ok(event) => return Some(event),
                Err(err) => warn!(error = %err, "Ignoring undecodable invalidation event"),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MemorySubstrate;
    use serde_json::json;
    use std::time::Duration;
    use tokio::time::timeout;

    #[test]
    fn test_event_wire_format() {
        let event = InvalidationEvent::new(EVENT_INVALIDATE_PATTERN, json!({"pattern": "user:*"}));
        let encoded = serde_json::to_value(&event).unwrap();
        assert_eq!(encoded["type"], "invalidate-pattern");
        assert_eq!(encoded["payload"]["pattern"], "user:*");
        assert!(encoded["timestamp"].as_u64().unwrap() > 0);
    }

    #[test]
    fn test_noop_bus() {
        let bus = NoopEventBus;
        assert!(bus.publish(&InvalidationEvent::new(EVENT_CLEAR, json!({}))).is_ok());
        assert!(bus.subscribe().is_none());
    }

    #[tokio::test]
    async fn test_events_reach_other_instances_only() {
        let area = MemorySubstrate::new(1024 * 1024);
        let first = StorageEventBus::new(Arc::new(area.attach()));
        let second = StorageEventBus::new(Arc::new(area.attach()));

        let mut first_feed = first.subscribe().unwrap();
        let mut second_feed = second.subscribe().unwrap();

        let event = InvalidationEvent::new(EVENT_INVALIDATE_TAG, json!({"tag": "feed"}));
        first.publish(&event).unwrap();

        let received = timeout(Duration::from_secs(1), second_feed.recv()).await.unwrap();
        assert_eq!(received, Some(event));

        let own = timeout(Duration::from_millis(50), first_feed.recv()).await;
        assert!(own.is_err(), "publisher must not hear its own event");
        assert_eq!(area.used_bytes(), 0);
    }

    #[tokio::test]
    async fn test_publish_fails_when_storage_unavailable() {
        let area = MemorySubstrate::new(1024);
        let bus = StorageEventBus::new(Arc::new(area.attach()));
        area.set_available(false);

        assert!(bus.publish(&InvalidationEvent::new(EVENT_CLEAR, json!({}))).is_err());
    }
}
