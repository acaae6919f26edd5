//! Invalidation Listener Task
//!
//! Replays invalidations broadcast by other instances.

use std::sync::Arc;

use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::invalidation::InvalidationEngine;

/// Spawns the listener, or returns None when the engine's bus has no feed.
pub fn spawn_invalidation_listener(engine: Arc<InvalidationEngine>) -> Option<JoinHandle<()>> {
    let mut feed = engine.subscribe()?;

    Some(tokio::spawn(async move {
        info!("Listening for remote invalidation events");

        while let Some(event) = feed.recv().await {
            if let Err(err) = engine.apply_remote(&event).await {
                warn!(event_type = %event.event_type, error = %err, "Failed to apply remote invalidation");
            }
        }

        info!("Invalidation feed closed");
    }))
}
