//! Expiry Sweep Task
//!
//! Background task that periodically purges expired entries from every backend.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::cache::CacheCoordinator;

/// Spawns a background task that sweeps expired entries out of every
/// registered backend.
///
/// Reads already treat expired entries as misses; the sweep reclaims their
/// space. Backends that cannot be reached are skipped until the next run.
///
/// # Example
/// ```ignore
/// let cleanup_handle = spawn_cleanup_task(coordinator.clone(), 1);
/// // Later, during shutdown:
/// cleanup_handle.abort();
/// ```
pub fn spawn_cleanup_task(coordinator: Arc<CacheCoordinator>, cleanup_interval_secs: u64) -> JoinHandle<()> {
    let interval = Duration::from_secs(cleanup_interval_secs.max(1));

    tokio::spawn(async move {
        info!(
            "Starting expiry sweep task with interval of {} seconds",
            interval.as_secs()
        );

        loop {
            tokio::time::sleep(interval).await;

            let removed = coordinator.purge_expired().await;
            if removed > 0 {
                info!("Expiry sweep: removed {} expired entries", removed);
            } else {
                debug!("Expiry sweep: no expired entries found");
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{Capacity, IndexedBackend, MemoryBackend};
    use crate::cache::SetOptions;

    fn coordinator() -> Arc<CacheCoordinator> {
        Arc::new(
            CacheCoordinator::builder()
                .backend(MemoryBackend::new("memory", Capacity::entries(100), Duration::from_secs(300)))
                .backend(IndexedBackend::new("indexed", Capacity::entries(100), Duration::from_secs(300)))
                .build()
                .unwrap(),
        )
    }

    #[tokio::test]
    async fn test_cleanup_task_removes_expired_entries() {
        let coordinator = coordinator();
        let short = SetOptions::new().ttl(Duration::from_millis(200));
        coordinator.set("expire_soon", "value", short.clone()).await.unwrap();
        coordinator
            .set("expire_soon", "value", short.backend("indexed"))
            .await
            .unwrap();

        let handle = spawn_cleanup_task(coordinator.clone(), 1);
        tokio::time::sleep(Duration::from_millis(1500)).await;

        // Sizes count stored entries, so the sweep must have run
        assert_eq!(coordinator.stats(None).await.unwrap().entry_count, 0);

        handle.abort();
    }

    #[tokio::test]
    async fn test_cleanup_task_preserves_valid_entries() {
        let coordinator = coordinator();
        coordinator
            .set("long_lived", "value", SetOptions::new().ttl(Duration::from_secs(3600)))
            .await
            .unwrap();

        let handle = spawn_cleanup_task(coordinator.clone(), 1);
        tokio::time::sleep(Duration::from_millis(1500)).await;

        let value: Option<String> = coordinator.get("long_lived", None).await.unwrap();
        assert_eq!(value.as_deref(), Some("value"));

        handle.abort();
    }

    #[tokio::test]
    async fn test_cleanup_task_can_be_aborted() {
        let handle = spawn_cleanup_task(coordinator(), 1);

        handle.abort();

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(handle.is_finished(), "Task should be finished after abort");
    }
}
