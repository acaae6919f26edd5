//! Memoization Module
//!
//! Wraps an async function so its results are cached through the coordinator.

use std::fmt::Display;
use std::future::Future;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;

use super::{CacheCoordinator, SetOptions};
use crate::error::Result;

/// An async function whose results are cached under `prefix:<derived key>`.
///
/// ```ignore
/// let lookup = Memoized::new(coordinator, "user", fetch_user, |id: &u64| id.to_string());
/// let user: User = lookup.call(7).await?;
/// ```
pub struct Memoized<F, K> {
    coordinator: Arc<CacheCoordinator>,
    prefix: String,
    options: SetOptions,
    function: F,
    key_fn: K,
}

impl<F, K> Memoized<F, K> {
    pub fn new(coordinator: Arc<CacheCoordinator>, prefix: impl Into<String>, function: F, key_fn: K) -> Self {
        Self {
            coordinator,
            prefix: prefix.into(),
            options: SetOptions::new(),
            function,
            key_fn,
        }
    }

    /// Options applied to every cached result.
    pub fn with_options(mut self, options: SetOptions) -> Self {
        self.options = options;
        self
    }

    pub fn cache_key<A>(&self, args: &A) -> String
    where
        K: Fn(&A) -> String,
    {
        format!("{}:{}", self.prefix, (self.key_fn)(args))
    }

    pub async fn call<A, V, Fut, E>(&self, args: A) -> Result<V>
    where
        F: Fn(A) -> Fut,
        K: Fn(&A) -> String,
        Fut: Future<Output = std::result::Result<V, E>>,
        E: Display,
        V: Serialize + DeserializeOwned,
    {
        let key = self.cache_key(&args);
        let function = &self.function;
        self.coordinator
            .get_or_set(&key, move || function(args), self.options.clone())
            .await
    }

    /// Drops the cached result for `args`.
    pub async fn forget<A>(&self, args: &A) -> Result<bool>
    where
        K: Fn(&A) -> String,
    {
        self.coordinator.delete(&self.cache_key(args), None).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{Capacity, MemoryBackend};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn coordinator() -> Arc<CacheCoordinator> {
        Arc::new(
            CacheCoordinator::builder()
                .backend(MemoryBackend::new("memory", Capacity::entries(10), Duration::from_secs(60)))
                .build()
                .unwrap(),
        )
    }

    #[tokio::test]
    async fn test_memoized_calls_once_per_key() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let square = Memoized::new(
            coordinator(),
            "square",
            move |n: u64| {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Ok::<_, String>(n * n)
                }
            },
            |n: &u64| n.to_string(),
        );

        assert_eq!(square.call(3).await.unwrap(), 9u64);
        assert_eq!(square.call(3).await.unwrap(), 9u64);
        assert_eq!(square.call(4).await.unwrap(), 16u64);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(square.cache_key(&3), "square:3");
    }

    #[tokio::test]
    async fn test_forget_recomputes() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let lookup = Memoized::new(
            coordinator(),
            "user",
            move |id: u64| {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Ok::<_, String>(format!("user-{}", id))
                }
            },
            |id: &u64| id.to_string(),
        );

        let _: String = lookup.call(1).await.unwrap();
        assert!(lookup.forget(&1).await.unwrap());
        let _: String = lookup.call(1).await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }
}
