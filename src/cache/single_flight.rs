//! Single-Flight Module
//!
//! Coalesces concurrent loads of the same key into one underlying call.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Mutex, MutexGuard, PoisonError};

use serde_json::Value;
use tokio::sync::watch;
use tracing::debug;

use crate::error::{CacheError, Result};

type FlightResult = Result<Value>;
type FlightReceiver = watch::Receiver<Option<FlightResult>>;

// == Single Flight ==
/// Registry of in-flight loads, one per key.
///
/// The first caller for a key becomes the leader and runs the work; every
/// caller arriving while it runs waits for the leader's outcome, success or
/// error, instead of starting its own.
#[derive(Debug, Default)]
pub struct SingleFlight {
    calls: Mutex<HashMap<String, FlightReceiver>>,
}

enum Role {
    Leader(watch::Sender<Option<FlightResult>>),
    Follower(FlightReceiver),
}

/// Releases the key when the leader finishes or is dropped mid-flight.
struct LeaderGuard<'a> {
    flights: &'a SingleFlight,
    key: &'a str,
}

impl Drop for LeaderGuard<'_> {
    fn drop(&mut self) {
        self.flights.calls().remove(self.key);
    }
}

impl SingleFlight {
    pub fn new() -> Self {
        Self::default()
    }

    fn calls(&self) -> MutexGuard<'_, HashMap<String, FlightReceiver>> {
        self.calls.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Number of keys currently being loaded.
    pub fn in_flight(&self) -> usize {
        self.calls().len()
    }

    /// Runs `work` for `key` unless a load for it is already in flight, in
    /// which case the caller waits for that load's result.
    pub async fn run<F, Fut>(&self, key: &str, work: F) -> Result<Value>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Value>>,
    {
        let role = {
            let mut calls = self.calls();
            match calls.get(key) {
                Some(receiver) => Role::Follower(receiver.clone()),
                None => {
                    let (sender, receiver) = watch::channel(None);
                    calls.insert(key.to_string(), receiver);
                    Role::Leader(sender)
                }
            }
        };

        match role {
            Role::Leader(sender) => {
                let guard = LeaderGuard { flights: self, key };
                let result = work().await;
                // Unregister before publishing so late arrivals start fresh
                drop(guard);
                // Followers hold receivers; send only fails when none are left
                let _ = sender.send(Some(result.clone()));
                result
            }
            Role::Follower(mut receiver) => {
                debug!(key, "Joining in-flight load");
                let outcome = receiver.wait_for(Option::is_some).await;
                match outcome {
                    Ok(published) => published.clone().unwrap_or_else(|| {
                        Err(CacheError::Internal(format!("load for '{}' published nothing", key)))
                    }),
                    Err(_) => Err(CacheError::Internal(format!(
                        "in-flight load for '{}' was abandoned",
                        key
                    ))),
                }
            }
        }
    }
}
