//! Fallback Module
//!
//! Error classes, the prioritised strategy table and the per-call recovery
//! hooks a caller hands to the resilience layer.

use std::future::Future;

use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use serde::Serialize;

use crate::error::{CacheError, Result};

// == Error Classes ==
/// Failure families a fallback strategy can handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ErrorClass {
    Quota,
    Timeout,
    Availability,
}

impl ErrorClass {
    pub fn of(error: &CacheError) -> Option<Self> {
        match error {
            CacheError::CapacityExceeded(_) => Some(ErrorClass::Quota),
            CacheError::Timeout(_) => Some(ErrorClass::Timeout),
            CacheError::BackendUnavailable(_) | CacheError::CircuitOpen { .. } => {
                Some(ErrorClass::Availability)
            }
            _ => None,
        }
    }
}

/// What a strategy does once selected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum StrategyAction {
    /// Evict a batch, then try the operation once more
    EvictAndRetry,
    /// Serve the value another backend still holds
    LastKnownValue,
    /// Serve the caller's default, when one was given
    DefaultValue,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FallbackStrategy {
    pub name: String,
    /// Higher runs first
    pub priority: u8,
    pub handles: ErrorClass,
    pub action: StrategyAction,
}

impl FallbackStrategy {
    pub fn new(name: &str, priority: u8, handles: ErrorClass, action: StrategyAction) -> Self {
        Self {
            name: name.to_string(),
            priority,
            handles,
            action,
        }
    }
}

/// Built-in strategy table, highest priority first.
pub fn default_strategies() -> Vec<FallbackStrategy> {
    vec![
        FallbackStrategy::new("quota-evict", 30, ErrorClass::Quota, StrategyAction::EvictAndRetry),
        FallbackStrategy::new(
            "timeout-last-known",
            20,
            ErrorClass::Timeout,
            StrategyAction::LastKnownValue,
        ),
        FallbackStrategy::new(
            "unavailable-default",
            10,
            ErrorClass::Availability,
            StrategyAction::DefaultValue,
        ),
    ]
}

// == Recovery Hooks ==
pub type FallbackFn<'a, T> = Box<dyn FnOnce(CacheError) -> BoxFuture<'a, Result<T>> + Send + 'a>;
pub type EvictFn<'a> = Box<dyn FnOnce() -> BoxFuture<'a, Result<usize>> + Send + 'a>;
pub type AlternateFn<'a, T> = Box<dyn Fn() -> BoxFuture<'a, Option<T>> + Send + Sync + 'a>;

/// Optional hooks consulted, in order, after an operation has failed.
pub struct Recovery<'a, T> {
    pub(crate) fallback: Option<FallbackFn<'a, T>>,
    pub(crate) evict: Option<EvictFn<'a>>,
    pub(crate) alternate: Option<AlternateFn<'a, T>>,
    pub(crate) default_value: Option<T>,
}

impl<'a, T> Default for Recovery<'a, T> {
    fn default() -> Self {
        Self {
            fallback: None,
            evict: None,
            alternate: None,
            default_value: None,
        }
    }
}

impl<'a, T: Send + 'a> Recovery<'a, T> {
    /// No hooks: failures surface unless a strategy needs nothing from the caller.
    pub fn none() -> Self {
        Self::default()
    }

    /// Caller-supplied recovery, tried before any strategy.
    pub fn with_fallback<F, Fut>(mut self, fallback: F) -> Self
    where
        F: FnOnce(CacheError) -> Fut + Send + 'a,
        Fut: Future<Output = Result<T>> + Send + 'a,
    {
        self.fallback = Some(Box::new(move |err| fallback(err).boxed()));
        self
    }

    /// Frees room in the failing backend for the evict-and-retry strategy.
    pub fn with_evict<F, Fut>(mut self, evict: F) -> Self
    where
        F: FnOnce() -> Fut + Send + 'a,
        Fut: Future<Output = Result<usize>> + Send + 'a,
    {
        self.evict = Some(Box::new(move || evict().boxed()));
        self
    }

    /// Looks the value up somewhere other than the failing backend.
    pub fn with_alternate<F, Fut>(mut self, alternate: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'a,
        Fut: Future<Output = Option<T>> + Send + 'a,
    {
        self.alternate = Some(Box::new(move || alternate().boxed()));
        self
    }

    pub fn with_default(mut self, value: T) -> Self {
        self.default_value = Some(value);
        self
    }
}
