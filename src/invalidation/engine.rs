//! Invalidation Engine Module
//!
//! Applies rule groups to an invalidation request, follows cascading
//! dependencies with cycle detection, and broadcasts every local
//! invalidation so other instances repeat it.

use std::collections::HashSet;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Instant;

use serde::Serialize;
use serde_json::json;
use tracing::{debug, info, warn};

use super::broadcast::{
    EventBus, EventSubscription, InvalidationEvent, NoopEventBus, EVENT_CLEAR, EVENT_INVALIDATE_PATTERN,
    EVENT_INVALIDATE_TAG,
};
use super::rules::{InvalidationAction, InvalidationRule, RuleGroup};
use super::KeyPattern;
use crate::cache::{Annotation, CacheCoordinator};
use crate::error::{CacheError, Result};
use crate::monitoring::Operation;

/// Monitor label for invalidations, which span every backend.
pub const ALL_BACKENDS: &str = "*";

/// Outcome of one invalidation request, dependencies included.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InvalidationReport {
    pub removed: usize,
    pub marked_stale: usize,
    pub tagged: usize,
    /// Patterns processed, in order
    pub visited: Vec<String>,
    /// Patterns that depend on themselves through a cascade, skipped
    pub cycles: Vec<String>,
}

impl InvalidationReport {
    /// Entries touched in any way.
    pub fn affected(&self) -> usize {
        self.removed + self.marked_stale + self.tagged
    }
}

pub struct InvalidationEngine {
    coordinator: Arc<CacheCoordinator>,
    groups: RwLock<Vec<RuleGroup>>,
    bus: Arc<dyn EventBus>,
}

impl InvalidationEngine {
    pub fn new(coordinator: Arc<CacheCoordinator>, bus: Arc<dyn EventBus>) -> Self {
        Self {
            coordinator,
            groups: RwLock::new(Vec::new()),
            bus,
        }
    }

    /// Engine whose invalidations stay on this instance.
    pub fn local(coordinator: Arc<CacheCoordinator>) -> Self {
        Self::new(coordinator, Arc::new(NoopEventBus))
    }

    pub fn coordinator(&self) -> &Arc<CacheCoordinator> {
        &self.coordinator
    }

    /// Adds a group, replacing any group of the same name.
    pub fn add_group(&self, group: RuleGroup) {
        let mut groups = self.groups.write().unwrap_or_else(PoisonError::into_inner);
        groups.retain(|existing| existing.name != group.name);
        info!(group = %group.name, priority = group.priority, rules = group.rules.len(), "Registered rule group");
        groups.push(group);
        // Stable: equal priorities keep registration order
        groups.sort_by_key(|group| group.priority);
    }

    pub fn remove_group(&self, name: &str) -> bool {
        let mut groups = self.groups.write().unwrap_or_else(PoisonError::into_inner);
        let before = groups.len();
        groups.retain(|group| group.name != name);
        groups.len() != before
    }

    pub fn set_group_enabled(&self, name: &str, enabled: bool) -> bool {
        let mut groups = self.groups.write().unwrap_or_else(PoisonError::into_inner);
        match groups.iter_mut().find(|group| group.name == name) {
            Some(group) => {
                group.enabled = enabled;
                true
            }
            None => false,
        }
    }

    pub fn group_names(&self) -> Vec<String> {
        self.groups
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|group| group.name.clone())
            .collect()
    }

    /// Rules of enabled groups, lowest priority number first.
    fn active_rules(&self) -> Vec<InvalidationRule> {
        self.groups
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|group| group.enabled)
            .flat_map(|group| group.rules.iter().cloned())
            .collect()
    }

    // == Local invalidation ==

    /// Invalidates `pattern` under the registered rules and broadcasts it.
    pub async fn invalidate(&self, pattern: &str) -> Result<InvalidationReport> {
        let started = Instant::now();
        let result = self.apply_pattern(pattern).await;
        self.observe(started, &result);
        let report = result?;
        self.publish(EVENT_INVALIDATE_PATTERN, json!({ "pattern": pattern }));
        Ok(report)
    }

    /// Deletes every entry tagged `tag` and broadcasts it.
    pub async fn invalidate_tag(&self, tag: &str) -> Result<usize> {
        let started = Instant::now();
        let result = self.coordinator.invalidate_by_tag(tag).await;
        self.observe(started, &result);
        let removed = result?;
        self.publish(EVENT_INVALIDATE_TAG, json!({ "tag": tag }));
        Ok(removed)
    }

    /// Empties every backend and broadcasts it.
    pub async fn clear_all(&self) -> Result<()> {
        self.coordinator.clear(None).await?;
        self.publish(EVENT_CLEAR, json!({}));
        Ok(())
    }

    fn observe<T>(&self, started: Instant, result: &Result<T>) {
        if let Some(monitor) = self.coordinator.monitor() {
            let latency_ms = started.elapsed().as_secs_f64() * 1000.0;
            monitor.record_operation(Operation::Invalidate, ALL_BACKENDS, result.is_ok(), latency_ms);
        }
    }

    fn publish(&self, event_type: &str, payload: serde_json::Value) {
        let event = InvalidationEvent::new(event_type, payload);
        if let Err(err) = self.bus.publish(&event) {
            warn!(event_type, error = %err, "Failed to broadcast invalidation");
        }
    }

    // == Remote invalidation ==

    pub fn subscribe(&self) -> Option<Box<dyn EventSubscription>> {
        self.bus.subscribe()
    }

    /// Replays an event published by another instance, without re-broadcasting.
    pub async fn apply_remote(&self, event: &InvalidationEvent) -> Result<()> {
        debug!(event_type = %event.event_type, "Applying remote invalidation");
        match event.event_type.as_str() {
            EVENT_INVALIDATE_PATTERN => {
                let pattern = payload_str(event, "pattern")?;
                self.apply_pattern(pattern).await?;
            }
            EVENT_INVALIDATE_TAG => {
                let tag = payload_str(event, "tag")?;
                self.coordinator.invalidate_by_tag(tag).await?;
            }
            EVENT_CLEAR => self.coordinator.clear(None).await?,
            other => debug!(event_type = other, "Ignoring unknown invalidation event"),
        }
        Ok(())
    }

    // == Rule evaluation ==

    /// Depth-first walk from `pattern` through cascade dependencies.
    ///
    /// Each pattern is processed once. A pattern that reappears among its
    /// own ancestors is a cycle and is recorded; one reached again through
    /// a sibling branch is skipped quietly. When no rule fires for a
    /// pattern, its matching entries are deleted.
    async fn apply_pattern(&self, pattern: &str) -> Result<InvalidationReport> {
        let rules = self.active_rules();
        let mut report = InvalidationReport::default();
        let mut visited = HashSet::new();
        // Patterns from the root down to the one being processed
        let mut ancestry: Vec<String> = Vec::new();
        let mut pending = vec![(pattern.to_string(), 0)];

        while let Some((current, depth)) = pending.pop() {
            ancestry.truncate(depth);
            if ancestry.contains(&current) {
                let cycle = CacheError::CycleDetected(current.clone());
                warn!(error = %cycle, "Skipping cyclic dependency");
                report.cycles.push(current);
                continue;
            }
            if !visited.insert(current.clone()) {
                debug!(pattern = %current, "Pattern already processed");
                continue;
            }
            ancestry.push(current.clone());

            let target = KeyPattern::parse(&current)?;
            let matches = self.coordinator.matching_keys(&target).await?;
            let fired: Vec<&InvalidationRule> = rules.iter().filter(|rule| rule.fires_for(&current)).collect();
            report.visited.push(current);

            if fired.is_empty() {
                report.removed += self.clear_matches(&matches, None).await?;
                continue;
            }

            for rule in fired {
                match &rule.action {
                    InvalidationAction::Clear => {
                        report.removed += self.clear_matches(&matches, Some(rule)).await?;
                    }
                    InvalidationAction::MarkInvalid => {
                        report.marked_stale += self.annotate_matches(&matches, rule, &Annotation::MarkStale).await?;
                    }
                    InvalidationAction::Tag(tags) => {
                        let annotation = Annotation::AddTags(tags.clone());
                        report.tagged += self.annotate_matches(&matches, rule, &annotation).await?;
                    }
                    InvalidationAction::Cascade => {
                        report.removed += self.clear_matches(&matches, Some(rule)).await?;
                        // Reversed so the first dependency is processed first
                        pending.extend(rule.dependencies.iter().rev().map(|dep| (dep.clone(), depth + 1)));
                    }
                }
            }
        }

        info!(
            pattern,
            removed = report.removed,
            marked_stale = report.marked_stale,
            tagged = report.tagged,
            cycles = report.cycles.len(),
            "Invalidation complete"
        );
        Ok(report)
    }

    async fn passes_condition(&self, backend: &str, key: &str, rule: Option<&InvalidationRule>) -> Result<bool> {
        match rule {
            Some(rule) if rule.is_conditional() => {
                let entry = self.coordinator.peek(key, Some(backend)).await?;
                Ok(entry.is_some_and(|entry| rule.applies_to(&entry)))
            }
            _ => Ok(true),
        }
    }

    async fn clear_matches(&self, matches: &[(String, String)], rule: Option<&InvalidationRule>) -> Result<usize> {
        let mut removed = 0;
        for (backend, key) in matches {
            if self.passes_condition(backend, key, rule).await? && self.coordinator.delete(key, Some(backend)).await? {
                removed += 1;
            }
        }
        Ok(removed)
    }

    async fn annotate_matches(
        &self,
        matches: &[(String, String)],
        rule: &InvalidationRule,
        annotation: &Annotation,
    ) -> Result<usize> {
        let mut annotated = 0;
        for (backend, key) in matches {
            if self.passes_condition(backend, key, Some(rule)).await?
                && self.coordinator.annotate(key, backend, annotation).await?
            {
                annotated += 1;
            }
        }
        Ok(annotated)
    }
}

fn payload_str<'a>(event: &'a InvalidationEvent, field: &str) -> Result<&'a str> {
    event.payload.get(field).and_then(|v| v.as_str()).ok_or_else(|| {
        CacheError::InvalidRequest(format!("'{}' event is missing '{}'", event.event_type, field))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{Capacity, MemoryBackend};
    use crate::cache::SetOptions;
    use crate::monitoring::Monitor;
    use serde_json::json;
    use std::time::Duration;

    fn engine() -> InvalidationEngine {
        let coordinator = CacheCoordinator::builder()
            .backend(MemoryBackend::new("memory", Capacity::entries(100), Duration::from_secs(60)))
            .build()
            .unwrap();
        InvalidationEngine::local(Arc::new(coordinator))
    }

    async fn seed(engine: &InvalidationEngine, keys: &[&str]) {
        for key in keys {
            engine
                .coordinator()
                .set(key, &json!({"key": key}), SetOptions::new())
                .await
                .unwrap();
        }
    }

    #[tokio::test]
    async fn test_default_action_clears_matches() {
        let engine = engine();
        seed(&engine, &["user:1", "user:2", "post:1"]).await;

        let report = engine.invalidate("user:*").await.unwrap();
        assert_eq!(report.removed, 2);

        let coordinator = engine.coordinator();
        assert!(!coordinator.has("user:1", None).await.unwrap());
        assert!(!coordinator.has("user:2", None).await.unwrap());
        assert!(coordinator.has("post:1", None).await.unwrap());
    }

    #[tokio::test]
    async fn test_mark_invalid_keeps_entry() {
        let engine = engine();
        seed(&engine, &["user:1"]).await;
        engine.add_group(
            RuleGroup::new("users", 1)
                .rule(InvalidationRule::new("user:*", InvalidationAction::MarkInvalid).unwrap()),
        );

        let report = engine.invalidate("user:*").await.unwrap();
        assert_eq!(report.marked_stale, 1);
        assert_eq!(report.removed, 0);

        let entry = engine.coordinator().peek("user:1", None).await.unwrap().unwrap();
        assert!(entry.is_stale());
    }

    #[tokio::test]
    async fn test_tag_action() {
        let engine = engine();
        seed(&engine, &["post:1"]).await;
        engine.add_group(RuleGroup::new("posts", 1).rule(
            InvalidationRule::new("post:*", InvalidationAction::Tag(vec!["review".into()])).unwrap(),
        ));

        let report = engine.invalidate("post:1").await.unwrap();
        assert_eq!(report.tagged, 1);

        let entry = engine.coordinator().peek("post:1", None).await.unwrap().unwrap();
        assert!(entry.tags.contains("review"));
    }

    #[tokio::test]
    async fn test_cascade_follows_dependencies() {
        let engine = engine();
        seed(&engine, &["user:1", "session:1", "feed:1", "other:1"]).await;
        engine.add_group(RuleGroup::new("users", 1).rule(
            InvalidationRule::new("user:*", InvalidationAction::Cascade)
                .unwrap()
                .depends_on(["session:*", "feed:*"]),
        ));

        let report = engine.invalidate("user:*").await.unwrap();
        assert_eq!(report.removed, 3);
        assert_eq!(report.visited, vec!["user:*", "session:*", "feed:*"]);
        assert!(engine.coordinator().has("other:1", None).await.unwrap());
    }

    #[tokio::test]
    async fn test_cycle_is_reported_not_fatal() {
        let engine = engine();
        seed(&engine, &["a:1", "b:1"]).await;
        engine.add_group(
            RuleGroup::new("loop", 1)
                .rule(
                    InvalidationRule::new("a:*", InvalidationAction::Cascade)
                        .unwrap()
                        .depends_on(["b:*"]),
                )
                .rule(
                    InvalidationRule::new("b:*", InvalidationAction::Cascade)
                        .unwrap()
                        .depends_on(["a:*"]),
                ),
        );

        let report = engine.invalidate("a:*").await.unwrap();
        assert_eq!(report.removed, 2);
        assert_eq!(report.cycles, vec!["a:*"]);
    }

    #[tokio::test]
    async fn test_shared_dependency_is_not_a_cycle() {
        let engine = engine();
        seed(&engine, &["a:1", "b:1", "c:1", "d:1"]).await;
        let cascade = |pattern: &str, deps: &[&str]| {
            InvalidationRule::new(pattern, InvalidationAction::Cascade)
                .unwrap()
                .depends_on(deps.iter().copied())
        };
        engine.add_group(
            RuleGroup::new("diamond", 1)
                .rule(cascade("a:*", &["b:*", "c:*"]))
                .rule(cascade("b:*", &["d:*"]))
                .rule(cascade("c:*", &["d:*"])),
        );

        let report = engine.invalidate("a:*").await.unwrap();
        assert!(report.cycles.is_empty());
        assert_eq!(report.visited, vec!["a:*", "b:*", "d:*", "c:*"]);
        assert_eq!(report.removed, 4);
    }

    #[tokio::test]
    async fn test_invalidations_are_monitored() {
        let monitor = Arc::new(Monitor::default());
        let coordinator = CacheCoordinator::builder()
            .backend(MemoryBackend::new("memory", Capacity::entries(100), Duration::from_secs(60)))
            .monitor(monitor.clone())
            .build()
            .unwrap();
        let engine = InvalidationEngine::local(Arc::new(coordinator));
        seed(&engine, &["user:1"]).await;

        engine.invalidate("user:*").await.unwrap();
        engine.invalidate_tag("missing").await.unwrap();
        assert!(engine.invalidate("re:(").await.is_err());

        let report = monitor.generate_report();
        assert_eq!(report.operations.get(&Operation::Invalidate), Some(&3));
        assert_eq!(report.backends[ALL_BACKENDS].errors, 1);
    }

    #[tokio::test]
    async fn test_condition_limits_rule() {
        let engine = engine();
        let coordinator = engine.coordinator().clone();
        coordinator.set("user:1", &json!({"role": "admin"}), SetOptions::new()).await.unwrap();
        coordinator.set("user:2", &json!({"role": "guest"}), SetOptions::new()).await.unwrap();
        engine.add_group(RuleGroup::new("admins", 1).rule(
            InvalidationRule::new("user:*", InvalidationAction::Clear)
                .unwrap()
                .when(|entry| entry.value["role"] == "admin"),
        ));

        let report = engine.invalidate("user:*").await.unwrap();
        assert_eq!(report.removed, 1);
        assert!(!coordinator.has("user:1", None).await.unwrap());
        assert!(coordinator.has("user:2", None).await.unwrap());
    }

    #[tokio::test]
    async fn test_disabled_group_is_skipped() {
        let engine = engine();
        seed(&engine, &["user:1"]).await;
        engine.add_group(
            RuleGroup::new("users", 1)
                .rule(InvalidationRule::new("user:*", InvalidationAction::MarkInvalid).unwrap()),
        );
        assert!(engine.set_group_enabled("users", false));

        let report = engine.invalidate("user:*").await.unwrap();
        assert_eq!(report.removed, 1);
        assert_eq!(report.marked_stale, 0);
    }

    #[tokio::test]
    async fn test_group_priority_order() {
        let engine = engine();
        engine.add_group(RuleGroup::new("third", 10));
        engine.add_group(RuleGroup::new("first", 1));
        engine.add_group(RuleGroup::new("second", 5));
        assert_eq!(engine.group_names(), vec!["first", "second", "third"]);

        assert!(engine.remove_group("second"));
        assert!(!engine.remove_group("second"));
    }

    #[tokio::test]
    async fn test_apply_remote_events() {
        let engine = engine();
        seed(&engine, &["user:1", "post:1"]).await;

        let event = InvalidationEvent::new(EVENT_INVALIDATE_PATTERN, json!({"pattern": "user:*"}));
        engine.apply_remote(&event).await.unwrap();
        assert!(!engine.coordinator().has("user:1", None).await.unwrap());

        let event = InvalidationEvent::new(EVENT_CLEAR, json!({}));
        engine.apply_remote(&event).await.unwrap();
        assert_eq!(engine.coordinator().size(None).await.unwrap(), 0);

        let malformed = InvalidationEvent::new(EVENT_INVALIDATE_TAG, json!({}));
        assert!(matches!(
            engine.apply_remote(&malformed).await,
            Err(CacheError::InvalidRequest(_))
        ));
    }
}
