//! Invalidation Rules Module

use std::fmt;
use std::sync::Arc;

use serde::Serialize;

use super::KeyPattern;
use crate::cache::CacheEntry;
use crate::error::Result;

/// What a rule does to the entries it matches.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", content = "tags", rename_all = "kebab-case")]
pub enum InvalidationAction {
    /// Delete matching entries
    Clear,
    /// Keep matching entries but flag them stale
    MarkInvalid,
    /// Add tags to matching entries
    Tag(Vec<String>),
    /// Delete matching entries, then invalidate every dependency pattern
    Cascade,
}

pub type EntryCondition = Arc<dyn Fn(&CacheEntry) -> bool + Send + Sync>;

#[derive(Clone)]
pub struct InvalidationRule {
    pub pattern: KeyPattern,
    pub action: InvalidationAction,
    pub dependencies: Vec<String>,
    condition: Option<EntryCondition>,
}

impl fmt::Debug for InvalidationRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InvalidationRule")
            .field("pattern", &self.pattern.as_str())
            .field("action", &self.action)
            .field("dependencies", &self.dependencies)
            .field("conditional", &self.condition.is_some())
            .finish()
    }
}

impl InvalidationRule {
    pub fn new(pattern: &str, action: InvalidationAction) -> Result<Self> {
        Ok(Self {
            pattern: KeyPattern::parse(pattern)?,
            action,
            dependencies: Vec::new(),
            condition: None,
        })
    }

    /// Patterns invalidated after this rule's own targets when it cascades.
    pub fn depends_on<I, S>(mut self, patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.dependencies.extend(patterns.into_iter().map(Into::into));
        self
    }

    /// Restricts the rule to entries satisfying `condition`.
    pub fn when<C>(mut self, condition: C) -> Self
    where
        C: Fn(&CacheEntry) -> bool + Send + Sync + 'static,
    {
        self.condition = Some(Arc::new(condition));
        self
    }

    pub fn is_conditional(&self) -> bool {
        self.condition.is_some()
    }

    /// Whether this rule fires for an invalidation request of `request`.
    ///
    /// The request string is matched against the rule pattern, so a rule on
    /// `user:*` fires for both `user:*` and `user:7`.
    pub fn fires_for(&self, request: &str) -> bool {
        self.pattern.as_str() == request || self.pattern.matches(request)
    }

    pub fn applies_to(&self, entry: &CacheEntry) -> bool {
        self.condition.as_ref().map_or(true, |condition| condition(entry))
    }
}

/// Named, prioritised set of rules. Lower priority numbers run first.
#[derive(Debug, Clone)]
pub struct RuleGroup {
    pub name: String,
    pub priority: u32,
    pub enabled: bool,
    pub rules: Vec<InvalidationRule>,
}

impl RuleGroup {
    pub fn new(name: impl Into<String>, priority: u32) -> Self {
        Self {
            name: name.into(),
            priority,
            enabled: true,
            rules: Vec::new(),
        }
    }

    pub fn rule(mut self, rule: InvalidationRule) -> Self {
        self.rules.push(rule);
        self
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::time::Duration;

    #[test]
    fn test_rule_fires_for_matching_requests() {
        let rule = InvalidationRule::new("user:*", InvalidationAction::Clear).unwrap();
        assert!(rule.fires_for("user:*"));
        assert!(rule.fires_for("user:7"));
        assert!(!rule.fires_for("post:1"));
    }

    #[test]
    fn test_condition() {
        let rule = InvalidationRule::new("user:*", InvalidationAction::MarkInvalid)
            .unwrap()
            .when(|entry| entry.value["role"] == "admin");
        assert!(rule.is_conditional());

        let admin = CacheEntry::new("user:1", json!({"role": "admin"}), Duration::from_secs(10)).unwrap();
        let guest = CacheEntry::new("user:2", json!({"role": "guest"}), Duration::from_secs(10)).unwrap();
        assert!(rule.applies_to(&admin));
        assert!(!rule.applies_to(&guest));
    }

    #[test]
    fn test_dependencies_and_groups() {
        let rule = InvalidationRule::new("user:*", InvalidationAction::Cascade)
            .unwrap()
            .depends_on(["session:*", "feed:*"]);
        assert_eq!(rule.dependencies, vec!["session:*", "feed:*"]);

        let group = RuleGroup::new("users", 10).rule(rule).disabled();
        assert!(!group.enabled);
        assert_eq!(group.rules.len(), 1);
    }

    #[test]
    fn test_invalid_rule_pattern() {
        assert!(InvalidationRule::new("re:[", InvalidationAction::Clear).is_err());
    }
}
