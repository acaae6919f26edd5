//! Key Pattern Module
//!
//! Glob and regular-expression key matching.
//!
//! - `user:*`, `post:?`: glob, `*` any run of characters, `?` exactly one
//! - `re:^user:\d+$` or `/^user:\d+$/`: regular expression, unanchored
//! - anything else: exact key

use std::fmt;

use regex::Regex;

use crate::error::{CacheError, Result};

#[derive(Debug, Clone)]
pub struct KeyPattern {
    source: String,
    regex: Regex,
}

impl KeyPattern {
    pub fn parse(pattern: &str) -> Result<Self> {
        if pattern.is_empty() {
            return Err(CacheError::InvalidPattern("pattern cannot be empty".to_string()));
        }

        let expr = if let Some(expr) = pattern.strip_prefix("re:") {
            expr.to_string()
        } else if pattern.len() > 2 && pattern.starts_with('/') && pattern.ends_with('/') {
            pattern[1..pattern.len() - 1].to_string()
        } else {
            glob_to_regex(pattern)
        };

        let regex = Regex::new(&expr)
            .map_err(|err| CacheError::InvalidPattern(format!("{}: {}", pattern, err)))?;
        Ok(Self {
            source: pattern.to_string(),
            regex,
        })
    }

    pub fn matches(&self, key: &str) -> bool {
        self.regex.is_match(key)
    }

    pub fn as_str(&self) -> &str {
        &self.source
    }
}

impl PartialEq for KeyPattern {
    fn eq(&self, other: &Self) -> bool {
        self.source == other.source
    }
}

impl Eq for KeyPattern {}

impl fmt::Display for KeyPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

fn glob_to_regex(glob: &str) -> String {
    let mut expr = String::with_capacity(glob.len() + 8);
    expr.push('^');
    let mut literal = [0u8; 4];
    for ch in glob.chars() {
        match ch {
            '*' => expr.push_str(".*"),
            '?' => expr.push('.'),
            other => expr.push_str(&regex::escape(other.encode_utf8(&mut literal))),
        }
    }
    expr.push('$');
    expr
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_glob_star() {
        let pattern = KeyPattern::parse("user:*").unwrap();
        assert!(pattern.matches("user:1"));
        assert!(pattern.matches("user:"));
        assert!(pattern.matches("user:1:profile"));
        assert!(!pattern.matches("post:1"));
        assert!(!pattern.matches("xuser:1"));
    }

    #[test]
    fn test_glob_question_mark() {
        let pattern = KeyPattern::parse("post:?").unwrap();
        assert!(pattern.matches("post:1"));
        assert!(!pattern.matches("post:12"));
    }

    #[test]
    fn test_exact_key_escapes_metacharacters() {
        let pattern = KeyPattern::parse("a.b+c").unwrap();
        assert!(pattern.matches("a.b+c"));
        assert!(!pattern.matches("axb+c"));
        assert!(!pattern.matches("a.b+c.d"));
    }

    #[test]
    fn test_regex_forms() {
        let prefixed = KeyPattern::parse(r"re:^user:\d+$").unwrap();
        assert!(prefixed.matches("user:42"));
        assert!(!prefixed.matches("user:abc"));

        let slashed = KeyPattern::parse(r"/:\d+$/").unwrap();
        assert!(slashed.matches("post:7"));
        assert!(!slashed.matches("post:x"));
    }

    #[test]
    fn test_invalid_patterns() {
        assert!(matches!(KeyPattern::parse(""), Err(CacheError::InvalidPattern(_))));
        assert!(matches!(KeyPattern::parse("re:("), Err(CacheError::InvalidPattern(_))));
    }

    #[test]
    fn test_display_is_source() {
        assert_eq!(KeyPattern::parse("user:*").unwrap().to_string(), "user:*");
    }
}
