// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Cache strategies: ordered rules mapping a key to TTL, priority and an
//! optional size cap. The first matching rule wins.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::priority::Priority;

type KeyPredicate = Arc<dyn Fn(&str) -> bool + Send + Sync>;

/// A named caching rule.
#[derive(Clone)]
pub struct CacheStrategy {
    pub name: String,
    predicate: KeyPredicate,
    /// `None` falls back to the configured default TTL.
    pub ttl: Option<Duration>,
    pub priority: Priority,
    /// Payloads larger than this (serialized JSON bytes) are not cached.
    pub max_size_bytes: Option<usize>,
}

impl CacheStrategy {
    pub fn new(
        name: impl Into<String>,
        predicate: impl Fn(&str) -> bool + Send + Sync + 'static,
    ) -> Self {
        Self {
            name: name.into(),
            predicate: Arc::new(predicate),
            ttl: None,
            priority: Priority::Medium,
            max_size_bytes: None,
        }
    }

    #[must_use]
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }

    #[must_use]
    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    #[must_use]
    pub fn with_max_size(mut self, bytes: usize) -> Self {
        self.max_size_bytes = Some(bytes);
        self
    }

    #[must_use]
    pub fn matches(&self, key: &str) -> bool {
        (self.predicate)(key)
    }

    /// True when a payload of `size` bytes is within this strategy's cap.
    #[must_use]
    pub fn accepts_size(&self, size: usize) -> bool {
        self.max_size_bytes.map_or(true, |max| size <= max)
    }
}

impl fmt::Debug for CacheStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheStrategy")
            .field("name", &self.name)
            .field("ttl", &self.ttl)
            .field("priority", &self.priority)
            .field("max_size_bytes", &self.max_size_bytes)
            .finish_non_exhaustive()
    }
}

/// Ordered strategy list.
#[derive(Debug, Clone)]
pub struct StrategyList {
    strategies: Vec<CacheStrategy>,
}

impl StrategyList {
    /// No rules: only `set` calls with an explicit TTL are cached.
    #[must_use]
    pub fn empty() -> Self {
        Self { strategies: Vec::new() }
    }

    /// Append a rule. Earlier rules take precedence.
    pub fn push(&mut self, strategy: CacheStrategy) -> &mut Self {
        self.strategies.push(strategy);
        self
    }

    #[must_use]
    pub fn resolve(&self, key: &str) -> Option<&CacheStrategy> {
        self.strategies.iter().find(|s| s.matches(key))
    }

    pub fn len(&self) -> usize {
        self.strategies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.strategies.is_empty()
    }
}

impl Default for StrategyList {
    /// `static` (24h, high), `api/` (5 min, medium, 1 MiB), `search` (1 min, low, 256 KiB).
    fn default() -> Self {
        let mut list = Self::empty();
        list.push(
            CacheStrategy::new("static", |key| key.contains("/static/") || key.contains("config"))
                .with_ttl(Duration::from_secs(24 * 60 * 60))
                .with_priority(Priority::High),
        )
        .push(
            CacheStrategy::new("api", |key| key.starts_with("api/"))
                .with_ttl(Duration::from_secs(5 * 60))
                .with_priority(Priority::Medium)
                .with_max_size(1024 * 1024),
        )
        .push(
            CacheStrategy::new("search", |key| key.contains("search"))
                .with_ttl(Duration::from_secs(60))
                .with_priority(Priority::Low)
                .with_max_size(256 * 1024),
        );
        list
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_rules_resolve() {
        let list = StrategyList::default();
        assert_eq!(list.len(), 3);

        assert_eq!(list.resolve("/static/logo.svg").unwrap().name, "static");
        assert_eq!(list.resolve("app-config").unwrap().name, "static");
        assert_eq!(list.resolve("api/vendors").unwrap().name, "api");
        assert_eq!(list.resolve("vendor-search?q=acme").unwrap().name, "search");
        assert!(list.resolve("unrelated").is_none());
    }

    #[test]
    fn test_first_match_wins() {
        // Matches both "api" and "search"
        let list = StrategyList::default();
        let strategy = list.resolve("api/search?q=x").unwrap();
        assert_eq!(strategy.name, "api");
        assert_eq!(strategy.priority, Priority::Medium);
    }

    #[test]
    fn test_custom_list() {
        let mut list = StrategyList::empty();
        assert!(list.is_empty());
        list.push(CacheStrategy::new("everything", |_| true));

        let strategy = list.resolve("anything").unwrap();
        assert_eq!(strategy.ttl, None);
        assert!(strategy.accepts_size(usize::MAX));
    }

    #[test]
    fn test_size_cap() {
        let strategy = CacheStrategy::new("small", |_| true).with_max_size(10);
        assert!(strategy.accepts_size(10));
        assert!(!strategy.accepts_size(11));
    }
}
