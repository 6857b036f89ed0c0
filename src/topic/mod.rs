//! Topic matching
//!
//! The persistence layer only consumes topic matching: it needs to know
//! whether a topic is covered by a pattern. That capability sits behind the
//! [`TopicMatcher`] trait so that any MQTT-compliant matcher can be plugged
//! in. Two implementations are provided:
//! - `TrieMatcher` (default) - topic trie, cheap for many patterns
//! - `FilterListMatcher` - linear scan with `topic_matches_filter`
//!
//! Matching rules: `/` separates levels, `+` matches exactly one level and
//! `#` matches zero or more trailing levels. A leading `$` is an ordinary
//! character, so `#` also matches `$SYS/...`.

mod trie;
pub mod validation;

pub use trie::TopicTrie;
pub use validation::{literal_prefix, topic_matches_filter, validate_topic_filter};

use std::sync::Arc;

/// Matches topics against a set of patterns
pub trait TopicMatcher: Send + Sync {
    /// Add a pattern (may contain wildcards)
    fn add(&mut self, pattern: &str);

    /// Whether any added pattern matches the topic
    fn matches(&self, topic: &str) -> bool;
}

/// Creates a fresh, empty matcher
pub type MatcherFactory = Arc<dyn Fn() -> Box<dyn TopicMatcher> + Send + Sync>;

/// Factory for the default trie matcher
pub fn default_matcher() -> MatcherFactory {
    Arc::new(|| -> Box<dyn TopicMatcher> { Box::new(TrieMatcher::new()) })
}

/// Matcher backed by a topic trie
#[derive(Debug, Default)]
pub struct TrieMatcher {
    trie: TopicTrie,
}

impl TrieMatcher {
    pub fn new() -> Self {
        Self::default()
    }
}

impl TopicMatcher for TrieMatcher {
    fn add(&mut self, pattern: &str) {
        self.trie.insert(pattern);
    }

    fn matches(&self, topic: &str) -> bool {
        self.trie.has_match(topic)
    }
}

/// Matcher that checks every pattern in turn
#[derive(Debug, Default, Clone)]
pub struct FilterListMatcher {
    patterns: Vec<String>,
}

impl TopicMatcher for FilterListMatcher {
    fn add(&mut self, pattern: &str) {
        self.patterns.push(pattern.to_string());
    }

    fn matches(&self, topic: &str) -> bool {
        self.patterns
            .iter()
            .any(|pattern| topic_matches_filter(topic, pattern))
    }
}
