//! Topic Trie for pattern matching
//!
//! A trie (prefix tree) keyed by topic level. Patterns may contain
//! wildcards (+ and #); lookups walk the trie with a concrete topic.
//!
//! Performance notes:
//! - Uses iterator-based traversal to avoid Vec allocations on insert
//! - Uses compact_str for memory-efficient topic level storage
//! - Lookups stop at the first match

use std::ops::ControlFlow;

use ahash::AHashMap;
use compact_str::CompactString;
use smallvec::SmallVec;

/// Node in the topic trie
#[derive(Debug, Default)]
struct TrieNode {
    /// A pattern ends at this node
    terminal: bool,
    /// Children indexed by topic level (CompactString avoids heap allocation for short strings)
    children: AHashMap<CompactString, TrieNode>,
    /// Single-level wildcard (+) child
    single_wildcard: Option<Box<TrieNode>>,
    /// A pattern ends with a multi-level wildcard (#) here
    multi_wildcard: bool,
}

/// Set of topic patterns
#[derive(Debug, Default)]
pub struct TopicTrie {
    root: TrieNode,
}

impl TopicTrie {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a pattern; adding it twice has no further effect
    pub fn insert(&mut self, pattern: &str) {
        let mut node = &mut self.root;
        let mut levels = pattern.split('/').peekable();

        while let Some(level) = levels.next() {
            let is_last = levels.peek().is_none();

            if level == "#" {
                node.multi_wildcard = true;
                return;
            } else if level == "+" {
                node = node.single_wildcard.get_or_insert_with(Box::default);
            } else {
                node = node.children.entry(CompactString::new(level)).or_default();
            }

            if is_last {
                node.terminal = true;
                return;
            }
        }
    }

    /// Whether at least one pattern matches `topic`
    ///
    /// Uses SmallVec to avoid heap allocation for typical topic depths (up to 8 levels)
    pub fn has_match(&self, topic: &str) -> bool {
        let levels: SmallVec<[&str; 8]> = topic.split('/').collect();
        Self::walk(&self.root, &levels).is_break()
    }

    fn walk(node: &TrieNode, levels: &[&str]) -> ControlFlow<()> {
        if node.multi_wildcard {
            return ControlFlow::Break(());
        }

        let Some((level, rest)) = levels.split_first() else {
            return if node.terminal {
                ControlFlow::Break(())
            } else {
                ControlFlow::Continue(())
            };
        };

        if let Some(ref child) = node.single_wildcard {
            Self::walk(child, rest)?;
        }

        if let Some(child) = node.children.get(*level) {
            Self::walk(child, rest)?;
        }

        ControlFlow::Continue(())
    }
}
