//! Compressed prefix tree.

use crate::error::{CoreError, CoreResult};
use crate::trie::node::{common_prefix_len, TrieNode};
use std::collections::BTreeSet;

/// A compressed prefix tree mapping words to values.
///
/// The trie is not transactional; it is built once and read by upper layers.
/// A word may be bound to several values. Inserting a word that is a prefix
/// of an existing one (or the other way round) keeps both words.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Trie<T> {
    root: TrieNode<T>,
    size: usize,
}

impl<T> Default for Trie<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Trie<T> {
    /// Creates an empty trie.
    #[must_use]
    pub fn new() -> Self {
        Self {
            root: TrieNode::default(),
            size: 0,
        }
    }

    /// Returns the root node.
    #[must_use]
    pub fn root(&self) -> &TrieNode<T> {
        &self.root
    }

    /// Returns the number of inserted (word, value) pairs.
    #[must_use]
    pub fn len(&self) -> usize {
        self.size
    }

    /// Returns true if nothing was inserted.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.size == 0
    }

    /// Binds `value` to `word`.
    pub fn insert(&mut self, word: &str, value: T) {
        self.size += 1;
        let mut node = &mut self.root;
        let mut rest = word;

        loop {
            let Some(first) = rest.chars().next() else {
                node.push_value(value);
                return;
            };
            let pos = match node.edge_position(first) {
                Ok(pos) => pos,
                Err(_) => {
                    node.insert_edge(rest, TrieNode::with_value(value));
                    return;
                }
            };

            let label_len = node.label(pos).len();
            let common = common_prefix_len(node.label(pos), rest);
            if common == label_len {
                rest = &rest[common..];
                node = node.child_mut(pos);
                continue;
            }

            // The word diverges inside the edge label.
            let middle = node.split_edge(pos, common);
            let remaining = &rest[common..];
            if remaining.is_empty() {
                middle.push_value(value);
            } else {
                middle.insert_edge(remaining, TrieNode::with_value(value));
            }
            return;
        }
    }

    fn word_node(&self, word: &str) -> Option<&TrieNode<T>> {
        let mut node = &self.root;
        let mut rest = word;
        while let Some(first) = rest.chars().next() {
            let (label, child) = node.edge(first)?;
            rest = rest.strip_prefix(label)?;
            node = child;
        }
        node.is_end_of_word().then_some(node)
    }

    /// Finds the node below which every word starting with `prefix` lives,
    /// together with the path leading to it.
    fn prefix_root(&self, prefix: &str) -> Option<(String, &TrieNode<T>)> {
        let mut node = &self.root;
        let mut path = String::new();
        let mut rest = prefix;
        while let Some(first) = rest.chars().next() {
            let (label, child) = node.edge(first)?;
            if let Some(after) = rest.strip_prefix(label) {
                path.push_str(label);
                rest = after;
                node = child;
            } else if label.starts_with(rest) {
                // The prefix ends inside this edge.
                break;
            } else {
                return None;
            }
        }
        Some((path, node))
    }

    /// Returns every value bound to `word`.
    #[must_use]
    pub fn get_values_for_word(&self, word: &str) -> &[T] {
        self.word_node(word).map_or(&[], TrieNode::values)
    }

    /// Returns the single value bound to `word`.
    ///
    /// # Errors
    ///
    /// Fails with [`CoreError::AmbiguousValue`] when several values are bound.
    pub fn get_value_for_word(&self, word: &str) -> CoreResult<Option<&T>> {
        match self.get_values_for_word(word) {
            [] => Ok(None),
            [single] => Ok(Some(single)),
            values => Err(CoreError::AmbiguousValue {
                word: word.to_owned(),
                count: values.len(),
            }),
        }
    }

    /// Returns true if `word` was inserted.
    #[must_use]
    pub fn contains_word(&self, word: &str) -> bool {
        self.word_node(word).is_some()
    }

    /// Returns every inserted word in lexicographic order.
    #[must_use]
    pub fn words(&self) -> Vec<String> {
        self.word_to_values_entries()
            .into_iter()
            .map(|(word, _)| word)
            .collect()
    }

    /// Returns true if some inserted word starts with `prefix`.
    #[must_use]
    pub fn contains_word_starting_with(&self, prefix: &str) -> bool {
        self.prefix_root(prefix)
            .is_some_and(|(_, node)| node.is_end_of_word() || !node.is_leaf())
    }

    /// Returns every inserted word starting with `prefix`, prefix included.
    #[must_use]
    pub fn get_words_starting_with(&self, prefix: &str) -> Vec<String> {
        let Some((mut path, node)) = self.prefix_root(prefix) else {
            return Vec::new();
        };
        let mut words = Vec::new();
        node.walk(&mut path, &mut |word, node| {
            if !word.starts_with(prefix) {
                return !prefix.starts_with(word);
            }
            if node.is_end_of_word() {
                words.push(word.to_owned());
            }
            node.is_leaf()
        });
        words
    }

    /// Returns the distinct segments that follow `prefix` in inserted words
    /// up to the first of `breaking` characters. Words without a breaking
    /// character are skipped.
    #[must_use]
    pub fn get_words_between(&self, prefix: &str, breaking: &[char]) -> Vec<String> {
        self.words_between(prefix, breaking, false)
    }

    /// Like [`get_words_between`](Self::get_words_between), but words without
    /// a breaking character contribute their whole remainder.
    #[must_use]
    pub fn get_words_between_or_starting_with(&self, prefix: &str, breaking: &[char]) -> Vec<String> {
        self.words_between(prefix, breaking, true)
    }

    fn words_between(&self, prefix: &str, breaking: &[char], include_unbroken: bool) -> Vec<String> {
        let Some((mut path, node)) = self.prefix_root(prefix) else {
            return Vec::new();
        };
        let mut segments = BTreeSet::new();
        node.walk(&mut path, &mut |word, node| {
            if !word.starts_with(prefix) {
                return !prefix.starts_with(word);
            }
            let tail = &word[prefix.len()..];
            if let Some(end) = tail.find(|c| breaking.contains(&c)) {
                segments.insert(tail[..end].to_owned());
                return true;
            }
            if include_unbroken && node.is_end_of_word() && !tail.is_empty() {
                segments.insert(tail.to_owned());
            }
            node.is_leaf()
        });
        segments.into_iter().collect()
    }

    /// Returns every word with its values, in lexicographic order.
    #[must_use]
    pub fn word_to_values_entries(&self) -> Vec<(String, &[T])> {
        let mut entries = Vec::new();
        self.root.walk(&mut String::new(), &mut |word, node| {
            if node.is_end_of_word() {
                entries.push((word.to_owned(), node.values()));
            }
            false
        });
        entries
    }
}

impl<S: AsRef<str>, T> FromIterator<(S, T)> for Trie<T> {
    fn from_iter<I: IntoIterator<Item = (S, T)>>(iter: I) -> Self {
        let mut trie = Trie::new();
        for (word, value) in iter {
            trie.insert(word.as_ref(), value);
        }
        trie
    }
}
