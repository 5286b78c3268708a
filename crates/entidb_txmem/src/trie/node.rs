//! Trie nodes.

/// A node of a compressed prefix tree.
///
/// Edges are kept in two parallel arrays sorted by the first character of
/// their label, so the outgoing edge for a character is found by binary
/// search. A node carrying values terminates a word.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrieNode<T> {
    labels: Vec<String>,
    children: Vec<TrieNode<T>>,
    values: Vec<T>,
}

impl<T> Default for TrieNode<T> {
    fn default() -> Self {
        Self {
            labels: Vec::new(),
            children: Vec::new(),
            values: Vec::new(),
        }
    }
}

impl<T> TrieNode<T> {
    pub(crate) fn with_value(value: T) -> Self {
        Self {
            values: vec![value],
            ..Self::default()
        }
    }

    /// Returns the values of the word ending here.
    #[must_use]
    pub fn values(&self) -> &[T] {
        &self.values
    }

    /// Returns true if a word ends at this node.
    #[must_use]
    pub fn is_end_of_word(&self) -> bool {
        !self.values.is_empty()
    }

    /// Returns true if the node has no outgoing edge.
    #[must_use]
    pub fn is_leaf(&self) -> bool {
        self.children.is_empty()
    }

    /// Returns the outgoing edge labels in order.
    #[must_use]
    pub fn edge_labels(&self) -> &[String] {
        &self.labels
    }

    /// Returns the children in edge order.
    #[must_use]
    pub fn children(&self) -> &[TrieNode<T>] {
        &self.children
    }

    /// Returns the edge and child reached through character `first`.
    #[must_use]
    pub fn edge(&self, first: char) -> Option<(&str, &TrieNode<T>)> {
        self.edge_position(first)
            .ok()
            .map(|pos| (self.labels[pos].as_str(), &self.children[pos]))
    }

    pub(crate) fn edge_position(&self, first: char) -> Result<usize, usize> {
        self.labels
            .binary_search_by(|label| label.chars().next().cmp(&Some(first)))
    }

    pub(crate) fn label(&self, pos: usize) -> &str {
        &self.labels[pos]
    }

    pub(crate) fn child_mut(&mut self, pos: usize) -> &mut TrieNode<T> {
        &mut self.children[pos]
    }

    pub(crate) fn push_value(&mut self, value: T) {
        self.values.push(value);
    }

    /// Adds an edge whose first character is not yet used by this node.
    pub(crate) fn insert_edge(&mut self, label: &str, child: TrieNode<T>) {
        let first = label.chars().next();
        let pos = self
            .labels
            .partition_point(|existing| existing.chars().next() < first);
        self.labels.insert(pos, label.to_owned());
        self.children.insert(pos, child);
    }

    /// Splits the edge at `pos` after `at` bytes, inserting an empty node
    /// between the head and the tail of the label.
    pub(crate) fn split_edge(&mut self, pos: usize, at: usize) -> &mut TrieNode<T> {
        let label = std::mem::take(&mut self.labels[pos]);
        let (head, tail) = label.split_at(at);
        let tail_child = std::mem::take(&mut self.children[pos]);

        let mut middle = TrieNode::default();
        middle.insert_edge(tail, tail_child);
        self.labels[pos] = head.to_owned();
        self.children[pos] = middle;
        &mut self.children[pos]
    }

    /// Depth-first walk in edge order. `visit` receives the path from the
    /// walk origin and returns true to stop descending below the node.
    pub(crate) fn walk<'a, F>(&'a self, path: &mut String, visit: &mut F)
    where
        F: FnMut(&str, &'a TrieNode<T>) -> bool,
    {
        if visit(path, self) {
            return;
        }
        for (label, child) in self.labels.iter().zip(&self.children) {
            let len = path.len();
            path.push_str(label);
            child.walk(path, visit);
            path.truncate(len);
        }
    }
}

/// Byte length of the longest common prefix of `a` and `b`.
pub(crate) fn common_prefix_len(a: &str, b: &str) -> usize {
    a.char_indices()
        .zip(b.chars())
        .find(|((_, ca), cb)| ca != cb)
        .map_or_else(|| a.len().min(b.len()), |((idx, _), _)| idx)
}
