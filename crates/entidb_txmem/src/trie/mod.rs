//! Compressed prefix tree used for word and prefix lookups.

mod node;
mod tree;

pub use node::TrieNode;
pub use tree::Trie;
