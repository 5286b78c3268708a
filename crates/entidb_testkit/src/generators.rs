//! Property-based test generators using proptest.
//!
//! Provides strategies for operation sequences against transactional maps
//! and inverted indexes, together with reference models they can be checked
//! against.

use entidb_txmem::{CoreResult, InvertedIndex, TransactionalMap, TransactionalMemory};
use proptest::prelude::*;
use std::collections::{BTreeMap, BTreeSet, HashMap};

/// A single write against a `TransactionalMap<u16, u32>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MapOperation {
    /// Insert or overwrite a key.
    Put(u16, u32),
    /// Remove a key.
    Remove(u16),
    /// Remove every key.
    Clear,
}

impl MapOperation {
    /// Applies the operation inside a transaction.
    ///
    /// # Errors
    ///
    /// Propagates the map's error.
    pub fn apply(&self, map: &TransactionalMap<u16, u32>, memory: &mut TransactionalMemory) -> CoreResult<()> {
        match self {
            Self::Put(key, value) => map.put(memory, *key, *value).map(drop),
            Self::Remove(key) => map.remove(memory, key).map(drop),
            Self::Clear => map.clear(memory),
        }
    }

    /// Applies the operation to a plain `HashMap`.
    pub fn apply_to_model(&self, model: &mut HashMap<u16, u32>) {
        match self {
            Self::Put(key, value) => {
                model.insert(*key, *value);
            }
            Self::Remove(key) => {
                model.remove(key);
            }
            Self::Clear => model.clear(),
        }
    }
}

/// A single write against an `InvertedIndex<i32>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IndexOperation {
    /// Add record ids to a value's bucket.
    Add(i32, Vec<u32>),
    /// Remove record ids from a value's bucket.
    Remove(i32, Vec<u32>),
}

impl IndexOperation {
    /// Applies the operation inside a transaction.
    ///
    /// # Errors
    ///
    /// Propagates the index's error.
    pub fn apply(&self, index: &InvertedIndex<i32>, memory: &mut TransactionalMemory) -> CoreResult<()> {
        match self {
            Self::Add(value, ids) => index.add_record(memory, value, ids),
            Self::Remove(value, ids) => index.remove_record(memory, value, ids),
        }
    }

    /// Applies the operation to an ordered model of the buckets.
    pub fn apply_to_model(&self, model: &mut BTreeMap<i32, BTreeSet<u32>>) {
        match self {
            Self::Add(value, ids) => model.entry(*value).or_default().extend(ids.iter().copied()),
            Self::Remove(value, ids) => {
                if let Some(set) = model.get_mut(value) {
                    for id in ids {
                        set.remove(id);
                    }
                    if set.is_empty() {
                        model.remove(value);
                    }
                }
            }
        }
    }
}

/// Strategy for committed map contents.
pub fn map_entries_strategy() -> impl Strategy<Value = HashMap<u16, u32>> {
    prop::collection::hash_map(0u16..64, any::<u32>(), 0..32)
}

/// Strategy for map writes over a small key space, so keys collide often.
pub fn map_operation_strategy() -> impl Strategy<Value = MapOperation> {
    prop_oneof![
        6 => (0u16..64, any::<u32>()).prop_map(|(k, v)| MapOperation::Put(k, v)),
        3 => (0u16..64).prop_map(MapOperation::Remove),
        1 => Just(MapOperation::Clear),
    ]
}

/// Strategy for sequences of map writes.
pub fn map_operations_strategy(max_len: usize) -> impl Strategy<Value = Vec<MapOperation>> {
    prop::collection::vec(map_operation_strategy(), 0..max_len)
}

/// Strategy for index writes; record id lists are never empty.
pub fn index_operation_strategy() -> impl Strategy<Value = IndexOperation> {
    let ids = prop::collection::vec(0u32..128, 1..5);
    prop_oneof![
        2 => (-16i32..16, ids.clone()).prop_map(|(v, ids)| IndexOperation::Add(v, ids)),
        1 => (-16i32..16, ids).prop_map(|(v, ids)| IndexOperation::Remove(v, ids)),
    ]
}

/// Strategy for sequences of index writes.
pub fn index_operations_strategy(max_len: usize) -> impl Strategy<Value = Vec<IndexOperation>> {
    prop::collection::vec(index_operation_strategy(), 1..max_len.max(2))
}

/// Strategy for sets of words over a small alphabet, so words share prefixes.
pub fn word_set_strategy() -> impl Strategy<Value = BTreeSet<String>> {
    prop::collection::btree_set(
        prop::string::string_regex("[a-e]{1,8}").expect("Invalid regex"),
        0..48,
    )
}

/// Configuration for property tests.
#[derive(Debug, Clone)]
pub struct PropTestConfig {
    /// Number of test cases to run.
    pub cases: u32,
    /// Maximum shrink iterations.
    pub max_shrink_iters: u32,
}

impl Default for PropTestConfig {
    fn default() -> Self {
        Self {
            cases: 256,
            max_shrink_iters: 1000,
        }
    }
}

impl PropTestConfig {
    /// Creates a configuration for quick tests.
    #[must_use]
    pub fn quick() -> Self {
        Self {
            cases: 32,
            max_shrink_iters: 100,
        }
    }

    /// Creates a configuration for thorough tests.
    #[must_use]
    pub fn thorough() -> Self {
        Self {
            cases: 1024,
            max_shrink_iters: 10000,
        }
    }

    /// Converts to proptest config.
    #[must_use]
    pub fn to_proptest_config(&self) -> ProptestConfig {
        ProptestConfig {
            cases: self.cases,
            max_shrink_iters: self.max_shrink_iters,
            ..ProptestConfig::default()
        }
    }
}
