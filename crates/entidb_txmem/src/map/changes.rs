//! The diff layer of a transactional map.

use crate::error::CoreResult;
use crate::map::policy::ValuePolicy;
use crate::memory::LayerMaintainer;
use std::borrow::Borrow;
use std::collections::hash_map::{self, Entry};
use std::collections::{HashMap, HashSet};
use std::hash::Hash;
use std::sync::Arc;

/// Pending changes of a [`TransactionalMap`](super::TransactionalMap).
///
/// Invariants:
/// - `removed_keys` is a subset of the base keys,
/// - `removed_keys` and the keys of `created_or_modified` are disjoint,
/// - `created_key_count` counts the tracked keys absent from the base.
#[derive(Debug)]
pub struct MapChanges<K, V> {
    base: Arc<HashMap<K, V>>,
    removed_keys: HashSet<K>,
    created_or_modified: HashMap<K, V>,
    created_key_count: usize,
}

impl<K, V> MapChanges<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    pub(crate) fn new(base: Arc<HashMap<K, V>>) -> Self {
        Self {
            base,
            removed_keys: HashSet::new(),
            created_or_modified: HashMap::new(),
            created_key_count: 0,
        }
    }

    /// Returns the base this layer diverges from.
    #[must_use]
    pub fn base(&self) -> &HashMap<K, V> {
        &self.base
    }

    /// Returns the base keys removed in this layer.
    #[must_use]
    pub fn removed_keys(&self) -> &HashSet<K> {
        &self.removed_keys
    }

    /// Returns the entries written in this layer.
    #[must_use]
    pub fn created_or_modified(&self) -> &HashMap<K, V> {
        &self.created_or_modified
    }

    /// Returns the number of written keys absent from the base.
    #[must_use]
    pub fn created_key_count(&self) -> usize {
        self.created_key_count
    }

    /// Returns true if this layer alters its base.
    #[must_use]
    pub fn has_changes(&self) -> bool {
        !self.removed_keys.is_empty() || !self.created_or_modified.is_empty()
    }

    /// Returns the number of visible entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.base.len() - self.removed_keys.len() + self.created_key_count
    }

    /// Returns true if no entry is visible.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns the visible value for `key`.
    pub fn get<Q>(&self, key: &Q) -> Option<&V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        if self.removed_keys.contains(key) {
            return None;
        }
        self.created_or_modified
            .get(key)
            .or_else(|| self.base.get(key))
    }

    /// Returns true if `key` is visible.
    pub fn contains_key<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.get(key).is_some()
    }

    /// Iterates the visible entries, written ones first.
    pub fn iter(&self) -> Iter<'_, K, V> {
        Iter {
            written: self.created_or_modified.iter(),
            base: self.base.iter(),
            changes: self,
        }
    }

    /// Writes `value`, returning what it displaced.
    ///
    /// Reviving a removed base key turns it into a modified key and displaces
    /// nothing; the base value is released when the layer is merged.
    pub(crate) fn put(&mut self, key: K, value: V) -> Displaced<V> {
        if self.removed_keys.remove(&key) {
            self.created_or_modified.insert(key, value);
            return Displaced::Nothing;
        }

        match self.created_or_modified.entry(key) {
            Entry::Occupied(mut entry) => Displaced::Written(entry.insert(value)),
            Entry::Vacant(entry) => {
                let previous = self.base.get(entry.key()).cloned();
                if previous.is_none() {
                    self.created_key_count += 1;
                }
                entry.insert(value);
                previous.map_or(Displaced::Nothing, Displaced::Committed)
            }
        }
    }

    pub(crate) fn remove<Q>(&mut self, key: &Q) -> Displaced<V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        if self.removed_keys.contains(key) {
            return Displaced::Nothing;
        }
        if let Some((key, value)) = self.created_or_modified.remove_entry(key) {
            if self.base.contains_key::<K>(&key) {
                self.removed_keys.insert(key);
            } else {
                self.created_key_count -= 1;
            }
            return Displaced::Written(value);
        }
        match self.base.get_key_value(key) {
            Some((key, value)) => {
                self.removed_keys.insert(key.clone());
                Displaced::Committed(value.clone())
            }
            None => Displaced::Nothing,
        }
    }

    /// Removes every entry, returning the values written in this layer.
    pub(crate) fn clear(&mut self) -> Vec<V> {
        self.removed_keys = self.base.keys().cloned().collect();
        self.created_key_count = 0;
        self.created_or_modified.drain().map(|(_, v)| v).collect()
    }

    /// Builds the merged entries, or `None` when the merge is a no-op.
    pub(crate) fn merge<P: ValuePolicy<V>>(
        &self,
        maintainer: &mut LayerMaintainer,
    ) -> CoreResult<Option<HashMap<K, V>>> {
        let mut changed = self.has_changes();
        let mut merged = HashMap::with_capacity(self.len());

        for (key, value) in self.base.iter() {
            if self.removed_keys.contains(key) || self.created_or_modified.contains_key(key) {
                continue;
            }
            let copy = P::merge_value(value, maintainer)?;
            changed |= !P::is_same(value, &copy);
            merged.insert(key.clone(), copy);
        }
        for (key, value) in &self.created_or_modified {
            merged.insert(key.clone(), P::merge_value(value, maintainer)?);
        }

        if P::NESTED {
            // Base values that did not survive into the snapshot lose their layers.
            for (key, value) in self.base.iter() {
                let survived = merged.get(key).is_some_and(|m| P::is_same(value, m));
                if !survived {
                    P::release_value(value, maintainer);
                }
            }
        }

        Ok(changed.then_some(merged))
    }

    /// Drops the layers of every value this layer references.
    pub(crate) fn release_all<P: ValuePolicy<V>>(&self, maintainer: &mut LayerMaintainer) {
        for value in self.created_or_modified.values() {
            P::release_value(value, maintainer);
        }
    }
}

/// Value pushed out of a [`MapChanges`] by a write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Displaced<V> {
    /// No value was visible.
    Nothing,
    /// The committed value; it is released when the layer is merged.
    Committed(V),
    /// A value written earlier in this layer.
    Written(V),
}

impl<V> Displaced<V> {
    /// Returns the value that was visible before the write.
    pub(crate) fn into_visible(self) -> Option<V> {
        match self {
            Self::Nothing => None,
            Self::Committed(value) | Self::Written(value) => Some(value),
        }
    }
}

/// Iterator over the visible entries of a [`MapChanges`].
pub struct Iter<'a, K, V> {
    written: hash_map::Iter<'a, K, V>,
    base: hash_map::Iter<'a, K, V>,
    changes: &'a MapChanges<K, V>,
}

impl<'a, K, V> Iterator for Iter<'a, K, V>
where
    K: Eq + Hash,
{
    type Item = (&'a K, &'a V);

    fn next(&mut self) -> Option<Self::Item> {
        if let Some(entry) = self.written.next() {
            return Some(entry);
        }
        let changes = self.changes;
        self.base.find(|(key, _)| {
            !changes.removed_keys.contains(*key) && !changes.created_or_modified.contains_key(*key)
        })
    }
}
