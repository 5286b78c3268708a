//! Transactional hash map.

use crate::error::CoreResult;
use crate::map::changes::{self, Displaced, MapChanges};
use crate::map::policy::{PlainValues, ValuePolicy};
use crate::memory::{
    CreatorMaintainer, LayerCreator, LayerMaintainer, LayerProducer, TransactionalMemory,
};
use crate::types::{LayerKey, ObjectId};
use crate::version::next_object_id;
use std::borrow::Borrow;
use std::collections::{hash_map, HashMap};
use std::fmt;
use std::hash::Hash;
use std::marker::PhantomData;
use std::sync::Arc;
use tracing::trace;

/// A hash map whose writes are isolated per transaction.
///
/// The committed entries live in an immutable, shared base. Each transaction
/// records its writes in a [`MapChanges`] layer; reads overlay the layer on
/// the base. Merging produces a new map with a fresh id, or a clone of `self`
/// when nothing changed.
///
/// With [`ProducerValues`](super::ProducerValues) the values are themselves
/// transactional and are merged recursively.
pub struct TransactionalMap<K, V, P = PlainValues> {
    id: ObjectId,
    base: Arc<HashMap<K, V>>,
    _policy: PhantomData<fn() -> P>,
}

impl<K, V, P> Clone for TransactionalMap<K, V, P> {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            base: Arc::clone(&self.base),
            _policy: PhantomData,
        }
    }
}

impl<K: fmt::Debug, V: fmt::Debug, P> fmt::Debug for TransactionalMap<K, V, P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransactionalMap")
            .field("id", &self.id)
            .field("base", &self.base)
            .finish()
    }
}

impl<K, V, P> TransactionalMap<K, V, P>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
    P: ValuePolicy<V>,
{
    /// Creates an empty map.
    #[must_use]
    pub fn new() -> Self {
        Self::from_map(HashMap::new())
    }

    /// Creates a map whose committed entries are `entries`.
    #[must_use]
    pub fn from_map(entries: HashMap<K, V>) -> Self {
        Self {
            id: next_object_id(),
            base: Arc::new(entries),
            _policy: PhantomData,
        }
    }

    /// Returns the committed entries.
    #[must_use]
    pub fn base(&self) -> &HashMap<K, V> {
        &self.base
    }

    /// Returns true if both handles refer to the same snapshot.
    #[must_use]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        self.id == other.id && Arc::ptr_eq(&self.base, &other.base)
    }

    /// Returns the number of entries visible in `memory`.
    #[must_use]
    pub fn len(&self, memory: &TransactionalMemory) -> usize {
        memory
            .get_layer_if_exists(self)
            .map_or(self.base.len(), MapChanges::len)
    }

    /// Returns true if no entry is visible in `memory`.
    #[must_use]
    pub fn is_empty(&self, memory: &TransactionalMemory) -> bool {
        self.len(memory) == 0
    }

    /// Returns the value visible for `key`.
    #[must_use]
    pub fn get<'a, Q>(&'a self, memory: &'a TransactionalMemory, key: &Q) -> Option<&'a V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        match memory.get_layer_if_exists(self) {
            Some(changes) => changes.get(key),
            None => self.base.get(key),
        }
    }

    /// Returns true if `key` is visible.
    #[must_use]
    pub fn contains_key<Q>(&self, memory: &TransactionalMemory, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.get(memory, key).is_some()
    }

    /// Returns true if some visible entry holds `value`.
    #[must_use]
    pub fn contains_value(&self, memory: &TransactionalMemory, value: &V) -> bool
    where
        V: PartialEq,
    {
        self.values(memory).any(|v| v == value)
    }

    /// Iterates the visible entries.
    pub fn iter<'a>(&'a self, memory: &'a TransactionalMemory) -> Iter<'a, K, V> {
        match memory.get_layer_if_exists(self) {
            Some(changes) => Iter::Layered(changes.iter()),
            None => Iter::Base(self.base.iter()),
        }
    }

    /// Iterates the visible keys.
    pub fn keys<'a>(&'a self, memory: &'a TransactionalMemory) -> impl Iterator<Item = &'a K> {
        self.iter(memory).map(|(k, _)| k)
    }

    /// Iterates the visible values.
    pub fn values<'a>(&'a self, memory: &'a TransactionalMemory) -> impl Iterator<Item = &'a V> {
        self.iter(memory).map(|(_, v)| v)
    }

    /// Copies the visible entries into a plain map.
    #[must_use]
    pub fn to_hash_map(&self, memory: &TransactionalMemory) -> HashMap<K, V> {
        self.iter(memory)
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    /// Writes an entry, returning the previously visible value.
    ///
    /// # Errors
    ///
    /// Fails when no layer can be opened.
    pub fn put(&self, memory: &mut TransactionalMemory, key: K, value: V) -> CoreResult<Option<V>> {
        let committed = self.base.get(&key);
        let replacement = P::NESTED.then(|| value.clone());
        let displaced = memory.get_or_create_layer(self)?.put(key, value);
        Ok(self.release_displaced(memory, displaced, &[committed, replacement.as_ref()]))
    }

    /// Writes every entry of `entries`.
    ///
    /// # Errors
    ///
    /// Fails when no layer can be opened.
    pub fn put_all<I>(&self, memory: &mut TransactionalMemory, entries: I) -> CoreResult<()>
    where
        I: IntoIterator<Item = (K, V)>,
    {
        for (key, value) in entries {
            self.put(memory, key, value)?;
        }
        Ok(())
    }

    /// Removes an entry, returning its value.
    ///
    /// Nothing is written when the key is not visible.
    ///
    /// # Errors
    ///
    /// Fails when no layer can be opened.
    pub fn remove<Q>(&self, memory: &mut TransactionalMemory, key: &Q) -> CoreResult<Option<V>>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        if !self.contains_key(memory, key) {
            return Ok(None);
        }
        let committed = self.base.get(key);
        let displaced = memory.get_or_create_layer(self)?.remove(key);
        Ok(self.release_displaced(memory, displaced, &[committed]))
    }

    /// Removes every entry.
    ///
    /// # Errors
    ///
    /// Fails when no layer can be opened.
    pub fn clear(&self, memory: &mut TransactionalMemory) -> CoreResult<()> {
        let written = memory.get_or_create_layer(self)?.clear();
        for value in &written {
            P::release_value(value, memory.maintainer_mut());
        }
        Ok(())
    }

    /// Keeps only the entries for which `keep` returns true and returns the
    /// number of removed entries.
    ///
    /// # Errors
    ///
    /// Fails when no layer can be opened.
    pub fn retain<F>(&self, memory: &mut TransactionalMemory, mut keep: F) -> CoreResult<usize>
    where
        F: FnMut(&K, &V) -> bool,
    {
        let doomed: Vec<K> = self
            .iter(memory)
            .filter(|(k, v)| !keep(k, v))
            .map(|(k, _)| k.clone())
            .collect();
        if doomed.is_empty() {
            return Ok(0);
        }
        for key in &doomed {
            self.remove(memory, key)?;
        }
        Ok(doomed.len())
    }

    /// Drops the layers of a value written earlier in this transaction once it
    /// left the map, unless it is still one of `kept`.
    fn release_displaced(
        &self,
        memory: &mut TransactionalMemory,
        displaced: Displaced<V>,
        kept: &[Option<&V>],
    ) -> Option<V> {
        if let Displaced::Written(value) = &displaced {
            let referenced = kept.iter().flatten().any(|k| P::is_same(value, k));
            if P::NESTED && !referenced {
                trace!(map = %self.id, "releasing displaced nested value");
                P::release_value(value, memory.maintainer_mut());
            }
        }
        displaced.into_visible()
    }

    fn from_merged(entries: HashMap<K, V>) -> Self {
        Self::from_map(entries)
    }

    fn merge_base(&self, maintainer: &mut LayerMaintainer) -> CoreResult<Self> {
        if !P::NESTED {
            return Ok(self.clone());
        }
        let mut modified = Vec::new();
        for (key, value) in self.base.iter() {
            let copy = P::merge_value(value, maintainer)?;
            if !P::is_same(value, &copy) {
                modified.push((key.clone(), copy));
            }
        }
        if modified.is_empty() {
            return Ok(self.clone());
        }
        let mut entries = (*self.base).clone();
        entries.extend(modified);
        Ok(Self::from_merged(entries))
    }
}

impl<K, V, P> Default for TransactionalMap<K, V, P>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
    P: ValuePolicy<V>,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V, P> FromIterator<(K, V)> for TransactionalMap<K, V, P>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
    P: ValuePolicy<V>,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self::from_map(iter.into_iter().collect())
    }
}

impl<K, V, P> LayerCreator for TransactionalMap<K, V, P>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
    P: ValuePolicy<V>,
{
    type Layer = MapChanges<K, V>;

    fn id(&self) -> ObjectId {
        self.id
    }

    fn create_layer(&self) -> MapChanges<K, V> {
        MapChanges::new(Arc::clone(&self.base))
    }

    fn as_creator_maintainer(&self) -> Option<&dyn CreatorMaintainer> {
        if P::NESTED {
            Some(self)
        } else {
            None
        }
    }
}

impl<K, V, P> CreatorMaintainer for TransactionalMap<K, V, P>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
    P: ValuePolicy<V>,
{
    fn maintained_creators(&self) -> Vec<LayerKey> {
        let mut keys = Vec::new();
        for value in self.base.values() {
            P::collect_keys(value, &mut keys);
        }
        keys
    }
}

impl<K, V, P> LayerProducer for TransactionalMap<K, V, P>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
    P: ValuePolicy<V>,
{
    type Snapshot = Self;

    fn create_copy_with_merged_layer(
        &self,
        layer: Option<&MapChanges<K, V>>,
        maintainer: &mut LayerMaintainer,
    ) -> CoreResult<Self> {
        match layer {
            Some(changes) => Ok(changes
                .merge::<P>(maintainer)?
                .map_or_else(|| self.clone(), Self::from_merged)),
            None => self.merge_base(maintainer),
        }
    }

    fn remove_layer(&self, maintainer: &mut LayerMaintainer) {
        if let Some(changes) = maintainer.remove_layer_if_exists(self) {
            changes.release_all::<P>(maintainer);
        }
        if P::NESTED {
            for value in self.base.values() {
                P::release_value(value, maintainer);
            }
        }
    }
}

/// Iterator over the visible entries of a [`TransactionalMap`].
pub enum Iter<'a, K, V> {
    /// No layer: the committed entries.
    Base(hash_map::Iter<'a, K, V>),
    /// Layer overlaid on the committed entries.
    Layered(changes::Iter<'a, K, V>),
}

impl<'a, K: Eq + Hash, V> Iterator for Iter<'a, K, V> {
    type Item = (&'a K, &'a V);

    fn next(&mut self) -> Option<Self::Item> {
        match self {
            Iter::Base(iter) => iter.next(),
            Iter::Layered(iter) => iter.next(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CoreError;
    use crate::map::ProducerValues;
    use crate::memory::LayerState;
    use crate::primitive::TransactionalFlag;
    use crate::types::TransactionId;

    type Map = TransactionalMap<String, i32>;
    type Nested = TransactionalMap<String, Map, ProducerValues>;

    fn memory() -> TransactionalMemory {
        TransactionalMemory::new(TransactionId::new(1))
    }

    fn map(entries: &[(&str, i32)]) -> Map {
        entries.iter().map(|(k, v)| (k.to_string(), *v)).collect()
    }

    #[test]
    fn writes_are_invisible_to_other_transactions() {
        let map = map(&[("a", 1)]);
        let mut t1 = memory();
        let t2 = memory();

        map.put(&mut t1, "b".into(), 2).unwrap();
        map.remove(&mut t1, "a").unwrap();

        assert_eq!(map.get(&t1, "b"), Some(&2));
        assert!(!map.contains_key(&t1, "a"));
        assert_eq!(map.get(&t2, "a"), Some(&1));
        assert_eq!(map.len(&t2), 1);
        assert!(!map.contains_key(&t2, "b"));
    }

    #[test]
    fn put_and_remove_sequence() {
        let map = map(&[("a", 1), ("b", 2)]);
        let mut memory = memory();

        assert_eq!(map.put(&mut memory, "a".into(), 10).unwrap(), Some(1));
        assert_eq!(map.put(&mut memory, "c".into(), 3).unwrap(), None);
        assert_eq!(map.remove(&mut memory, "b").unwrap(), Some(2));
        assert_eq!(map.remove(&mut memory, "b").unwrap(), None);
        assert_eq!(map.len(&memory), 2);
        assert!(map.contains_value(&memory, &10));
        assert!(!map.contains_value(&memory, &2));

        let expected: HashMap<String, i32> =
            [("a".to_string(), 10), ("c".to_string(), 3)].into_iter().collect();
        assert_eq!(map.to_hash_map(&memory), expected);
    }

    #[test]
    fn removing_missing_key_opens_no_layer() {
        let map = map(&[]);
        let mut memory = memory();
        assert_eq!(map.remove(&mut memory, "ghost").unwrap(), None);
        assert_eq!(memory.maintainer().layer_state(&map), None);
    }

    #[test]
    fn merge_creates_new_snapshot() {
        let map = map(&[("a", 1)]);
        let mut memory = memory();
        map.put(&mut memory, "b".into(), 2).unwrap();

        let merged = memory.get_state_copy_with_committed_changes(&map).unwrap();
        assert_ne!(merged.id(), map.id());
        assert_eq!(merged.base().len(), 2);
        assert_eq!(map.base().len(), 1);
        assert_eq!(memory.maintainer().layer_state(&map), Some(LayerState::Discarded));
    }

    #[test]
    fn merged_layer_cannot_be_merged_again() {
        let map = map(&[]);
        let mut memory = memory();
        map.put(&mut memory, "a".into(), 1).unwrap();

        let first = memory.get_state_copy_with_committed_changes(&map).unwrap();
        assert_eq!(first.base().len(), 1);
        assert!(matches!(
            memory.get_state_copy_with_committed_changes(&map),
            Err(CoreError::InvalidOperation { .. })
        ));
    }

    #[test]
    fn noop_merge_returns_same_snapshot() {
        let map = map(&[("a", 1)]);
        let mut memory = memory();
        assert!(memory
            .get_state_copy_with_committed_changes(&map)
            .unwrap()
            .ptr_eq(&map));

        map.put(&mut memory, "x".into(), 1).unwrap();
        map.remove(&mut memory, "x").unwrap();
        assert!(memory
            .get_state_copy_with_committed_changes(&map)
            .unwrap()
            .ptr_eq(&map));
    }

    #[test]
    fn retain_and_clear() {
        let map = map(&[("a", 1), ("b", 2), ("c", 3)]);
        let mut memory = memory();

        assert_eq!(map.retain(&mut memory, |_, v| v % 2 == 1).unwrap(), 1);
        let mut keys: Vec<_> = map.keys(&memory).cloned().collect();
        keys.sort();
        assert_eq!(keys, vec!["a", "c"]);

        map.put_all(&mut memory, [("d".to_string(), 4), ("e".to_string(), 5)])
            .unwrap();
        assert_eq!(map.len(&memory), 4);

        map.clear(&mut memory).unwrap();
        assert!(map.is_empty(&memory));
        assert_eq!(map.iter(&memory).count(), 0);
    }

    #[test]
    fn nested_maps_merge_recursively() {
        let inner = map(&[("x", 1)]);
        let outer: Nested = [("inner".to_string(), inner.clone())].into_iter().collect();
        let mut memory = memory();

        // Writing to a nested map does not touch the outer layer.
        let handle = outer.get(&memory, "inner").cloned().unwrap();
        handle.put(&mut memory, "y".into(), 2).unwrap();
        assert!(memory.get_layer_if_exists(&outer).is_none());

        let merged = memory.get_state_copy_with_committed_changes(&outer).unwrap();
        assert!(!merged.ptr_eq(&outer));
        let merged_inner = &merged.base()["inner"];
        assert_eq!(merged_inner.base().len(), 2);
        assert!(memory.maintainer().stale_layers().is_empty());
        memory.commit().unwrap();
    }

    #[test]
    fn removing_nested_value_releases_its_layer() {
        let inner = map(&[]);
        let outer: Nested = [("inner".to_string(), inner.clone())].into_iter().collect();
        let mut memory = memory();

        inner.put(&mut memory, "k".into(), 1).unwrap();
        outer.remove(&mut memory, "inner").unwrap();
        memory.get_state_copy_with_committed_changes(&outer).unwrap();

        assert_eq!(memory.maintainer().layer_state(&inner), None);
        memory.commit().unwrap();
    }

    #[test]
    fn removing_value_added_in_transaction_releases_its_layer() {
        let outer = Nested::new();
        let created = map(&[]);
        let mut memory = memory();

        outer.put(&mut memory, "w".into(), created.clone()).unwrap();
        created.put(&mut memory, "k".into(), 1).unwrap();
        outer.remove(&mut memory, "w").unwrap();
        assert_eq!(memory.maintainer().layer_state(&created), None);

        let merged = memory.get_state_copy_with_committed_changes(&outer).unwrap();
        assert!(merged.base().is_empty());
        memory.commit().unwrap();
    }

    #[test]
    fn overwriting_written_value_releases_its_layer() {
        let outer = Nested::new();
        let first = map(&[]);
        let mut memory = memory();

        outer.put(&mut memory, "w".into(), first.clone()).unwrap();
        first.put(&mut memory, "k".into(), 1).unwrap();
        outer.put(&mut memory, "w".into(), map(&[])).unwrap();
        assert_eq!(memory.maintainer().layer_state(&first), None);

        let merged = memory.get_state_copy_with_committed_changes(&outer).unwrap();
        assert!(merged.base()["w"].base().is_empty());
        memory.commit().unwrap();
    }

    #[test]
    fn rewriting_same_value_keeps_its_layer() {
        let outer = Nested::new();
        let inner = map(&[]);
        let mut memory = memory();

        outer.put(&mut memory, "w".into(), inner.clone()).unwrap();
        inner.put(&mut memory, "k".into(), 1).unwrap();
        outer.put(&mut memory, "w".into(), inner.clone()).unwrap();
        assert_eq!(memory.maintainer().layer_state(&inner), Some(LayerState::Alive));

        let merged = memory.get_state_copy_with_committed_changes(&outer).unwrap();
        assert_eq!(merged.base()["w"].base().get("k"), Some(&1));
        memory.commit().unwrap();
    }

    #[test]
    fn retain_releases_dropped_written_values() {
        let outer = Nested::new();
        let inner = map(&[]);
        let mut memory = memory();

        outer.put(&mut memory, "w".into(), inner.clone()).unwrap();
        inner.put(&mut memory, "k".into(), 1).unwrap();
        assert_eq!(outer.retain(&mut memory, |_, _| false).unwrap(), 1);

        memory.get_state_copy_with_committed_changes(&outer).unwrap();
        memory.commit().unwrap();
    }

    #[test]
    fn remove_layer_is_transitive() {
        let inner = map(&[]);
        let outer: Nested = [("inner".to_string(), inner.clone())].into_iter().collect();
        let mut memory = memory();
        inner.put(&mut memory, "k".into(), 1).unwrap();
        outer.put(&mut memory, "other".into(), map(&[])).unwrap();

        outer.remove_layer(memory.maintainer_mut());
        assert!(memory.maintainer().stale_layers().is_empty());
    }

    #[test]
    fn nested_map_exposes_maintained_creators() {
        let inner = map(&[]);
        let outer: Nested = [("inner".to_string(), inner.clone())].into_iter().collect();
        let plain = map(&[]);

        let keys = outer
            .as_creator_maintainer()
            .map(|m| m.maintained_creators())
            .unwrap();
        assert_eq!(keys, vec![inner.layer_key()]);
        assert!(plain.as_creator_maintainer().is_none());
    }

    #[test]
    fn suppressed_map_reads_base() {
        let map = map(&[("a", 1)]);
        let mut memory = memory();
        map.put(&mut memory, "a".into(), 2).unwrap();

        let seen = memory
            .suppress_layers_for(&map, |m| map.get(m, "a").copied())
            .unwrap();
        assert_eq!(seen, Some(1));

        let write = memory
            .suppress_layers_for(&map, |m| map.put(m, "a".into(), 3).map(|_| ()))
            .unwrap();
        assert!(matches!(write, Err(CoreError::LayerSuppressed { .. })));
    }

    #[test]
    fn flags_as_values() {
        let flag = TransactionalFlag::new(false);
        let flags: TransactionalMap<u32, TransactionalFlag, PlainValues> =
            [(1, flag.clone())].into_iter().collect();
        let mut memory = memory();
        flag.set_to_true(&mut memory).unwrap();

        let stored = flags.get(&memory, &1).unwrap();
        assert!(stored.get(&memory));
        assert!(memory.get_state_copy_with_committed_changes(&flag).unwrap());
    }
}
