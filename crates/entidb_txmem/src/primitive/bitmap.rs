//! Sorted record id sets.

use crate::error::CoreResult;
use crate::memory::{LayerCreator, LayerMaintainer, LayerProducer, TransactionalMemory};
use crate::types::ObjectId;
use crate::version::next_object_id;
use std::cmp::Reverse;
use std::collections::{BTreeSet, BinaryHeap};
use std::fmt;
use std::iter::Copied;
use std::slice;
use std::sync::Arc;

/// An immutable, sorted set of distinct record ids.
///
/// Clones share storage.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct Bitmap {
    ids: Arc<[u32]>,
}

impl Bitmap {
    /// Creates an empty bitmap.
    #[must_use]
    pub fn new() -> Self {
        Self {
            ids: Arc::from(Vec::new()),
        }
    }

    /// Wraps ids that are already sorted and distinct.
    fn from_sorted(ids: Vec<u32>) -> Self {
        debug_assert!(ids.windows(2).all(|w| w[0] < w[1]));
        Self { ids: Arc::from(ids) }
    }

    /// Returns true if `id` is in the set.
    #[must_use]
    pub fn contains(&self, id: u32) -> bool {
        self.ids.binary_search(&id).is_ok()
    }

    /// Returns the number of ids.
    #[must_use]
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    /// Returns true if the set is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// Returns the ids in ascending order.
    #[must_use]
    pub fn as_slice(&self) -> &[u32] {
        &self.ids
    }

    /// Iterates the ids in ascending order.
    pub fn iter(&self) -> Copied<slice::Iter<'_, u32>> {
        self.ids.iter().copied()
    }

    /// Returns true if both bitmaps share storage.
    #[must_use]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.ids, &other.ids)
    }

    /// Computes the union of several bitmaps with a k-way merge.
    #[must_use]
    pub fn or<'a>(bitmaps: impl IntoIterator<Item = &'a Bitmap>) -> Bitmap {
        let sources: Vec<&[u32]> = bitmaps
            .into_iter()
            .map(Bitmap::as_slice)
            .filter(|ids| !ids.is_empty())
            .collect();
        match sources.as_slice() {
            [] => return Bitmap::new(),
            [single] => return Bitmap::from_sorted(single.to_vec()),
            _ => {}
        }

        let mut heap: BinaryHeap<Reverse<(u32, usize, usize)>> = sources
            .iter()
            .enumerate()
            .map(|(source, ids)| Reverse((ids[0], source, 0)))
            .collect();
        let mut merged = Vec::with_capacity(sources.iter().map(|s| s.len()).max().unwrap_or(0));
        while let Some(Reverse((id, source, pos))) = heap.pop() {
            if merged.last() != Some(&id) {
                merged.push(id);
            }
            if let Some(next) = sources[source].get(pos + 1) {
                heap.push(Reverse((*next, source, pos + 1)));
            }
        }
        Bitmap::from_sorted(merged)
    }
}

impl Default for Bitmap {
    fn default() -> Self {
        Self::new()
    }
}

impl FromIterator<u32> for Bitmap {
    fn from_iter<I: IntoIterator<Item = u32>>(iter: I) -> Self {
        let mut ids: Vec<u32> = iter.into_iter().collect();
        ids.sort_unstable();
        ids.dedup();
        Self::from_sorted(ids)
    }
}

impl From<&[u32]> for Bitmap {
    fn from(ids: &[u32]) -> Self {
        ids.iter().copied().collect()
    }
}

impl<'a> IntoIterator for &'a Bitmap {
    type Item = u32;
    type IntoIter = Copied<slice::Iter<'a, u32>>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

impl fmt::Debug for Bitmap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.ids.iter()).finish()
    }
}

/// Pending changes of a [`TransactionalBitmap`].
///
/// `inserted` never intersects the base and `removed` is a subset of it.
#[derive(Debug)]
pub struct BitmapChanges {
    base: Bitmap,
    inserted: BTreeSet<u32>,
    removed: BTreeSet<u32>,
}

impl BitmapChanges {
    fn new(base: Bitmap) -> Self {
        Self {
            base,
            inserted: BTreeSet::new(),
            removed: BTreeSet::new(),
        }
    }

    fn add(&mut self, id: u32) {
        if self.base.contains(id) {
            self.removed.remove(&id);
        } else {
            self.inserted.insert(id);
        }
    }

    fn remove(&mut self, id: u32) {
        if self.base.contains(id) {
            self.removed.insert(id);
        } else {
            self.inserted.remove(&id);
        }
    }

    fn contains(&self, id: u32) -> bool {
        self.inserted.contains(&id) || (self.base.contains(id) && !self.removed.contains(&id))
    }

    fn len(&self) -> usize {
        self.base.len() - self.removed.len() + self.inserted.len()
    }

    /// Returns true if the layer does not alter its base.
    #[must_use]
    pub fn is_noop(&self) -> bool {
        self.inserted.is_empty() && self.removed.is_empty()
    }

    fn merged(&self) -> Bitmap {
        if self.is_noop() {
            return self.base.clone();
        }
        let mut merged = Vec::with_capacity(self.len());
        let mut inserted = self.inserted.iter().copied().peekable();
        for id in self.base.iter().filter(|id| !self.removed.contains(id)) {
            while let Some(new) = inserted.next_if(|new| *new < id) {
                merged.push(new);
            }
            merged.push(id);
        }
        merged.extend(inserted);
        Bitmap::from_sorted(merged)
    }
}

/// A record id set whose writes are isolated per transaction.
///
/// Snapshot type is the bitmap itself: merging yields a new bitmap with a
/// fresh id, or a clone of `self` when nothing changed.
#[derive(Debug, Clone)]
pub struct TransactionalBitmap {
    id: ObjectId,
    base: Bitmap,
}

impl TransactionalBitmap {
    /// Creates a transactional bitmap over `base`.
    #[must_use]
    pub fn new(base: Bitmap) -> Self {
        Self {
            id: next_object_id(),
            base,
        }
    }

    /// Creates a transactional bitmap holding `ids`.
    #[must_use]
    pub fn from_ids(ids: &[u32]) -> Self {
        Self::new(Bitmap::from(ids))
    }

    /// Returns the committed ids.
    #[must_use]
    pub fn base(&self) -> &Bitmap {
        &self.base
    }

    /// Returns the ids visible in `memory`.
    #[must_use]
    pub fn resolve(&self, memory: &TransactionalMemory) -> Bitmap {
        memory
            .get_layer_if_exists(self)
            .map_or_else(|| self.base.clone(), BitmapChanges::merged)
    }

    /// Returns true if `id` is visible in `memory`.
    #[must_use]
    pub fn contains(&self, memory: &TransactionalMemory, id: u32) -> bool {
        memory
            .get_layer_if_exists(self)
            .map_or_else(|| self.base.contains(id), |changes| changes.contains(id))
    }

    /// Returns the number of ids visible in `memory`.
    #[must_use]
    pub fn len(&self, memory: &TransactionalMemory) -> usize {
        memory
            .get_layer_if_exists(self)
            .map_or(self.base.len(), BitmapChanges::len)
    }

    /// Returns true if no id is visible in `memory`.
    #[must_use]
    pub fn is_empty(&self, memory: &TransactionalMemory) -> bool {
        self.len(memory) == 0
    }

    /// Adds ids for the current transaction.
    ///
    /// # Errors
    ///
    /// Fails when no layer can be opened.
    pub fn add(&self, memory: &mut TransactionalMemory, ids: &[u32]) -> CoreResult<()> {
        let changes = memory.get_or_create_layer(self)?;
        ids.iter().for_each(|id| changes.add(*id));
        Ok(())
    }

    /// Removes ids for the current transaction.
    ///
    /// # Errors
    ///
    /// Fails when no layer can be opened.
    pub fn remove(&self, memory: &mut TransactionalMemory, ids: &[u32]) -> CoreResult<()> {
        let changes = memory.get_or_create_layer(self)?;
        ids.iter().for_each(|id| changes.remove(*id));
        Ok(())
    }

    /// Returns true if both handles refer to the same snapshot.
    #[must_use]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        self.id == other.id && self.base.ptr_eq(&other.base)
    }
}

impl LayerCreator for TransactionalBitmap {
    type Layer = BitmapChanges;

    fn id(&self) -> ObjectId {
        self.id
    }

    fn create_layer(&self) -> BitmapChanges {
        BitmapChanges::new(self.base.clone())
    }
}

impl LayerProducer for TransactionalBitmap {
    type Snapshot = TransactionalBitmap;

    fn create_copy_with_merged_layer(
        &self,
        layer: Option<&BitmapChanges>,
        _maintainer: &mut LayerMaintainer,
    ) -> CoreResult<TransactionalBitmap> {
        Ok(match layer {
            Some(changes) if !changes.is_noop() => TransactionalBitmap::new(changes.merged()),
            _ => self.clone(),
        })
    }

    fn remove_layer(&self, maintainer: &mut LayerMaintainer) {
        maintainer.remove_layer_if_exists(self);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::TransactionId;

    fn memory() -> TransactionalMemory {
        TransactionalMemory::new(TransactionId::new(1))
    }

    #[test]
    fn from_iter_sorts_and_dedups() {
        let bitmap: Bitmap = [5, 1, 5, 3].into_iter().collect();
        assert_eq!(bitmap.as_slice(), &[1, 3, 5]);
        assert!(bitmap.contains(3));
        assert!(!bitmap.contains(4));
    }

    #[test]
    fn or_merges_many() {
        let a = Bitmap::from(&[1, 4, 9][..]);
        let b = Bitmap::from(&[2, 4, 10][..]);
        let c = Bitmap::new();
        let d = Bitmap::from(&[0, 9][..]);
        assert_eq!(Bitmap::or([&a, &b, &c, &d]).as_slice(), &[0, 1, 2, 4, 9, 10]);
        assert!(Bitmap::or([&c]).is_empty());
        assert_eq!(Bitmap::or([&a]), a);
    }

    #[test]
    fn layered_add_and_remove() {
        let bitmap = TransactionalBitmap::from_ids(&[1, 2, 3]);
        let mut memory = memory();
        bitmap.add(&mut memory, &[5, 0]).unwrap();
        bitmap.remove(&mut memory, &[2, 5, 8]).unwrap();

        assert_eq!(bitmap.resolve(&memory).as_slice(), &[0, 1, 3]);
        assert_eq!(bitmap.len(&memory), 3);
        assert!(!bitmap.contains(&memory, 2));
        assert_eq!(bitmap.base().as_slice(), &[1, 2, 3]);
    }

    #[test]
    fn re_adding_removed_id_restores_base() {
        let bitmap = TransactionalBitmap::from_ids(&[4]);
        let mut memory = memory();
        bitmap.remove(&mut memory, &[4]).unwrap();
        assert!(bitmap.is_empty(&memory));
        bitmap.add(&mut memory, &[4]).unwrap();

        let merged = memory.get_state_copy_with_committed_changes(&bitmap).unwrap();
        assert!(merged.ptr_eq(&bitmap));
    }

    #[test]
    fn merge_produces_new_snapshot() {
        let bitmap = TransactionalBitmap::from_ids(&[10, 20]);
        let mut memory = memory();
        bitmap.add(&mut memory, &[15]).unwrap();

        let merged = memory.get_state_copy_with_committed_changes(&bitmap).unwrap();
        assert_ne!(merged.id(), bitmap.id());
        assert_eq!(merged.base().as_slice(), &[10, 15, 20]);
        memory.commit().unwrap();
    }
}
