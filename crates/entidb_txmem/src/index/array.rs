//! Transactional sorted array of buckets.

use crate::error::{CoreError, CoreResult};
use crate::index::bucket::{BucketView, ValueToRecordBitmap};
use crate::memory::{
    CreatorMaintainer, LayerCreator, LayerMaintainer, LayerProducer, TransactionalMemory,
};
use crate::primitive::Bitmap;
use crate::types::{LayerKey, ObjectId};
use crate::version::next_object_id;
use std::cmp::Ordering;
use std::collections::BTreeSet;
use std::fmt::{self, Debug};
use std::sync::Arc;

/// Total order over bucket values.
pub type Comparator<T> = Arc<dyn Fn(&T, &T) -> Ordering + Send + Sync>;

/// How range bounds treat the bound values themselves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum BoundsHandling {
    Inclusive,
    Exclusive,
}

/// Bucket created within a transaction.
#[derive(Debug, Clone)]
pub(crate) struct CreatedBucket<T> {
    value: T,
    record_ids: BTreeSet<u32>,
}

impl<T: Clone> CreatedBucket<T> {
    fn bitmap(&self) -> Bitmap {
        self.record_ids.iter().copied().collect()
    }

    fn to_bucket(&self) -> ValueToRecordBitmap<T> {
        ValueToRecordBitmap::new(self.value.clone(), self.bitmap())
    }
}

/// Pending structural changes of a [`TransactionalBucketArray`].
///
/// Record changes of committed buckets live in the buckets' own bitmap
/// layers; this layer only tracks removed base positions and buckets whose
/// value did not exist in the base.
pub struct BucketArrayChanges<T> {
    removed: BTreeSet<usize>,
    created: Vec<CreatedBucket<T>>,
}

impl<T> BucketArrayChanges<T> {
    fn new() -> Self {
        Self {
            removed: BTreeSet::new(),
            created: Vec::new(),
        }
    }

    /// Returns true if the layer alters no bucket.
    #[must_use]
    pub fn is_noop(&self) -> bool {
        self.removed.is_empty() && self.created.is_empty()
    }

    fn search_created(&self, value: &T, comparator: &dyn Fn(&T, &T) -> Ordering) -> Result<usize, usize> {
        self.created
            .binary_search_by(|bucket| comparator(&bucket.value, value))
    }

    fn add_created(&mut self, value: T, ids: &[u32], comparator: &dyn Fn(&T, &T) -> Ordering) {
        match self.search_created(&value, comparator) {
            Ok(pos) => self.created[pos].record_ids.extend(ids.iter().copied()),
            Err(pos) => self.created.insert(
                pos,
                CreatedBucket {
                    value,
                    record_ids: ids.iter().copied().collect(),
                },
            ),
        }
    }

    fn remove_created(&mut self, value: &T, ids: &[u32], comparator: &dyn Fn(&T, &T) -> Ordering) {
        if let Ok(pos) = self.search_created(value, comparator) {
            let bucket = &mut self.created[pos];
            for id in ids {
                bucket.record_ids.remove(id);
            }
            if bucket.record_ids.is_empty() {
                self.created.remove(pos);
            }
        }
    }
}

impl<T: Debug> Debug for BucketArrayChanges<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BucketArrayChanges")
            .field("removed", &self.removed)
            .field("created", &self.created)
            .finish()
    }
}

/// A bucket visible in a transaction: committed or created in its layer.
pub(crate) enum Slot<'a, T> {
    Base(&'a ValueToRecordBitmap<T>),
    Created(&'a CreatedBucket<T>),
}

impl<'a, T: Clone> Slot<'a, T> {
    pub(crate) fn value(&self) -> &'a T {
        match *self {
            Slot::Base(bucket) => bucket.value(),
            Slot::Created(bucket) => &bucket.value,
        }
    }

    pub(crate) fn view(&self, memory: &TransactionalMemory) -> BucketView<T> {
        match self {
            Slot::Base(bucket) => bucket.view(memory),
            Slot::Created(bucket) => BucketView::new(bucket.value.clone(), bucket.bitmap()),
        }
    }

    pub(crate) fn contains(&self, memory: &TransactionalMemory, record_id: u32) -> bool {
        match self {
            Slot::Base(bucket) => bucket.record_ids().contains(memory, record_id),
            Slot::Created(bucket) => bucket.record_ids.contains(&record_id),
        }
    }

    pub(crate) fn len(&self, memory: &TransactionalMemory) -> usize {
        match self {
            Slot::Base(bucket) => bucket.record_ids().len(memory),
            Slot::Created(bucket) => bucket.record_ids.len(),
        }
    }
}

/// A sorted array of [`ValueToRecordBitmap`] buckets whose writes are
/// isolated per transaction.
///
/// Buckets stay ordered by the comparator and a bucket is dropped as soon as
/// its last record id is removed.
pub struct TransactionalBucketArray<T> {
    id: ObjectId,
    buckets: Arc<[ValueToRecordBitmap<T>]>,
    comparator: Comparator<T>,
}

impl<T> Clone for TransactionalBucketArray<T> {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            buckets: Arc::clone(&self.buckets),
            comparator: Arc::clone(&self.comparator),
        }
    }
}

impl<T: Debug> Debug for TransactionalBucketArray<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransactionalBucketArray")
            .field("id", &self.id)
            .field("buckets", &self.buckets)
            .finish()
    }
}

impl<T> TransactionalBucketArray<T> {
    /// Returns the committed buckets.
    #[must_use]
    pub fn base(&self) -> &[ValueToRecordBitmap<T>] {
        &self.buckets
    }
}

impl<T> TransactionalBucketArray<T>
where
    T: Clone + Debug + Send + Sync + 'static,
{
    /// Creates an array over buckets that are already sorted by `comparator`.
    #[must_use]
    pub fn new(buckets: Vec<ValueToRecordBitmap<T>>, comparator: Comparator<T>) -> Self {
        Self {
            id: next_object_id(),
            buckets: Arc::from(buckets),
            comparator,
        }
    }

    /// Returns the comparator.
    #[must_use]
    pub fn comparator(&self) -> &Comparator<T> {
        &self.comparator
    }

    /// Returns true if both handles refer to the same snapshot.
    #[must_use]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        self.id == other.id && Arc::ptr_eq(&self.buckets, &other.buckets)
    }

    fn search_base(&self, value: &T) -> Result<usize, usize> {
        self.buckets
            .binary_search_by(|bucket| (self.comparator)(bucket.value(), value))
    }

    /// Returns every bucket visible in `memory`, in order.
    pub(crate) fn slots<'a>(&'a self, memory: &'a TransactionalMemory) -> Vec<Slot<'a, T>> {
        match memory.get_layer_if_exists(self) {
            Some(changes) => self.merged_slots(changes),
            None => self.buckets.iter().map(Slot::Base).collect(),
        }
    }

    fn merged_slots<'a>(&'a self, changes: &'a BucketArrayChanges<T>) -> Vec<Slot<'a, T>> {
        let mut slots = Vec::with_capacity(self.buckets.len() + changes.created.len());
        let mut created = changes.created.iter().peekable();
        for (pos, bucket) in self.buckets.iter().enumerate() {
            if changes.removed.contains(&pos) {
                continue;
            }
            while let Some(new) =
                created.next_if(|c| (self.comparator)(&c.value, bucket.value()) == Ordering::Less)
            {
                slots.push(Slot::Created(new));
            }
            slots.push(Slot::Base(bucket));
        }
        slots.extend(created.map(Slot::Created));
        slots
    }

    /// Returns the number of buckets visible in `memory`.
    #[must_use]
    pub fn len(&self, memory: &TransactionalMemory) -> usize {
        memory
            .get_layer_if_exists(self)
            .map_or(self.buckets.len(), |changes| {
                self.buckets.len() - changes.removed.len() + changes.created.len()
            })
    }

    /// Returns true if no bucket is visible in `memory`.
    #[must_use]
    pub fn is_empty(&self, memory: &TransactionalMemory) -> bool {
        self.len(memory) == 0
    }

    /// Returns true if a bucket for `value` is visible.
    #[must_use]
    pub fn contains(&self, memory: &TransactionalMemory, value: &T) -> bool {
        let changes = memory.get_layer_if_exists(self);
        match self.search_base(value) {
            Ok(pos) => !changes.is_some_and(|c| c.removed.contains(&pos)),
            Err(_) => changes.is_some_and(|c| c.search_created(value, &*self.comparator).is_ok()),
        }
    }

    /// Resolves every visible bucket.
    #[must_use]
    pub fn views(&self, memory: &TransactionalMemory) -> Vec<BucketView<T>> {
        self.slots(memory).iter().map(|slot| slot.view(memory)).collect()
    }

    /// Resolves the visible buckets between `from` and `to`.
    ///
    /// Bounds are located by binary search; a missing bound is open.
    pub(crate) fn range(
        &self,
        memory: &TransactionalMemory,
        from: Option<&T>,
        to: Option<&T>,
        handling: BoundsHandling,
    ) -> CoreResult<Vec<BucketView<T>>> {
        if let (Some(from), Some(to)) = (from, to) {
            if (self.comparator)(from, to) == Ordering::Greater {
                return Err(CoreError::invalid_operation(format!(
                    "range start {from:?} is greater than range end {to:?}"
                )));
            }
        }

        match memory.get_layer_if_exists(self) {
            None => {
                let (start, end) = bounds(
                    &self.buckets[..],
                    |bucket| bucket.value(),
                    from,
                    to,
                    handling,
                    &*self.comparator,
                );
                Ok(self.buckets[start..end].iter().map(|b| b.view(memory)).collect())
            }
            Some(changes) => {
                let slots = self.merged_slots(changes);
                let (start, end) =
                    bounds(&slots, |slot| slot.value(), from, to, handling, &*self.comparator);
                Ok(slots[start..end].iter().map(|s| s.view(memory)).collect())
            }
        }
    }

    /// Adds record ids to the bucket of `value`, creating it if needed.
    ///
    /// # Errors
    ///
    /// Fails when no layer can be opened.
    pub fn add(&self, memory: &mut TransactionalMemory, value: T, ids: &[u32]) -> CoreResult<()> {
        match self.search_base(&value) {
            Ok(pos) => {
                let revived = memory
                    .get_layer_if_exists(self)
                    .is_some_and(|c| c.removed.contains(&pos));
                if revived {
                    memory.get_or_create_layer(self)?.removed.remove(&pos);
                }
                self.buckets[pos].record_ids().add(memory, ids)
            }
            Err(_) => {
                memory
                    .get_or_create_layer(self)?
                    .add_created(value, ids, &*self.comparator);
                Ok(())
            }
        }
    }

    /// Removes record ids from the bucket of `value`, dropping the bucket
    /// once it is empty. Unknown values are ignored.
    ///
    /// # Errors
    ///
    /// Fails when no layer can be opened.
    pub fn remove(&self, memory: &mut TransactionalMemory, value: &T, ids: &[u32]) -> CoreResult<()> {
        match self.search_base(value) {
            Ok(pos) => {
                if memory
                    .get_layer_if_exists(self)
                    .is_some_and(|c| c.removed.contains(&pos))
                {
                    return Ok(());
                }
                let record_ids = self.buckets[pos].record_ids();
                record_ids.remove(memory, ids)?;
                if record_ids.is_empty(memory) {
                    memory.get_or_create_layer(self)?.removed.insert(pos);
                }
                Ok(())
            }
            Err(_) => {
                if memory.get_layer_if_exists(self).is_some() {
                    memory
                        .get_or_create_layer(self)?
                        .remove_created(value, ids, &*self.comparator);
                }
                Ok(())
            }
        }
    }
}

/// Locates the `[start, end)` slice of `items` within the bounds.
fn bounds<S, T, F>(
    items: &[S],
    value_of: F,
    from: Option<&T>,
    to: Option<&T>,
    handling: BoundsHandling,
    comparator: &dyn Fn(&T, &T) -> Ordering,
) -> (usize, usize)
where
    F: Fn(&S) -> &T,
{
    let search = |target: &T| items.binary_search_by(|item| comparator(value_of(item), target));
    let start = from.map_or(0, |from| match search(from) {
        Ok(pos) if handling == BoundsHandling::Exclusive => pos + 1,
        Ok(pos) | Err(pos) => pos,
    });
    let end = to.map_or(items.len(), |to| match search(to) {
        Ok(pos) if handling == BoundsHandling::Inclusive => pos + 1,
        Ok(pos) | Err(pos) => pos,
    });
    (start, end.max(start))
}

impl<T> LayerCreator for TransactionalBucketArray<T>
where
    T: Clone + Debug + Send + Sync + 'static,
{
    type Layer = BucketArrayChanges<T>;

    fn id(&self) -> ObjectId {
        self.id
    }

    fn create_layer(&self) -> BucketArrayChanges<T> {
        BucketArrayChanges::new()
    }

    fn as_creator_maintainer(&self) -> Option<&dyn CreatorMaintainer> {
        Some(self)
    }
}

impl<T> CreatorMaintainer for TransactionalBucketArray<T>
where
    T: Clone + Debug + Send + Sync + 'static,
{
    fn maintained_creators(&self) -> Vec<LayerKey> {
        self.buckets
            .iter()
            .map(|bucket| bucket.record_ids().layer_key())
            .collect()
    }
}

impl<T> LayerProducer for TransactionalBucketArray<T>
where
    T: Clone + Debug + Send + Sync + 'static,
{
    type Snapshot = Self;

    fn create_copy_with_merged_layer(
        &self,
        layer: Option<&BucketArrayChanges<T>>,
        maintainer: &mut LayerMaintainer,
    ) -> CoreResult<Self> {
        let empty = BucketArrayChanges::new();
        let changes = layer.unwrap_or(&empty);
        let mut changed = !changes.is_noop();
        let mut merged = Vec::with_capacity(self.buckets.len() + changes.created.len());
        let mut created = changes.created.iter().peekable();

        for (pos, bucket) in self.buckets.iter().enumerate() {
            if changes.removed.contains(&pos) {
                bucket.record_ids().remove_layer(maintainer);
                continue;
            }
            while let Some(new) =
                created.next_if(|c| (self.comparator)(&c.value, bucket.value()) == Ordering::Less)
            {
                merged.push(new.to_bucket());
            }
            let record_ids = maintainer.get_state_copy_with_committed_changes(bucket.record_ids())?;
            if !record_ids.ptr_eq(bucket.record_ids()) {
                changed = true;
            }
            if record_ids.base().is_empty() {
                changed = true;
                continue;
            }
            merged.push(ValueToRecordBitmap::from_transactional(
                bucket.value().clone(),
                record_ids,
            ));
        }
        merged.extend(created.map(CreatedBucket::to_bucket));

        Ok(if changed {
            Self::new(merged, Arc::clone(&self.comparator))
        } else {
            self.clone()
        })
    }

    fn remove_layer(&self, maintainer: &mut LayerMaintainer) {
        maintainer.remove_layer_if_exists(self);
        for bucket in self.buckets.iter() {
            bucket.record_ids().remove_layer(maintainer);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::TransactionId;

    fn array(buckets: &[(i32, &[u32])]) -> TransactionalBucketArray<i32> {
        TransactionalBucketArray::new(
            buckets
                .iter()
                .map(|(value, ids)| ValueToRecordBitmap::of(*value, ids))
                .collect(),
            Arc::new(|a: &i32, b: &i32| a.cmp(b)),
        )
    }

    fn memory() -> TransactionalMemory {
        TransactionalMemory::new(TransactionId::new(1))
    }

    fn values(array: &TransactionalBucketArray<i32>, memory: &TransactionalMemory) -> Vec<i32> {
        array.views(memory).iter().map(|v| *v.value()).collect()
    }

    #[test]
    fn created_buckets_interleave_with_base() {
        let array = array(&[(10, &[1]), (30, &[3])]);
        let mut memory = memory();
        array.add(&mut memory, 40, &[4]).unwrap();
        array.add(&mut memory, 5, &[5]).unwrap();
        array.add(&mut memory, 20, &[2]).unwrap();
        array.add(&mut memory, 20, &[7]).unwrap();

        assert_eq!(values(&array, &memory), vec![5, 10, 20, 30, 40]);
        assert_eq!(array.len(&memory), 5);
        assert!(array.contains(&memory, &20));
        assert_eq!(array.views(&memory)[2], BucketView::of(20, &[2, 7]));
    }

    #[test]
    fn emptied_bucket_disappears() {
        let array = array(&[(10, &[1, 2]), (20, &[3])]);
        let mut memory = memory();
        array.remove(&mut memory, &10, &[1, 2]).unwrap();

        assert_eq!(values(&array, &memory), vec![20]);
        assert!(!array.contains(&memory, &10));

        let merged = memory.get_state_copy_with_committed_changes(&array).unwrap();
        assert_eq!(merged.base().len(), 1);
        assert!(memory.maintainer().stale_layers().is_empty());
    }

    #[test]
    fn removed_bucket_can_be_revived() {
        let array = array(&[(10, &[1])]);
        let mut memory = memory();
        array.remove(&mut memory, &10, &[1]).unwrap();
        array.add(&mut memory, 10, &[9]).unwrap();

        assert_eq!(array.views(&memory), vec![BucketView::of(10, &[9])]);
        let merged = memory.get_state_copy_with_committed_changes(&array).unwrap();
        assert_eq!(merged.base()[0].record_ids().base().as_slice(), &[9]);
    }

    #[test]
    fn created_bucket_removal() {
        let array = array(&[]);
        let mut memory = memory();
        array.add(&mut memory, 1, &[1, 2]).unwrap();
        array.remove(&mut memory, &1, &[1, 2]).unwrap();
        assert!(array.is_empty(&memory));
        assert!(memory
            .get_state_copy_with_committed_changes(&array)
            .unwrap()
            .ptr_eq(&array));
    }

    #[test]
    fn range_bounds() {
        let array = array(&[(1, &[1]), (3, &[3]), (5, &[5]), (7, &[7])]);
        let memory = memory();
        let range = |from, to, handling| {
            array
                .range(&memory, from, to, handling)
                .unwrap()
                .iter()
                .map(|v| *v.value())
                .collect::<Vec<_>>()
        };

        assert_eq!(range(Some(&3), Some(&5), BoundsHandling::Inclusive), vec![3, 5]);
        assert_eq!(range(Some(&3), Some(&5), BoundsHandling::Exclusive), Vec::<i32>::new());
        assert_eq!(range(Some(&2), Some(&6), BoundsHandling::Exclusive), vec![3, 5]);
        assert_eq!(range(None, Some(&4), BoundsHandling::Inclusive), vec![1, 3]);
        assert_eq!(range(Some(&6), None, BoundsHandling::Inclusive), vec![7]);
        assert_eq!(range(Some(&3), Some(&3), BoundsHandling::Exclusive), Vec::<i32>::new());
        assert!(array.range(&memory, Some(&5), Some(&1), BoundsHandling::Inclusive).is_err());
    }

    #[test]
    fn range_sees_layer() {
        let array = array(&[(1, &[1]), (5, &[5])]);
        let mut memory = memory();
        array.add(&mut memory, 3, &[3]).unwrap();
        array.remove(&mut memory, &5, &[5]).unwrap();

        let views = array
            .range(&memory, Some(&2), None, BoundsHandling::Inclusive)
            .unwrap();
        assert_eq!(views, vec![BucketView::of(3, &[3])]);
    }

    #[test]
    fn remove_layer_releases_bucket_bitmaps() {
        let array = array(&[(1, &[1])]);
        let mut memory = memory();
        array.add(&mut memory, 1, &[2]).unwrap();
        array.add(&mut memory, 2, &[2]).unwrap();

        array.remove_layer(memory.maintainer_mut());
        assert!(memory.maintainer().stale_layers().is_empty());
    }
}
