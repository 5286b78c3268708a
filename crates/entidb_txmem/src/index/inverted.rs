//! Transactional inverted index.

use crate::error::{CoreError, CoreResult};
use crate::index::array::{BoundsHandling, Comparator, TransactionalBucketArray};
use crate::index::bucket::{BucketView, ValueToRecordBitmap};
use crate::index::consistency::{check_buckets, ConsistencyReport};
use crate::index::subset::{sorted_aggregation, unsorted_aggregation, InvertedIndexSubSet};
use crate::memory::{
    CreatorMaintainer, LayerCreator, LayerMaintainer, LayerProducer, TransactionalMemory,
    VoidLayer,
};
use crate::primitive::{Bitmap, TransactionalFlag};
use crate::types::{LayerKey, ObjectId};
use crate::version::next_object_id;
use std::cmp::Ordering;
use std::fmt::{self, Debug};
use std::sync::Arc;
use tracing::trace;

/// Maps a raw value to the form stored in the index.
pub type Normalizer<T> = Arc<dyn Fn(&T) -> T + Send + Sync>;

/// An ordered mapping from values to the record ids holding them.
///
/// The index owns no layer of its own. Its state lives in a sorted
/// [`TransactionalBucketArray`] plus a dirty flag, both of which are
/// transactional. Merging rebuilds the index only when the flag was raised
/// in the transaction.
///
/// Values are normalized before every lookup or write and ordered by the
/// comparator given at construction.
pub struct InvertedIndex<T> {
    id: ObjectId,
    dirty: TransactionalFlag,
    buckets: TransactionalBucketArray<T>,
    normalizer: Normalizer<T>,
    comparator: Comparator<T>,
}

impl<T> Clone for InvertedIndex<T> {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            dirty: self.dirty.clone(),
            buckets: self.buckets.clone(),
            normalizer: Arc::clone(&self.normalizer),
            comparator: Arc::clone(&self.comparator),
        }
    }
}

impl<T: Debug> Debug for InvertedIndex<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InvertedIndex")
            .field("id", &self.id)
            .field("buckets", &self.buckets.base())
            .finish()
    }
}

impl<T> InvertedIndex<T>
where
    T: Clone + Debug + Send + Sync + 'static,
{
    /// Creates an empty index.
    pub fn new<N, C>(normalizer: N, comparator: C) -> Self
    where
        N: Fn(&T) -> T + Send + Sync + 'static,
        C: Fn(&T, &T) -> Ordering + Send + Sync + 'static,
    {
        Self::assemble(Vec::new(), Arc::new(normalizer), Arc::new(comparator))
    }

    /// Creates an empty index using the natural order of `T`.
    #[must_use]
    pub fn natural() -> Self
    where
        T: Ord,
    {
        Self::new(T::clone, T::cmp)
    }

    /// Creates an index over existing buckets after checking that their
    /// values strictly increase and none of them is empty.
    ///
    /// # Errors
    ///
    /// Fails with [`CoreError::ConsistencyViolation`] on broken input.
    pub fn from_buckets<N, C>(
        buckets: Vec<ValueToRecordBitmap<T>>,
        normalizer: N,
        comparator: C,
    ) -> CoreResult<Self>
    where
        N: Fn(&T) -> T + Send + Sync + 'static,
        C: Fn(&T, &T) -> Ordering + Send + Sync + 'static,
    {
        check_buckets(
            buckets
                .iter()
                .map(|bucket| (bucket.value(), bucket.record_ids().base().len())),
            &comparator,
        )
        .into_result()?;
        Ok(Self::assemble(buckets, Arc::new(normalizer), Arc::new(comparator)))
    }

    /// Creates an index over buckets that are trusted to be consistent.
    #[must_use]
    pub fn from_buckets_unchecked(
        buckets: Vec<ValueToRecordBitmap<T>>,
        normalizer: Normalizer<T>,
        comparator: Comparator<T>,
    ) -> Self {
        Self::assemble(buckets, normalizer, comparator)
    }

    fn assemble(
        buckets: Vec<ValueToRecordBitmap<T>>,
        normalizer: Normalizer<T>,
        comparator: Comparator<T>,
    ) -> Self {
        Self {
            id: next_object_id(),
            dirty: TransactionalFlag::new(false),
            buckets: TransactionalBucketArray::new(buckets, Arc::clone(&comparator)),
            normalizer,
            comparator,
        }
    }

    /// Returns the comparator ordering the buckets.
    #[must_use]
    pub fn comparator(&self) -> &Comparator<T> {
        &self.comparator
    }

    /// Returns the committed buckets.
    #[must_use]
    pub fn base(&self) -> &[ValueToRecordBitmap<T>] {
        self.buckets.base()
    }

    fn normalize(&self, value: &T) -> T {
        (self.normalizer)(value)
    }

    /// Adds record ids to the bucket of `value`, creating the bucket if needed.
    ///
    /// # Errors
    ///
    /// Fails with [`CoreError::InvalidOperation`] when `record_ids` is empty.
    pub fn add_record(&self, memory: &mut TransactionalMemory, value: &T, record_ids: &[u32]) -> CoreResult<()> {
        if record_ids.is_empty() {
            return Err(CoreError::invalid_operation("record ids must not be empty"));
        }
        self.dirty.set_to_true(memory)?;
        self.buckets.add(memory, self.normalize(value), record_ids)
    }

    /// Removes record ids from the bucket of `value`. A bucket left empty is
    /// dropped; an unknown value is ignored.
    ///
    /// # Errors
    ///
    /// Fails with [`CoreError::InvalidOperation`] when `record_ids` is empty.
    pub fn remove_record(&self, memory: &mut TransactionalMemory, value: &T, record_ids: &[u32]) -> CoreResult<()> {
        if record_ids.is_empty() {
            return Err(CoreError::invalid_operation("record ids must not be empty"));
        }
        self.dirty.set_to_true(memory)?;
        self.buckets.remove(memory, &self.normalize(value), record_ids)
    }

    /// Returns true if no bucket holds a record id.
    #[must_use]
    pub fn is_empty(&self, memory: &TransactionalMemory) -> bool {
        self.buckets
            .slots(memory)
            .iter()
            .all(|slot| slot.len(memory) == 0)
    }

    /// Returns true if a bucket exists for `value`.
    #[must_use]
    pub fn contains(&self, memory: &TransactionalMemory, value: &T) -> bool {
        self.buckets.contains(memory, &self.normalize(value))
    }

    /// Returns the record ids of the bucket at `index`, or an empty bitmap
    /// when there is no such bucket.
    #[must_use]
    pub fn get_records_at_index(&self, memory: &TransactionalMemory, index: usize) -> Bitmap {
        self.buckets
            .slots(memory)
            .get(index)
            .map_or_else(Bitmap::new, |slot| slot.view(memory).record_ids().clone())
    }

    /// Returns every bucket in value order.
    #[must_use]
    pub fn value_to_record_bitmap(&self, memory: &TransactionalMemory) -> Vec<BucketView<T>> {
        self.buckets.views(memory)
    }

    /// Returns every record id, laid out bucket after bucket.
    #[must_use]
    pub fn get_all_records(&self, memory: &TransactionalMemory) -> InvertedIndexSubSet<T> {
        InvertedIndexSubSet::new(self.id, self.buckets.views(memory), unsorted_aggregation)
    }

    /// Returns the record ids of buckets within `[from, to]`, laid out
    /// bucket after bucket. Missing bounds are open.
    ///
    /// # Errors
    ///
    /// Fails with [`CoreError::InvalidOperation`] when `from` exceeds `to`.
    pub fn get_records(
        &self,
        memory: &TransactionalMemory,
        from: Option<&T>,
        to: Option<&T>,
    ) -> CoreResult<InvertedIndexSubSet<T>> {
        let buckets = self.range(memory, from, to, BoundsHandling::Inclusive)?;
        Ok(InvertedIndexSubSet::new(self.id, buckets, unsorted_aggregation))
    }

    /// Returns the record ids of buckets within `[from, to]` in ascending
    /// order. Missing bounds are open.
    ///
    /// # Errors
    ///
    /// Fails with [`CoreError::InvalidOperation`] when `from` exceeds `to`.
    pub fn get_sorted_records(
        &self,
        memory: &TransactionalMemory,
        from: Option<&T>,
        to: Option<&T>,
    ) -> CoreResult<InvertedIndexSubSet<T>> {
        let buckets = self.range(memory, from, to, BoundsHandling::Inclusive)?;
        Ok(InvertedIndexSubSet::new(self.id, buckets, sorted_aggregation))
    }

    /// Returns the record ids of buckets within `(from, to)` in ascending
    /// order. Missing bounds are open.
    ///
    /// # Errors
    ///
    /// Fails with [`CoreError::InvalidOperation`] when `from` exceeds `to`.
    pub fn get_sorted_records_exclusive(
        &self,
        memory: &TransactionalMemory,
        from: Option<&T>,
        to: Option<&T>,
    ) -> CoreResult<InvertedIndexSubSet<T>> {
        let buckets = self.range(memory, from, to, BoundsHandling::Exclusive)?;
        Ok(InvertedIndexSubSet::new(self.id, buckets, sorted_aggregation))
    }

    fn range(
        &self,
        memory: &TransactionalMemory,
        from: Option<&T>,
        to: Option<&T>,
        handling: BoundsHandling,
    ) -> CoreResult<Vec<BucketView<T>>> {
        let from = from.map(|v| self.normalize(v));
        let to = to.map(|v| self.normalize(v));
        self.buckets
            .range(memory, from.as_ref(), to.as_ref(), handling)
    }

    /// Returns the values of every bucket holding `record_id`, in value order.
    #[must_use]
    pub fn get_values_for_record(&self, memory: &TransactionalMemory, record_id: u32) -> Vec<T> {
        self.buckets
            .slots(memory)
            .iter()
            .filter(|slot| slot.contains(memory, record_id))
            .map(|slot| slot.value().clone())
            .collect()
    }

    /// Returns the number of buckets.
    #[must_use]
    pub fn bucket_count(&self, memory: &TransactionalMemory) -> usize {
        self.buckets.len(memory)
    }

    /// Returns the total number of record ids over all buckets.
    #[must_use]
    pub fn len(&self, memory: &TransactionalMemory) -> usize {
        self.buckets
            .slots(memory)
            .iter()
            .map(|slot| slot.len(memory))
            .sum()
    }

    /// Returns true if the index was written in this transaction.
    #[must_use]
    pub fn is_dirty(&self, memory: &TransactionalMemory) -> bool {
        self.dirty.get(memory)
    }

    /// Clears the dirty flag for this transaction.
    ///
    /// # Errors
    ///
    /// Fails when no layer can be opened.
    pub fn reset_dirty(&self, memory: &mut TransactionalMemory) -> CoreResult<()> {
        self.dirty.set_to_false(memory)
    }

    /// Checks that bucket values strictly increase and no bucket is empty.
    #[must_use]
    pub fn consistency_report(&self, memory: &TransactionalMemory) -> ConsistencyReport {
        let slots = self.buckets.slots(memory);
        check_buckets(
            slots.iter().map(|slot| (slot.value(), slot.len(memory))),
            &*self.comparator,
        )
    }
}

impl<T> LayerCreator for InvertedIndex<T>
where
    T: Clone + Debug + Send + Sync + 'static,
{
    type Layer = VoidLayer;

    fn id(&self) -> ObjectId {
        self.id
    }

    fn create_layer(&self) -> VoidLayer {}

    fn as_creator_maintainer(&self) -> Option<&dyn CreatorMaintainer> {
        Some(self)
    }
}

impl<T> CreatorMaintainer for InvertedIndex<T>
where
    T: Clone + Debug + Send + Sync + 'static,
{
    fn maintained_creators(&self) -> Vec<LayerKey> {
        let mut creators = vec![self.dirty.layer_key(), self.buckets.layer_key()];
        creators.extend(self.buckets.maintained_creators());
        creators
    }
}

impl<T> LayerProducer for InvertedIndex<T>
where
    T: Clone + Debug + Send + Sync + 'static,
{
    type Snapshot = Self;

    fn create_copy_with_merged_layer(
        &self,
        _layer: Option<&VoidLayer>,
        maintainer: &mut LayerMaintainer,
    ) -> CoreResult<Self> {
        if !maintainer.get_state_copy_with_committed_changes(&self.dirty)? {
            return Ok(self.clone());
        }
        let buckets = maintainer.get_state_copy_with_committed_changes(&self.buckets)?;
        trace!(index = %self.id, buckets = buckets.base().len(), "rebuilt inverted index");
        Ok(Self {
            id: next_object_id(),
            dirty: TransactionalFlag::new(false),
            buckets,
            normalizer: Arc::clone(&self.normalizer),
            comparator: Arc::clone(&self.comparator),
        })
    }

    fn remove_layer(&self, maintainer: &mut LayerMaintainer) {
        self.dirty.remove_layer(maintainer);
        maintainer.remove_layer_if_exists(self);
        self.buckets.remove_layer(maintainer);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::TransactionId;

    fn memory() -> TransactionalMemory {
        TransactionalMemory::new(TransactionId::new(1))
    }

    fn index(buckets: &[(i32, &[u32])]) -> InvertedIndex<i32> {
        InvertedIndex::from_buckets(
            buckets
                .iter()
                .map(|(value, ids)| ValueToRecordBitmap::of(*value, ids))
                .collect(),
            i32::clone,
            i32::cmp,
        )
        .unwrap()
    }

    fn sample() -> InvertedIndex<i32> {
        index(&[(5, &[1, 20]), (10, &[2, 3]), (15, &[4])])
    }

    #[test]
    fn debug_lists_committed_buckets() {
        let rendered = format!("{:?}", sample());
        assert!(rendered.starts_with("InvertedIndex"));
        assert!(rendered.contains("buckets"));
    }

    #[test]
    fn add_creates_and_extends_buckets() {
        let index = InvertedIndex::<i32>::natural();
        let mut memory = memory();
        index.add_record(&mut memory, &5, &[20]).unwrap();
        index.add_record(&mut memory, &5, &[1]).unwrap();
        index.add_record(&mut memory, &10, &[3, 2]).unwrap();

        assert_eq!(
            index.value_to_record_bitmap(&memory),
            vec![BucketView::of(5, &[1, 20]), BucketView::of(10, &[2, 3])]
        );
        assert_eq!(index.len(&memory), 4);
        assert_eq!(index.bucket_count(&memory), 2);
        assert!(index.is_dirty(&memory));
    }

    #[test]
    fn empty_record_ids_are_rejected() {
        let index = sample();
        let mut memory = memory();
        assert!(matches!(
            index.add_record(&mut memory, &5, &[]),
            Err(CoreError::InvalidOperation { .. })
        ));
        assert!(index.remove_record(&mut memory, &5, &[]).is_err());
    }

    #[test]
    fn remove_drops_empty_bucket() {
        let index = sample();
        let mut memory = memory();
        index.remove_record(&mut memory, &15, &[4]).unwrap();
        index.remove_record(&mut memory, &99, &[4]).unwrap();

        assert!(!index.contains(&memory, &15));
        assert_eq!(index.bucket_count(&memory), 2);
        assert!(index.consistency_report(&memory).is_consistent());
    }

    #[test]
    fn range_queries() {
        let index = sample();
        let memory = memory();

        let all = index.get_records(&memory, None, None).unwrap();
        assert_eq!(all.record_ids(), &[1, 20, 2, 3, 4]);

        let sorted = index.get_sorted_records(&memory, Some(&5), Some(&10)).unwrap();
        assert_eq!(sorted.record_ids(), &[1, 2, 3, 20]);

        let exclusive = index
            .get_sorted_records_exclusive(&memory, Some(&5), Some(&15))
            .unwrap();
        assert_eq!(exclusive.record_ids(), &[2, 3]);

        let between = index.get_records(&memory, Some(&6), Some(&14)).unwrap();
        assert_eq!(between.record_ids(), &[2, 3]);

        assert!(index.get_records(&memory, Some(&10), Some(&5)).is_err());
        assert_eq!(all.index_id(), index.id());
    }

    #[test]
    fn string_buckets_in_bucket_and_sorted_order() {
        let index = InvertedIndex::from_buckets(
            vec![
                ValueToRecordBitmap::of("A".to_string(), &[1, 4]),
                ValueToRecordBitmap::of("B".to_string(), &[2, 9]),
                ValueToRecordBitmap::of("C".to_string(), &[3]),
            ],
            String::clone,
            String::cmp,
        )
        .unwrap();
        let memory = memory();
        let a = "A".to_string();
        let b = "B".to_string();
        let c = "C".to_string();

        assert_eq!(index.get_records(&memory, None, None).unwrap().record_ids(), &[1, 4, 2, 9, 3]);
        assert_eq!(
            index.get_sorted_records(&memory, None, None).unwrap().record_ids(),
            &[1, 2, 3, 4, 9]
        );
        assert_eq!(
            index.get_sorted_records(&memory, Some(&b), Some(&b)).unwrap().record_ids(),
            &[2, 9]
        );
        assert_eq!(
            index
                .get_sorted_records_exclusive(&memory, Some(&a), Some(&c))
                .unwrap()
                .record_ids(),
            &[2, 9]
        );
    }

    #[test]
    fn values_for_record_and_index_access() {
        let index = sample();
        let mut memory = memory();
        index.add_record(&mut memory, &15, &[1]).unwrap();

        assert_eq!(index.get_values_for_record(&memory, 1), vec![5, 15]);
        assert_eq!(index.get_records_at_index(&memory, 1).as_slice(), &[2, 3]);
        assert!(index.get_records_at_index(&memory, 9).is_empty());
    }

    #[test]
    fn from_buckets_rejects_unordered_input() {
        let result = InvertedIndex::from_buckets(
            vec![ValueToRecordBitmap::of(2, &[1]), ValueToRecordBitmap::of(1, &[2])],
            i32::clone,
            i32::cmp,
        );
        assert!(matches!(result, Err(CoreError::ConsistencyViolation { .. })));
    }

    #[test]
    fn clean_merge_returns_same_index() {
        let index = sample();
        let mut memory = memory();
        let merged = memory.get_state_copy_with_committed_changes(&index).unwrap();
        assert_eq!(merged.id(), index.id());
    }

    #[test]
    fn dirty_merge_rebuilds() {
        let index = sample();
        let mut memory = memory();
        index.add_record(&mut memory, &7, &[7]).unwrap();
        index.remove_record(&mut memory, &5, &[1, 20]).unwrap();

        let merged = memory.get_state_copy_with_committed_changes(&index).unwrap();
        assert_ne!(merged.id(), index.id());
        let values: Vec<i32> = merged.base().iter().map(|b| *b.value()).collect();
        assert_eq!(values, vec![7, 10, 15]);
        assert!(memory.maintainer().stale_layers().is_empty());
        memory.commit().unwrap();
    }

    #[test]
    fn normalizer_applies_to_writes_and_reads() {
        let index: InvertedIndex<String> =
            InvertedIndex::new(|s: &String| s.to_lowercase(), |a: &String, b: &String| a.cmp(b));
        let mut memory = memory();
        index.add_record(&mut memory, &"Alpha".to_string(), &[1]).unwrap();

        assert!(index.contains(&memory, &"ALPHA".to_string()));
        assert_eq!(index.get_values_for_record(&memory, 1), vec!["alpha".to_string()]);
    }

    #[test]
    fn suppression_hides_index_changes() {
        let index = sample();
        let mut memory = memory();
        index.add_record(&mut memory, &20, &[9]).unwrap();

        let count = memory
            .suppress_layers_for(&index, |m| index.bucket_count(m))
            .unwrap();
        assert_eq!(count, 3);
        assert_eq!(index.bucket_count(&memory), 4);
    }

    #[test]
    fn remove_layer_clears_nested_state() {
        let index = sample();
        let mut memory = memory();
        index.add_record(&mut memory, &5, &[99]).unwrap();
        index.add_record(&mut memory, &50, &[98]).unwrap();

        index.remove_layer(memory.maintainer_mut());
        assert!(memory.maintainer().stale_layers().is_empty());
        assert!(!index.is_dirty(&memory));
    }
}
