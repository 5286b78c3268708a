//! Lazily aggregated slices of an inverted index.

use crate::index::bucket::BucketView;
use crate::primitive::Bitmap;
use crate::types::ObjectId;
use std::fmt;
use std::sync::OnceLock;

/// Turns a run of buckets into one record id sequence.
pub type Aggregation<T> = fn(&[BucketView<T>]) -> Vec<u32>;

/// Lays record ids out bucket after bucket, in bucket value order.
#[must_use]
pub fn unsorted_aggregation<T>(buckets: &[BucketView<T>]) -> Vec<u32> {
    buckets
        .iter()
        .flat_map(|bucket| bucket.record_ids().iter())
        .collect()
}

/// Lays record ids out in ascending order without duplicates.
#[must_use]
pub fn sorted_aggregation<T>(buckets: &[BucketView<T>]) -> Vec<u32> {
    match buckets {
        [] => Vec::new(),
        [single] => single.record_ids().as_slice().to_vec(),
        _ => Bitmap::or(buckets.iter().map(BucketView::record_ids))
            .as_slice()
            .to_vec(),
    }
}

/// A contiguous run of buckets taken from an inverted index.
///
/// The record ids are aggregated on first access and memoized.
pub struct InvertedIndexSubSet<T> {
    index_id: ObjectId,
    buckets: Vec<BucketView<T>>,
    aggregation: Aggregation<T>,
    memoized: OnceLock<Vec<u32>>,
}

impl<T> InvertedIndexSubSet<T> {
    /// Creates a subset.
    #[must_use]
    pub fn new(index_id: ObjectId, buckets: Vec<BucketView<T>>, aggregation: Aggregation<T>) -> Self {
        Self {
            index_id,
            buckets,
            aggregation,
            memoized: OnceLock::new(),
        }
    }

    /// Returns the id of the index the subset was taken from.
    #[must_use]
    pub fn index_id(&self) -> ObjectId {
        self.index_id
    }

    /// Returns the buckets of the subset.
    #[must_use]
    pub fn buckets(&self) -> &[BucketView<T>] {
        &self.buckets
    }

    /// Returns the aggregated record ids.
    pub fn record_ids(&self) -> &[u32] {
        self.memoized.get_or_init(|| (self.aggregation)(&self.buckets))
    }

    /// Returns the number of aggregated record ids.
    pub fn len(&self) -> usize {
        self.record_ids().len()
    }

    /// Returns true if the subset holds no record id.
    pub fn is_empty(&self) -> bool {
        self.buckets.iter().all(|bucket| bucket.record_ids().is_empty())
    }
}

impl<T: fmt::Debug> fmt::Debug for InvertedIndexSubSet<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InvertedIndexSubSet")
            .field("index_id", &self.index_id)
            .field("buckets", &self.buckets)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    fn buckets() -> Vec<BucketView<char>> {
        vec![
            BucketView::of('A', &[1, 4]),
            BucketView::of('B', &[2, 9]),
            BucketView::of('C', &[3]),
        ]
    }

    #[test]
    fn unsorted_follows_bucket_order() {
        let subset = InvertedIndexSubSet::new(ObjectId::new(1), buckets(), unsorted_aggregation);
        assert_eq!(subset.record_ids(), &[1, 4, 2, 9, 3]);
        assert_eq!(subset.len(), 5);
    }

    #[test]
    fn sorted_is_ascending() {
        let subset = InvertedIndexSubSet::new(ObjectId::new(1), buckets(), sorted_aggregation);
        assert_eq!(subset.record_ids(), &[1, 2, 3, 4, 9]);
    }

    thread_local! {
        static CALLS: Cell<usize> = const { Cell::new(0) };
    }

    fn counting(buckets: &[BucketView<char>]) -> Vec<u32> {
        CALLS.with(|c| c.set(c.get() + 1));
        unsorted_aggregation(buckets)
    }

    #[test]
    fn aggregation_runs_once() {
        let subset = InvertedIndexSubSet::new(ObjectId::new(1), buckets(), counting);
        subset.record_ids();
        subset.record_ids();
        assert_eq!(CALLS.with(Cell::get), 1);
    }

    #[test]
    fn empty_subset() {
        let subset: InvertedIndexSubSet<char> =
            InvertedIndexSubSet::new(ObjectId::new(1), Vec::new(), sorted_aggregation);
        assert!(subset.is_empty());
        assert!(subset.record_ids().is_empty());
    }
}
