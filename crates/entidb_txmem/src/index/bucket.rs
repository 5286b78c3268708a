//! Value-to-records buckets.

use crate::memory::TransactionalMemory;
use crate::primitive::{Bitmap, TransactionalBitmap};
use std::fmt;

/// A value together with the ids of every record holding it.
#[derive(Clone)]
pub struct ValueToRecordBitmap<T> {
    value: T,
    record_ids: TransactionalBitmap,
}

impl<T> ValueToRecordBitmap<T> {
    /// Creates a bucket.
    #[must_use]
    pub fn new(value: T, record_ids: Bitmap) -> Self {
        Self {
            value,
            record_ids: TransactionalBitmap::new(record_ids),
        }
    }

    /// Creates a bucket from a record id slice.
    #[must_use]
    pub fn of(value: T, record_ids: &[u32]) -> Self {
        Self::new(value, Bitmap::from(record_ids))
    }

    pub(crate) fn from_transactional(value: T, record_ids: TransactionalBitmap) -> Self {
        Self { value, record_ids }
    }

    /// Returns the bucket value.
    #[must_use]
    pub fn value(&self) -> &T {
        &self.value
    }

    /// Returns the transactional record id set.
    #[must_use]
    pub fn record_ids(&self) -> &TransactionalBitmap {
        &self.record_ids
    }

    /// Resolves the bucket as visible in `memory`.
    #[must_use]
    pub fn view(&self, memory: &TransactionalMemory) -> BucketView<T>
    where
        T: Clone,
    {
        BucketView::new(self.value.clone(), self.record_ids.resolve(memory))
    }
}

/// Value and record equality over committed content.
impl<T: PartialEq> PartialEq for ValueToRecordBitmap<T> {
    fn eq(&self, other: &Self) -> bool {
        self.value == other.value && self.record_ids.base() == other.record_ids.base()
    }
}

impl<T: fmt::Debug> fmt::Debug for ValueToRecordBitmap<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}: {:?}", self.value, self.record_ids.base())
    }
}

/// A resolved, immutable view of a bucket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BucketView<T> {
    value: T,
    record_ids: Bitmap,
}

impl<T> BucketView<T> {
    /// Creates a view.
    #[must_use]
    pub fn new(value: T, record_ids: Bitmap) -> Self {
        Self { value, record_ids }
    }

    /// Creates a view from a record id slice.
    #[must_use]
    pub fn of(value: T, record_ids: &[u32]) -> Self {
        Self::new(value, Bitmap::from(record_ids))
    }

    /// Returns the bucket value.
    #[must_use]
    pub fn value(&self) -> &T {
        &self.value
    }

    /// Returns the record ids.
    #[must_use]
    pub fn record_ids(&self) -> &Bitmap {
        &self.record_ids
    }
}
