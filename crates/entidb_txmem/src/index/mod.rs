//! Inverted index over transactional buckets.
//!
//! This module contains:
//! - [`ValueToRecordBitmap`] buckets and their resolved [`BucketView`]s
//! - [`TransactionalBucketArray`], the sorted bucket storage
//! - [`InvertedIndex`] with inclusive and exclusive range queries
//! - [`InvertedIndexSubSet`], the lazily aggregated query result

mod array;
mod bucket;
mod consistency;
mod inverted;
mod subset;

pub use array::{BucketArrayChanges, Comparator, TransactionalBucketArray};
pub use bucket::{BucketView, ValueToRecordBitmap};
pub use consistency::{ConsistencyReport, ConsistencyState};
pub use inverted::{InvertedIndex, Normalizer};
pub use subset::{sorted_aggregation, unsorted_aggregation, Aggregation, InvertedIndexSubSet};
