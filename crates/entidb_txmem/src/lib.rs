//! # EntiDB Transactional Memory
//!
//! Copy-on-write transactional memory for EntiDB's in-memory structures.
//!
//! Every shared structure is an immutable snapshot. A transaction never
//! mutates it: writes are recorded as diffs ("layers") held by the
//! transaction's [`TransactionalMemory`], and reads consult the diff before
//! falling back to the snapshot. At commit, registered consumers merge each
//! diff into a brand-new snapshot and publish it. Readers of the old
//! snapshot are never disturbed.
//!
//! ## Building Blocks
//!
//! - [`memory`] - the layer registry, the commit sequence and the capability
//!   traits ([`LayerCreator`], [`LayerProducer`], [`LayerConsumer`])
//! - [`map`] - [`TransactionalMap`], optionally holding nested producers
//! - [`index`] - [`InvertedIndex`] over sorted value buckets
//! - [`primitive`] - [`TransactionalFlag`] and [`TransactionalBitmap`]
//! - [`trie`] - a plain compressed prefix tree
//! - [`snapshot`] - [`SnapshotCell`], a published reference swapped at commit
//!
//! ## Example
//!
//! ```rust
//! use entidb_txmem::{SnapshotCell, TransactionId, TransactionalMap, TransactionalMemory};
//!
//! let cell = SnapshotCell::new(TransactionalMap::<String, u32>::new());
//!
//! let mut memory = TransactionalMemory::new(TransactionId::new(1));
//! let map = cell.load();
//! map.put(&mut memory, "answer".to_string(), 42).unwrap();
//! assert_eq!(map.get(&memory, "answer"), Some(&42));
//!
//! memory.register_consumer(cell.consumer());
//! memory.commit().unwrap();
//!
//! let reader = TransactionalMemory::new(TransactionId::new(2));
//! assert_eq!(cell.load().get(&reader, "answer"), Some(&42));
//! assert!(map.is_empty(&reader));
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod config;
mod error;
mod types;
mod version;

pub mod index;
pub mod map;
pub mod memory;
pub mod primitive;
pub mod snapshot;
pub mod trie;

pub use config::MemoryConfig;
pub use error::{CoreError, CoreResult};
pub use index::{
    sorted_aggregation, unsorted_aggregation, BucketView, ConsistencyReport, ConsistencyState,
    InvertedIndex, InvertedIndexSubSet, ValueToRecordBitmap,
};
pub use map::{PlainValues, ProducerValues, TransactionalMap};
pub use memory::{
    CreatorMaintainer, LayerConsumer, LayerCreator, LayerMaintainer, LayerProducer, LayerState,
    StaleLayer, TransactionalMemory, VoidLayer,
};
pub use primitive::{Bitmap, TransactionalBitmap, TransactionalFlag};
pub use snapshot::{SnapshotCell, SnapshotConsumer};
pub use trie::{Trie, TrieNode};
pub use types::{LayerKey, ObjectId, TransactionId};
pub use version::{next_object_id, ObjectVersion, SEQUENCE};
