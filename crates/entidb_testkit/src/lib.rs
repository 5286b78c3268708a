//! # EntiDB Testkit
//!
//! Test utilities for the EntiDB transactional memory layer.
//!
//! This crate provides:
//! - Fixtures asserting the state of a structure after commit or rollback
//! - Property-based test generators using proptest
//! - Logging initialisation for tests
//! - Concurrent reader/writer stress runs
//!
//! ## Usage
//!
//! ```rust
//! use entidb_testkit::prelude::*;
//! use entidb_txmem::TransactionalMap;
//!
//! let map: TransactionalMap<u32, u32> = TransactionalMap::new();
//! assert_state_after_commit(
//!     map,
//!     |map, memory| map.put(memory, 1, 10).map(drop),
//!     |committed, original, reader| {
//!         assert_eq!(committed.get(reader, &1), Some(&10));
//!         assert!(original.is_empty(reader));
//!     },
//! );
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod fixtures;
pub mod generators;
pub mod logging;
pub mod stress;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::fixtures::*;
    pub use crate::generators::*;
    pub use crate::logging::*;
    pub use crate::stress::*;
}

pub use fixtures::*;
pub use generators::*;
pub use logging::*;
pub use stress::*;
