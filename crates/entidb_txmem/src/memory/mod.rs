//! Layered transactional memory.
//!
//! This module contains:
//! - The capability traits implemented by transactional structures
//! - The per-transaction layer registry and its commit sequence
//! - The transaction-scoped memory with layer suppression

mod facade;
mod maintainer;
mod state;
mod traits;

pub use facade::TransactionalMemory;
pub use maintainer::LayerMaintainer;
pub use state::{LayerState, StaleLayer};
pub use traits::{CreatorMaintainer, LayerConsumer, LayerCreator, LayerProducer, VoidLayer};
