//! Transactional hash map and its diff layer.

mod changes;
mod policy;
mod transactional;

pub use changes::MapChanges;
pub use policy::{PlainValues, ProducerValues, ValuePolicy};
pub use transactional::{Iter, TransactionalMap};
