//! Core type definitions for the transactional memory layer.

use std::any::{type_name, TypeId};
use std::fmt;

/// Unique identifier for a transaction.
///
/// Transaction IDs are assigned by the surrounding session layer and only
/// used here to label layers and diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TransactionId(pub u64);

impl TransactionId {
    /// Creates a new transaction ID.
    #[must_use]
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    /// Returns the raw ID value.
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "txn:{}", self.0)
    }
}

/// Identity of a transactionally-capable object.
///
/// Object IDs are drawn from [`ObjectVersion`](crate::version::ObjectVersion)
/// when the object is constructed, stay the same for the object's lifetime
/// and are shared by clones of the same envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ObjectId(pub u64);

impl ObjectId {
    /// Creates an object ID from a raw value.
    #[must_use]
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    /// Returns the raw ID value.
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "obj:{}", self.0)
    }
}

/// Registry key of a transactional layer: the creator's runtime type plus its id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LayerKey {
    type_id: TypeId,
    type_name: &'static str,
    id: ObjectId,
}

impl LayerKey {
    /// Creates the key for an object of type `T` with the given id.
    #[must_use]
    pub fn of<T: ?Sized + 'static>(id: ObjectId) -> Self {
        Self {
            type_id: TypeId::of::<T>(),
            type_name: short_type_name(type_name::<T>()),
            id,
        }
    }

    /// Returns the creator id.
    #[must_use]
    pub const fn id(&self) -> ObjectId {
        self.id
    }

    /// Returns the short type name of the creator.
    #[must_use]
    pub const fn type_name(&self) -> &'static str {
        self.type_name
    }
}

impl fmt::Display for LayerKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.type_name, self.id.0)
    }
}

/// Strips module paths from a type name while keeping generic arguments readable.
fn short_type_name(full: &'static str) -> &'static str {
    let head = full.split('<').next().unwrap_or(full);
    match head.rfind("::") {
        Some(pos) => &full[pos + 2..],
        None => full,
    }
}
