//! Process-wide object id sequence.

use crate::types::ObjectId;
use std::sync::atomic::{AtomicU64, Ordering};

/// Monotonic id generator shared by every transactional object in the process.
///
/// Ids start at 1 and are never reused, so a layer key stays unambiguous for
/// as long as any transaction may still refer to it.
pub struct ObjectVersion {
    next: AtomicU64,
}

/// The global sequence.
pub static SEQUENCE: ObjectVersion = ObjectVersion::new();

impl ObjectVersion {
    const fn new() -> Self {
        Self {
            next: AtomicU64::new(1),
        }
    }

    /// Returns the next unused id.
    pub fn next_id(&self) -> ObjectId {
        ObjectId::new(self.next.fetch_add(1, Ordering::Relaxed))
    }
}

/// Shorthand for `SEQUENCE.next_id()`.
pub fn next_object_id() -> ObjectId {
    SEQUENCE.next_id()
}
