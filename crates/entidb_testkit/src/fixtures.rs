//! Test fixtures for transactional structures.
//!
//! Provides helpers running a transaction body against a snapshot and
//! handing the resulting state to a verification closure.

use entidb_txmem::{
    CoreResult, InvertedIndex, LayerProducer, SnapshotCell, TransactionId, TransactionalMap,
    TransactionalMemory,
};
use std::sync::atomic::{AtomicU64, Ordering};

static NEXT_TRANSACTION: AtomicU64 = AtomicU64::new(1);

/// Returns an empty memory with a process-unique transaction id.
#[must_use]
pub fn fresh_memory() -> TransactionalMemory {
    TransactionalMemory::new(TransactionId::new(
        NEXT_TRANSACTION.fetch_add(1, Ordering::Relaxed),
    ))
}

/// Runs `body` in a transaction over `original`, commits it and calls
/// `verify` with the committed snapshot, the untouched original and a fresh
/// reader memory.
///
/// # Panics
///
/// Panics if the body or the commit fails.
pub fn assert_state_after_commit<P, B, V>(original: P, body: B, verify: V)
where
    P: LayerProducer<Snapshot = P> + Clone + Send + Sync,
    B: FnOnce(&P, &mut TransactionalMemory) -> CoreResult<()>,
    V: FnOnce(&P, &P, &TransactionalMemory),
{
    let cell = SnapshotCell::new(original.clone());
    let mut memory = fresh_memory();
    body(&original, &mut memory).expect("transaction body failed");
    memory.register_consumer(cell.consumer());
    memory.commit().expect("commit failed");

    let reader = fresh_memory();
    verify(&cell.load(), &original, &reader);
}

/// Runs `body` in a transaction over `original`, rolls it back and calls
/// `verify` with the original and a fresh reader memory.
///
/// # Panics
///
/// Panics if the body fails.
pub fn assert_state_after_rollback<P, B, V>(original: P, body: B, verify: V)
where
    P: LayerProducer<Snapshot = P> + Clone + Send + Sync,
    B: FnOnce(&P, &mut TransactionalMemory) -> CoreResult<()>,
    V: FnOnce(&P, &TransactionalMemory),
{
    let cell = SnapshotCell::new(original.clone());
    let mut memory = fresh_memory();
    body(&original, &mut memory).expect("transaction body failed");
    memory.rollback();

    let reader = fresh_memory();
    let current = cell.load();
    assert!(
        current.id() == original.id(),
        "rollback must not publish a new snapshot"
    );
    verify(&current, &reader);
}

/// Prepared structures for tests.
pub mod scenarios {
    use super::*;

    /// Creates a map of `count` entries mapping `i` to `i * 10`.
    #[must_use]
    pub fn populated_map(count: u32) -> TransactionalMap<u32, u32> {
        (0..count).map(|i| (i, i * 10)).collect()
    }

    /// Creates a natural-order index with one bucket per value, each holding
    /// the record ids `value * 10 .. value * 10 + 3`.
    #[must_use]
    pub fn populated_index(values: &[i32]) -> InvertedIndex<i32> {
        let index = InvertedIndex::natural();
        let mut memory = fresh_memory();
        for value in values {
            let base = u32::try_from(*value).unwrap_or(0) * 10;
            index
                .add_record(&mut memory, value, &[base, base + 1, base + 2])
                .expect("add to fresh index");
        }
        let merged = memory
            .get_state_copy_with_committed_changes(&index)
            .expect("merge fresh index");
        memory.commit().expect("commit fresh index");
        merged
    }
}
