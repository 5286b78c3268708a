//! Published snapshot references.
//!
//! A [`SnapshotCell`] holds the currently published version of a
//! transactional structure. Transactions read it with [`SnapshotCell::load`],
//! write through their own [`TransactionalMemory`](crate::TransactionalMemory)
//! and register a [`SnapshotConsumer`] that merges the diff at commit time.
//! The new version becomes visible with a single reference swap, and only
//! when the whole commit succeeded.

use crate::error::CoreResult;
use crate::memory::{LayerConsumer, LayerMaintainer, LayerProducer};
use crate::types::ObjectId;
use parking_lot::RwLock;
use std::sync::Arc;
use tracing::{trace, warn};

/// Shared holder of the latest committed snapshot.
pub struct SnapshotCell<P> {
    current: Arc<RwLock<P>>,
}

impl<P> Clone for SnapshotCell<P> {
    fn clone(&self) -> Self {
        Self {
            current: Arc::clone(&self.current),
        }
    }
}

impl<P: std::fmt::Debug> std::fmt::Debug for SnapshotCell<P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SnapshotCell")
            .field("current", &*self.current.read())
            .finish()
    }
}

impl<P> SnapshotCell<P>
where
    P: LayerProducer<Snapshot = P> + Clone + Send + Sync,
{
    /// Publishes `initial` as the first version.
    pub fn new(initial: P) -> Self {
        Self {
            current: Arc::new(RwLock::new(initial)),
        }
    }

    /// Returns the published snapshot.
    ///
    /// Snapshots share their storage, so this is a cheap clone.
    #[must_use]
    pub fn load(&self) -> P {
        self.current.read().clone()
    }

    /// Creates a consumer merging the diff of the currently published version.
    #[must_use]
    pub fn consumer(&self) -> SnapshotConsumer<P> {
        SnapshotConsumer {
            cell: self.clone(),
            source: self.load(),
            staged: None,
        }
    }

    fn store(&self, next: P, source_id: ObjectId) {
        let mut current = self.current.write();
        if current.id() != source_id {
            warn!(
                replaced = %current.id(),
                source = %source_id,
                "publishing over a snapshot committed concurrently"
            );
        }
        *current = next;
    }
}

/// Commit-time consumer of a single [`SnapshotCell`].
///
/// Collecting merges the transaction's diff onto the snapshot that was
/// published when the consumer was created and stages the result; publishing
/// swaps it into the cell.
pub struct SnapshotConsumer<P> {
    cell: SnapshotCell<P>,
    source: P,
    staged: Option<P>,
}

impl<P> SnapshotConsumer<P> {
    /// Returns the snapshot staged by the last collection, if any.
    #[must_use]
    pub fn staged(&self) -> Option<&P> {
        self.staged.as_ref()
    }
}

impl<P> LayerConsumer for SnapshotConsumer<P>
where
    P: LayerProducer<Snapshot = P> + Clone + Send + Sync,
{
    fn collect_transactional_changes(&mut self, maintainer: &mut LayerMaintainer) -> CoreResult<()> {
        let merged = maintainer.get_state_copy_with_committed_changes(&self.source)?;
        trace!(source = %self.source.id(), merged = %merged.id(), "staged snapshot");
        self.staged = Some(merged);
        Ok(())
    }

    fn publish(&mut self) {
        if let Some(next) = self.staged.take() {
            self.cell.store(next, self.source.id());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CoreError;
    use crate::map::TransactionalMap;
    use crate::memory::TransactionalMemory;
    use crate::types::TransactionId;

    type Map = TransactionalMap<String, i32>;

    fn cell() -> SnapshotCell<Map> {
        SnapshotCell::new(Map::from_iter([("a".to_string(), 1)]))
    }

    #[test]
    fn commit_publishes_new_version() {
        let cell = cell();
        let mut mem = TransactionalMemory::new(TransactionId::new(1));
        let map = cell.load();
        map.put(&mut mem, "b".to_string(), 2).unwrap();
        mem.register_consumer(cell.consumer());

        assert_eq!(cell.load().get(&mem_view(), "b"), None);
        mem.commit().unwrap();

        let published = cell.load();
        assert_eq!(published.len(&mem_view()), 2);
        assert_eq!(published.get(&mem_view(), "b"), Some(&2));
    }

    #[test]
    fn rollback_leaves_cell_untouched() {
        let cell = cell();
        let before = cell.load();
        let mut mem = TransactionalMemory::new(TransactionId::new(2));
        before.put(&mut mem, "x".to_string(), 9).unwrap();
        mem.rollback();

        assert!(cell.load().ptr_eq(&before));
    }

    #[test]
    fn failed_commit_does_not_publish() {
        let cell = cell();
        let before = cell.load();
        let stray = Map::new();

        let mut mem = TransactionalMemory::new(TransactionId::new(3));
        before.put(&mut mem, "b".to_string(), 2).unwrap();
        stray.put(&mut mem, "leak".to_string(), 0).unwrap();
        mem.register_consumer(cell.consumer());

        let err = mem.commit().unwrap_err();
        assert!(matches!(err, CoreError::StaleTransactionalMemory { .. }));
        assert!(cell.load().ptr_eq(&before));
    }

    #[test]
    fn untouched_snapshot_is_republished_as_is() {
        let cell = cell();
        let before = cell.load();
        let mut mem = TransactionalMemory::new(TransactionId::new(4));
        mem.register_consumer(cell.consumer());
        mem.commit().unwrap();

        assert!(cell.load().ptr_eq(&before));
    }

    fn mem_view() -> TransactionalMemory {
        TransactionalMemory::new(TransactionId::new(0))
    }
}
