//! Transaction-scoped entry point to the layer registry.

use crate::config::MemoryConfig;
use crate::error::{CoreError, CoreResult};
use crate::memory::maintainer::LayerMaintainer;
use crate::memory::traits::{LayerConsumer, LayerCreator, LayerProducer, VoidLayer};
use crate::types::{LayerKey, TransactionId};
use std::any::TypeId;
use std::collections::HashSet;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use tracing::trace;

/// The transactional memory of one transaction.
///
/// Every transactional collection takes a `&TransactionalMemory` for reads
/// and a `&mut TransactionalMemory` for writes. Owning the memory means
/// owning the transaction: [`commit`](Self::commit) and
/// [`rollback`](Self::rollback) consume it.
///
/// On top of the registry the memory keeps a stack of suppression scopes.
/// While a creator is suppressed its layer is invisible to reads, so the
/// creator behaves as its committed base.
#[derive(Debug)]
pub struct TransactionalMemory {
    maintainer: LayerMaintainer,
    suppressed: Vec<HashSet<LayerKey>>,
    config: MemoryConfig,
}

impl TransactionalMemory {
    /// Creates the memory of a new transaction with default configuration.
    #[must_use]
    pub fn new(transaction_id: TransactionId) -> Self {
        Self::with_config(transaction_id, MemoryConfig::default())
    }

    /// Creates the memory of a new transaction.
    #[must_use]
    pub fn with_config(transaction_id: TransactionId, config: MemoryConfig) -> Self {
        Self {
            maintainer: LayerMaintainer::with_config(transaction_id, &config),
            suppressed: Vec::new(),
            config,
        }
    }

    /// Creates the memory of a nested transaction reading through `parent`.
    #[must_use]
    pub fn with_parent(transaction_id: TransactionId, parent: Arc<LayerMaintainer>) -> Self {
        Self {
            maintainer: LayerMaintainer::with_parent(transaction_id, parent),
            suppressed: Vec::new(),
            config: MemoryConfig::default(),
        }
    }

    /// Returns the owning transaction.
    #[must_use]
    pub fn transaction_id(&self) -> TransactionId {
        self.maintainer.transaction_id()
    }

    /// Returns the configuration.
    #[must_use]
    pub fn config(&self) -> &MemoryConfig {
        &self.config
    }

    /// Returns the underlying registry.
    #[must_use]
    pub fn maintainer(&self) -> &LayerMaintainer {
        &self.maintainer
    }

    /// Returns the underlying registry mutably.
    pub fn maintainer_mut(&mut self) -> &mut LayerMaintainer {
        &mut self.maintainer
    }

    /// Returns true when `key` is hidden by an enclosing suppression scope.
    #[must_use]
    pub fn is_suppressed(&self, key: &LayerKey) -> bool {
        self.suppressed.iter().any(|scope| scope.contains(key))
    }

    /// Returns the current suppression nesting depth.
    #[must_use]
    pub fn suppression_depth(&self) -> usize {
        self.suppressed.len()
    }

    /// Returns `creator`'s layer unless it is absent or suppressed.
    #[must_use]
    pub fn get_layer_if_exists<C: LayerCreator>(&self, creator: &C) -> Option<&C::Layer> {
        if self.is_suppressed(&creator.layer_key()) {
            return None;
        }
        self.maintainer.get_layer_if_exists(creator)
    }

    /// Returns `creator`'s layer, creating it if needed.
    ///
    /// # Errors
    ///
    /// Fails with [`CoreError::LayerSuppressed`] inside a suppression scope
    /// covering `creator`, or with [`CoreError::LayerCreationForbidden`]
    /// once the commit began.
    pub fn get_or_create_layer<C: LayerCreator>(&mut self, creator: &C) -> CoreResult<&mut C::Layer> {
        let key = creator.layer_key();
        if self.is_suppressed(&key) {
            return Err(CoreError::LayerSuppressed {
                creator: key.to_string(),
            });
        }
        self.maintainer.get_or_create_layer(creator)
    }

    /// Runs `f` with `creator` and every creator it maintains made invisible.
    ///
    /// The scope is popped even if `f` panics.
    ///
    /// # Errors
    ///
    /// Fails with [`CoreError::SuppressionUnsupported`] when `creator` neither
    /// owns a layer nor maintains nested creators, and with
    /// [`CoreError::InvalidOperation`] when the configured nesting depth is
    /// exceeded.
    pub fn suppress_layers_for<C, R, F>(&mut self, creator: &C, f: F) -> CoreResult<R>
    where
        C: LayerCreator,
        F: FnOnce(&mut Self) -> R,
    {
        let key = creator.layer_key();
        let maintained = creator
            .as_creator_maintainer()
            .map(|m| m.maintained_creators())
            .unwrap_or_default();
        if TypeId::of::<C::Layer>() == TypeId::of::<VoidLayer>() && maintained.is_empty() {
            return Err(CoreError::SuppressionUnsupported {
                creator: key.to_string(),
            });
        }
        if self.suppressed.len() >= self.config.max_suppression_depth {
            return Err(CoreError::invalid_operation(format!(
                "suppression depth limit of {} reached",
                self.config.max_suppression_depth
            )));
        }

        let mut scope: HashSet<LayerKey> = maintained.into_iter().collect();
        scope.insert(key);
        trace!(creator = %key, suppressed = scope.len(), "entering suppression scope");
        self.suppressed.push(scope);

        let outcome = panic::catch_unwind(AssertUnwindSafe(|| f(&mut *self)));
        self.suppressed.pop();
        match outcome {
            Ok(value) => Ok(value),
            Err(payload) => panic::resume_unwind(payload),
        }
    }

    /// Merges `producer`'s layer and discards it.
    ///
    /// # Errors
    ///
    /// Propagates merge errors.
    pub fn get_state_copy_with_committed_changes<P: LayerProducer>(
        &mut self,
        producer: &P,
    ) -> CoreResult<P::Snapshot> {
        self.maintainer.get_state_copy_with_committed_changes(producer)
    }

    /// Merges `producer`'s layer while keeping every layer alive.
    ///
    /// # Errors
    ///
    /// Fails with [`CoreError::ReentrantMerge`] when nested.
    pub fn get_state_copy_with_committed_changes_without_discarding<P: LayerProducer>(
        &mut self,
        producer: &P,
    ) -> CoreResult<P::Snapshot> {
        self.maintainer
            .get_state_copy_with_committed_changes_without_discarding(producer)
    }

    /// Registers a consumer to be driven on commit.
    pub fn register_consumer<L: LayerConsumer + 'static>(&mut self, consumer: L) {
        self.maintainer.register_consumer(Box::new(consumer));
    }

    /// Commits the transaction.
    ///
    /// # Errors
    ///
    /// See [`LayerMaintainer::commit`].
    pub fn commit(self) -> CoreResult<()> {
        self.maintainer.commit()
    }

    /// Abandons the transaction, dropping every layer.
    pub fn rollback(self) {
        self.maintainer.rollback();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::traits::CreatorMaintainer;
    use crate::types::ObjectId;
    use crate::version::next_object_id;

    struct Cell {
        id: ObjectId,
    }

    impl LayerCreator for Cell {
        type Layer = Vec<u32>;

        fn id(&self) -> ObjectId {
            self.id
        }

        fn create_layer(&self) -> Vec<u32> {
            Vec::new()
        }
    }

    struct Group {
        id: ObjectId,
        cells: Vec<Cell>,
    }

    impl LayerCreator for Group {
        type Layer = VoidLayer;

        fn id(&self) -> ObjectId {
            self.id
        }

        fn create_layer(&self) {}

        fn as_creator_maintainer(&self) -> Option<&dyn CreatorMaintainer> {
            Some(self)
        }
    }

    impl CreatorMaintainer for Group {
        fn maintained_creators(&self) -> Vec<LayerKey> {
            self.cells.iter().map(LayerCreator::layer_key).collect()
        }
    }

    struct Empty {
        id: ObjectId,
    }

    impl LayerCreator for Empty {
        type Layer = VoidLayer;

        fn id(&self) -> ObjectId {
            self.id
        }

        fn create_layer(&self) {}
    }

    fn cell() -> Cell {
        Cell {
            id: next_object_id(),
        }
    }

    fn memory() -> TransactionalMemory {
        TransactionalMemory::new(TransactionId::new(1))
    }

    #[test]
    fn suppression_hides_layer() {
        let cell = cell();
        let mut memory = memory();
        memory.get_or_create_layer(&cell).unwrap().push(1);

        let seen = memory
            .suppress_layers_for(&cell, |m| m.get_layer_if_exists(&cell).cloned())
            .unwrap();
        assert_eq!(seen, None);
        assert_eq!(memory.get_layer_if_exists(&cell), Some(&vec![1]));
        assert_eq!(memory.suppression_depth(), 0);
    }

    #[test]
    fn suppressed_creator_rejects_writes() {
        let cell = cell();
        let mut memory = memory();
        let result = memory
            .suppress_layers_for(&cell, |m| m.get_or_create_layer(&cell).map(|_| ()))
            .unwrap();
        assert!(matches!(result, Err(CoreError::LayerSuppressed { .. })));
    }

    #[test]
    fn suppression_covers_maintained_creators() {
        let group = Group {
            id: next_object_id(),
            cells: vec![cell(), cell()],
        };
        let outsider = cell();
        let mut memory = memory();
        for c in &group.cells {
            memory.get_or_create_layer(c).unwrap().push(7);
        }
        memory.get_or_create_layer(&outsider).unwrap().push(8);

        memory
            .suppress_layers_for(&group, |m| {
                assert!(group.cells.iter().all(|c| m.get_layer_if_exists(c).is_none()));
                assert!(m.get_layer_if_exists(&outsider).is_some());
            })
            .unwrap();
        assert!(group.cells.iter().all(|c| memory.get_layer_if_exists(c).is_some()));
    }

    #[test]
    fn void_creator_without_children_cannot_be_suppressed() {
        let mut memory = memory();
        let empty = Empty {
            id: next_object_id(),
        };
        assert!(matches!(
            memory.suppress_layers_for(&empty, |_| ()),
            Err(CoreError::SuppressionUnsupported { .. })
        ));
    }

    #[test]
    fn nested_scopes_respect_depth_limit() {
        let cell = cell();
        let mut memory = TransactionalMemory::with_config(
            TransactionId::new(1),
            MemoryConfig::new().max_suppression_depth(1),
        );
        let inner = memory
            .suppress_layers_for(&cell, |m| m.suppress_layers_for(&cell, |_| ()))
            .unwrap();
        assert!(matches!(inner, Err(CoreError::InvalidOperation { .. })));
    }

    #[test]
    fn scope_is_popped_on_panic() {
        let cell = cell();
        let mut memory = memory();
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
            let _ = memory.suppress_layers_for(&cell, |_| panic!("boom"));
        }));
        assert!(outcome.is_err());
        assert_eq!(memory.suppression_depth(), 0);
    }

    #[test]
    fn commit_without_layers_succeeds() {
        memory().commit().unwrap();
    }
}
