//! Per-transaction layer registry.

use crate::config::MemoryConfig;
use crate::error::{CoreError, CoreResult};
use crate::memory::state::{LayerState, LayerWrapper, StaleLayer};
use crate::memory::traits::{LayerConsumer, LayerCreator, LayerProducer};
use crate::types::{LayerKey, TransactionId};
use std::collections::HashMap;
use std::mem;
use std::sync::Arc;
use tracing::{debug, debug_span, error, trace, warn};

/// Registry of every layer opened by one transaction.
///
/// The maintainer owns the diffs of all transactional objects touched by a
/// transaction, the consumers that will merge them on commit, and the flags
/// driving the commit sequence:
///
/// 1. layer creation is forbidden,
/// 2. every registered consumer collects its changes,
/// 3. any layer still alive is reported as stale,
/// 4. consumers publish their staged snapshots.
///
/// A failed commit never reaches step 4, so published state stays untouched.
///
/// A child maintainer may be given a parent. Lookups that miss in the child
/// fall through to the parent; writes always create a layer in the child.
pub struct LayerMaintainer {
    transaction_id: TransactionId,
    layers: HashMap<LayerKey, LayerWrapper>,
    consumers: Vec<Box<dyn LayerConsumer>>,
    parent: Option<Arc<LayerMaintainer>>,
    allow_layer_creation: bool,
    avoid_discarding_state: bool,
}

impl LayerMaintainer {
    /// Creates an empty registry for a transaction.
    #[must_use]
    pub fn new(transaction_id: TransactionId) -> Self {
        Self::with_config(transaction_id, &MemoryConfig::default())
    }

    /// Creates an empty registry sized according to `config`.
    #[must_use]
    pub fn with_config(transaction_id: TransactionId, config: &MemoryConfig) -> Self {
        Self {
            transaction_id,
            layers: HashMap::with_capacity(config.initial_layer_capacity),
            consumers: Vec::new(),
            parent: None,
            allow_layer_creation: true,
            avoid_discarding_state: false,
        }
    }

    /// Creates a child registry whose reads fall back to `parent`.
    #[must_use]
    pub fn with_parent(transaction_id: TransactionId, parent: Arc<LayerMaintainer>) -> Self {
        let mut maintainer = Self::new(transaction_id);
        maintainer.parent = Some(parent);
        maintainer
    }

    /// Returns the owning transaction.
    #[must_use]
    pub fn transaction_id(&self) -> TransactionId {
        self.transaction_id
    }

    /// Returns the parent registry, if any.
    #[must_use]
    pub fn parent(&self) -> Option<&Arc<LayerMaintainer>> {
        self.parent.as_ref()
    }

    /// Returns true while new layers may still be created.
    #[must_use]
    pub fn allows_layer_creation(&self) -> bool {
        self.allow_layer_creation
    }

    /// Returns the number of alive layers owned by this registry.
    #[must_use]
    pub fn alive_layer_count(&self) -> usize {
        self.layers.values().filter(|w| w.is_alive()).count()
    }

    /// Returns the lifecycle state of `creator`'s layer in this registry.
    #[must_use]
    pub fn layer_state<C: LayerCreator>(&self, creator: &C) -> Option<LayerState> {
        self.layers.get(&creator.layer_key()).map(LayerWrapper::state)
    }

    /// Returns the alive layer of `creator`, consulting the parent on a miss.
    ///
    /// A layer discarded in this registry hides the parent's layer.
    #[must_use]
    pub fn get_layer_if_exists<C: LayerCreator>(&self, creator: &C) -> Option<&C::Layer> {
        match self.layers.get(&creator.layer_key()) {
            Some(wrapper) => wrapper.layer().and_then(|layer| layer.downcast_ref()),
            None => self
                .parent
                .as_deref()
                .and_then(|parent| parent.get_layer_if_exists(creator)),
        }
    }

    /// Returns the alive layer of `creator`, creating it if needed.
    ///
    /// # Errors
    ///
    /// Fails with [`CoreError::LayerCreationForbidden`] once the commit began.
    pub fn get_or_create_layer<C: LayerCreator>(&mut self, creator: &C) -> CoreResult<&mut C::Layer> {
        let key = creator.layer_key();
        let alive = self.layers.get(&key).is_some_and(|w| w.layer().is_some());
        if !alive {
            if !self.allow_layer_creation {
                return Err(CoreError::LayerCreationForbidden {
                    transaction: self.transaction_id,
                    creator: key.to_string(),
                });
            }
            trace!(layer = %key, transaction = %self.transaction_id, "creating layer");
            self.layers
                .insert(key, LayerWrapper::alive(Box::new(creator.create_layer())));
        }

        self.layers
            .get_mut(&key)
            .and_then(LayerWrapper::layer_mut)
            .and_then(|layer| layer.downcast_mut::<C::Layer>())
            .ok_or_else(|| CoreError::missing_layer(key.to_string()))
    }

    /// Removes `creator`'s layer from this registry and returns it.
    pub fn remove_layer_if_exists<C: LayerCreator>(&mut self, creator: &C) -> Option<C::Layer> {
        let key = creator.layer_key();
        let wrapper = self.layers.remove(&key)?;
        trace!(layer = %key, state = ?wrapper.state(), "removing layer");
        wrapper
            .into_layer()
            .and_then(|layer| layer.downcast::<C::Layer>().ok())
            .map(|layer| *layer)
    }

    /// Removes `creator`'s layer and returns it.
    ///
    /// # Errors
    ///
    /// Fails with [`CoreError::MissingLayer`] when no layer was registered.
    pub fn remove_layer<C: LayerCreator>(&mut self, creator: &C) -> CoreResult<C::Layer> {
        self.remove_layer_if_exists(creator)
            .ok_or_else(|| CoreError::missing_layer(creator.layer_key().to_string()))
    }

    /// Merges `producer`'s layer into a new snapshot and discards the layer.
    ///
    /// When the merge fails the layer stays alive so that the transaction
    /// can still be rolled back or reported as stale.
    ///
    /// # Errors
    ///
    /// Fails with [`CoreError::InvalidOperation`] when the layer was already
    /// merged and discarded; otherwise propagates the producer's merge error.
    pub fn get_state_copy_with_committed_changes<P: LayerProducer>(
        &mut self,
        producer: &P,
    ) -> CoreResult<P::Snapshot> {
        let key = producer.layer_key();
        if self.layer_state_of(&key) == Some(LayerState::Discarded) {
            error!(layer = %key, "merging a discarded layer");
            return Err(CoreError::invalid_operation(format!(
                "layer {key} was already merged"
            )));
        }
        let taken = self.take_layer::<P>(&key);
        let result = producer.create_copy_with_merged_layer(taken.as_deref(), self);

        if let Some(layer) = taken {
            let wrapper = if result.is_ok() && !self.avoid_discarding_state {
                trace!(layer = %key, "discarding merged layer");
                LayerWrapper::discarded()
            } else {
                LayerWrapper::alive(layer)
            };
            self.layers.insert(key, wrapper);
        }
        result
    }

    /// Like [`get_state_copy_with_committed_changes`] but leaves every merged
    /// layer alive, so the transaction can continue writing afterwards.
    ///
    /// # Errors
    ///
    /// Fails with [`CoreError::ReentrantMerge`] when called from inside another
    /// non-discarding merge; otherwise propagates merge errors.
    ///
    /// [`get_state_copy_with_committed_changes`]: Self::get_state_copy_with_committed_changes
    pub fn get_state_copy_with_committed_changes_without_discarding<P: LayerProducer>(
        &mut self,
        producer: &P,
    ) -> CoreResult<P::Snapshot> {
        if self.avoid_discarding_state {
            return Err(CoreError::ReentrantMerge);
        }
        self.avoid_discarding_state = true;
        let result = self.get_state_copy_with_committed_changes(producer);
        self.avoid_discarding_state = false;
        result
    }

    /// Registers a consumer to be driven by [`commit`](Self::commit).
    pub fn register_consumer(&mut self, consumer: Box<dyn LayerConsumer>) {
        self.consumers.push(consumer);
    }

    /// Returns the number of registered consumers.
    #[must_use]
    pub fn consumer_count(&self) -> usize {
        self.consumers.len()
    }

    /// Runs the commit sequence.
    ///
    /// # Errors
    ///
    /// Returns the first consumer error, or
    /// [`CoreError::StaleTransactionalMemory`] when layers were left alive.
    /// In both cases no consumer publishes.
    pub fn commit(mut self) -> CoreResult<()> {
        let span = debug_span!("commit", transaction = %self.transaction_id);
        let _guard = span.enter();

        self.allow_layer_creation = false;
        let mut consumers = mem::take(&mut self.consumers);
        let mut failure = None;
        for consumer in &mut consumers {
            if let Err(err) = consumer.collect_transactional_changes(&mut self) {
                error!(error = %err, "consumer failed to collect changes");
                failure = Some(err);
                break;
            }
        }

        let stale = self.stale_layers();
        if !stale.is_empty() {
            warn!(count = stale.len(), "stale transactional memory detected");
            return Err(CoreError::StaleTransactionalMemory {
                transaction: self.transaction_id,
                layers: stale,
                cause: failure.map(Box::new),
            });
        }
        if let Some(err) = failure {
            return Err(err);
        }

        for consumer in &mut consumers {
            consumer.publish();
        }
        debug!(consumers = consumers.len(), "transaction committed");
        Ok(())
    }

    /// Drops every layer without merging.
    pub fn rollback(self) {
        debug!(
            transaction = %self.transaction_id,
            layers = self.layers.len(),
            "transaction rolled back"
        );
    }

    /// Returns every alive layer, ordered by creator id.
    #[must_use]
    pub fn stale_layers(&self) -> Vec<StaleLayer> {
        let mut stale: Vec<StaleLayer> = self
            .layers
            .iter()
            .filter(|(_, wrapper)| wrapper.is_alive())
            .map(|(key, _)| StaleLayer::from(key))
            .collect();
        stale.sort_by(|a, b| a.id().cmp(&b.id()).then(a.type_name().cmp(b.type_name())));
        stale
    }

    fn layer_state_of(&self, key: &LayerKey) -> Option<LayerState> {
        self.layers.get(key).map(LayerWrapper::state)
    }

    fn take_layer<C: LayerCreator>(&mut self, key: &LayerKey) -> Option<Box<C::Layer>> {
        self.layers
            .get_mut(key)
            .and_then(LayerWrapper::take)
            .and_then(|layer| layer.downcast::<C::Layer>().ok())
    }
}

impl std::fmt::Debug for LayerMaintainer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LayerMaintainer")
            .field("transaction_id", &self.transaction_id)
            .field("layers", &self.layers.len())
            .field("consumers", &self.consumers.len())
            .field("has_parent", &self.parent.is_some())
            .field("allow_layer_creation", &self.allow_layer_creation)
            .finish()
    }
}
