//! Capability traits implemented by transactional data structures.

use crate::error::CoreResult;
use crate::memory::LayerMaintainer;
use crate::types::{LayerKey, ObjectId};
use std::any::Any;

/// Layer type of producers that never record changes of their own.
///
/// Composite structures whose state lives entirely in nested creators use
/// this as their [`LayerCreator::Layer`].
pub type VoidLayer = ();

/// A mutable structure able to start a transactional layer (diff) for itself.
///
/// Reads consult the layer first and fall back to the immutable base; writes
/// go to the layer only. The id must be stable for the lifetime of the object
/// and shared by every clone of it, because the registry keys layers by
/// `(type, id)`.
pub trait LayerCreator: 'static {
    /// The diff object recording this creator's pending changes.
    type Layer: Any + Send + Sync;

    /// Returns the stable identity of this object.
    fn id(&self) -> ObjectId;

    /// Creates a fresh, empty diff for this object.
    fn create_layer(&self) -> Self::Layer;

    /// Returns the registry key of this object.
    fn layer_key(&self) -> LayerKey {
        LayerKey::of::<Self>(self.id())
    }

    /// Exposes nested creators, if this object maintains any.
    fn as_creator_maintainer(&self) -> Option<&dyn CreatorMaintainer> {
        None
    }
}

/// An immutable snapshot able to produce a new snapshot with its diff merged in.
pub trait LayerProducer: LayerCreator {
    /// The immutable result of a merge.
    type Snapshot;

    /// Produces a new snapshot reflecting `layer` merged onto `self`.
    ///
    /// Nested producers must be resolved through
    /// [`LayerMaintainer::get_state_copy_with_committed_changes`]. When nothing
    /// changed, implementations return a snapshot sharing `self`'s id and
    /// storage so that callers can detect the no-op by identity.
    fn create_copy_with_merged_layer(
        &self,
        layer: Option<&Self::Layer>,
        maintainer: &mut LayerMaintainer,
    ) -> CoreResult<Self::Snapshot>;

    /// Drops this object's layer and the layers of everything nested in it
    /// without merging them.
    fn remove_layer(&self, maintainer: &mut LayerMaintainer);
}

/// Owner of long-lived snapshot references, driven once per commit.
pub trait LayerConsumer: Send {
    /// Merges every top-level producer this consumer owns and stages the results.
    fn collect_transactional_changes(&mut self, maintainer: &mut LayerMaintainer)
        -> CoreResult<()>;

    /// Publishes the staged snapshots.
    ///
    /// Called only after every consumer collected its changes and no stale
    /// layer was found.
    fn publish(&mut self) {}
}

/// Composite objects exposing the creators they own.
pub trait CreatorMaintainer {
    /// Returns the keys of every nested creator, transitively.
    fn maintained_creators(&self) -> Vec<LayerKey>;
}
