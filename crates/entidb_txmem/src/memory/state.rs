//! Layer lifecycle state.

use crate::types::{LayerKey, ObjectId};
use std::any::Any;
use std::fmt;

/// Lifecycle of a registered layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LayerState {
    /// Layer is open and may be written again.
    Alive,
    /// Layer has been merged or otherwise consumed.
    Discarded,
}

/// Registry entry: a type-erased diff plus its lifecycle tag.
pub(crate) struct LayerWrapper {
    /// `None` while the layer is lent out to a merge or after it was discarded.
    layer: Option<Box<dyn Any + Send + Sync>>,
    state: LayerState,
}

impl LayerWrapper {
    pub(crate) fn alive(layer: Box<dyn Any + Send + Sync>) -> Self {
        Self {
            layer: Some(layer),
            state: LayerState::Alive,
        }
    }

    pub(crate) fn discarded() -> Self {
        Self {
            layer: None,
            state: LayerState::Discarded,
        }
    }

    pub(crate) fn state(&self) -> LayerState {
        self.state
    }

    pub(crate) fn is_alive(&self) -> bool {
        self.state == LayerState::Alive
    }

    pub(crate) fn layer(&self) -> Option<&(dyn Any + Send + Sync)> {
        if self.is_alive() {
            self.layer.as_deref()
        } else {
            None
        }
    }

    pub(crate) fn layer_mut(&mut self) -> Option<&mut (dyn Any + Send + Sync)> {
        if self.is_alive() {
            self.layer.as_deref_mut()
        } else {
            None
        }
    }

    pub(crate) fn take(&mut self) -> Option<Box<dyn Any + Send + Sync>> {
        if self.is_alive() {
            self.layer.take()
        } else {
            None
        }
    }

    pub(crate) fn into_layer(self) -> Option<Box<dyn Any + Send + Sync>> {
        self.layer
    }
}

/// Identification of a layer left alive when a commit finished.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StaleLayer {
    type_name: &'static str,
    id: ObjectId,
}

impl StaleLayer {
    /// Creates a new stale layer record.
    #[must_use]
    pub fn new(type_name: &'static str, id: ObjectId) -> Self {
        Self { type_name, id }
    }

    /// Returns the short type name of the leaking creator.
    #[must_use]
    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    /// Returns the id of the leaking creator.
    #[must_use]
    pub fn id(&self) -> ObjectId {
        self.id
    }
}

impl From<&LayerKey> for StaleLayer {
    fn from(key: &LayerKey) -> Self {
        Self::new(key.type_name(), key.id())
    }
}

impl fmt::Display for StaleLayer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.type_name, self.id.as_u64())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alive_wrapper_lends_layer() {
        let mut wrapper = LayerWrapper::alive(Box::new(5u32));
        assert!(wrapper.is_alive());
        assert_eq!(wrapper.layer().and_then(|l| l.downcast_ref::<u32>()), Some(&5));

        let taken = wrapper.take().expect("layer present");
        assert!(wrapper.layer().is_none());
        assert_eq!(taken.downcast_ref::<u32>(), Some(&5));
    }

    #[test]
    fn discarded_wrapper_hides_layer() {
        let mut wrapper = LayerWrapper::discarded();
        assert_eq!(wrapper.state(), LayerState::Discarded);
        assert!(wrapper.layer_mut().is_none());
        assert!(wrapper.take().is_none());
    }

    #[test]
    fn stale_layer_display() {
        assert_eq!(StaleLayer::new("Flag", ObjectId::new(12)).to_string(), "Flag#12");
    }
}
