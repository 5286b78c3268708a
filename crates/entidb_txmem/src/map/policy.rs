//! How a transactional map treats its values on merge and release.

use crate::error::CoreResult;
use crate::memory::{LayerMaintainer, LayerProducer};
use crate::types::LayerKey;

/// Value handling strategy of a [`TransactionalMap`](super::TransactionalMap).
///
/// Plain values are copied as they are. Values that are themselves
/// transactional producers are merged recursively and have their layers
/// released when they leave the map.
pub trait ValuePolicy<V>: Send + Sync + 'static {
    /// True when values may own layers of their own.
    const NESTED: bool;

    /// Produces the committed copy of `value`.
    ///
    /// # Errors
    ///
    /// Propagates nested merge failures.
    fn merge_value(value: &V, maintainer: &mut LayerMaintainer) -> CoreResult<V>;

    /// Returns true when `merged` is the unchanged `original`.
    fn is_same(original: &V, merged: &V) -> bool;

    /// Drops every layer owned by `value`.
    fn release_value(value: &V, maintainer: &mut LayerMaintainer);

    /// Appends the registry keys of every creator reachable from `value`.
    fn collect_keys(value: &V, keys: &mut Vec<LayerKey>);
}

/// Values are plain data.
#[derive(Debug, Clone, Copy, Default)]
pub struct PlainValues;

impl<V: Clone> ValuePolicy<V> for PlainValues {
    const NESTED: bool = false;

    fn merge_value(value: &V, _maintainer: &mut LayerMaintainer) -> CoreResult<V> {
        Ok(value.clone())
    }

    fn is_same(_original: &V, _merged: &V) -> bool {
        true
    }

    fn release_value(_value: &V, _maintainer: &mut LayerMaintainer) {}

    fn collect_keys(_value: &V, _keys: &mut Vec<LayerKey>) {}
}

/// Values are transactional producers whose snapshot is their own type.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProducerValues;

impl<V> ValuePolicy<V> for ProducerValues
where
    V: LayerProducer<Snapshot = V>,
{
    const NESTED: bool = true;

    fn merge_value(value: &V, maintainer: &mut LayerMaintainer) -> CoreResult<V> {
        maintainer.get_state_copy_with_committed_changes(value)
    }

    fn is_same(original: &V, merged: &V) -> bool {
        original.id() == merged.id()
    }

    fn release_value(value: &V, maintainer: &mut LayerMaintainer) {
        value.remove_layer(maintainer);
    }

    fn collect_keys(value: &V, keys: &mut Vec<LayerKey>) {
        keys.push(value.layer_key());
        if let Some(nested) = value.as_creator_maintainer() {
            keys.extend(nested.maintained_creators());
        }
    }
}
