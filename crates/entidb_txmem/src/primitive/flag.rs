//! Transactional boolean.

use crate::error::CoreResult;
use crate::memory::{LayerCreator, LayerMaintainer, LayerProducer, TransactionalMemory};
use crate::types::ObjectId;
use crate::version::next_object_id;

/// A boolean whose writes are isolated per transaction.
#[derive(Debug, Clone)]
pub struct TransactionalFlag {
    id: ObjectId,
    value: bool,
}

/// Pending value of a [`TransactionalFlag`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlagChange {
    value: bool,
}

impl TransactionalFlag {
    /// Creates a flag with the given committed value.
    #[must_use]
    pub fn new(value: bool) -> Self {
        Self {
            id: next_object_id(),
            value,
        }
    }

    /// Returns the committed value, ignoring any pending change.
    #[must_use]
    pub fn committed(&self) -> bool {
        self.value
    }

    /// Returns the value visible in `memory`.
    #[must_use]
    pub fn get(&self, memory: &TransactionalMemory) -> bool {
        memory
            .get_layer_if_exists(self)
            .map_or(self.value, |change| change.value)
    }

    /// Sets the value for the current transaction.
    ///
    /// # Errors
    ///
    /// Fails when no layer can be opened.
    pub fn set(&self, memory: &mut TransactionalMemory, value: bool) -> CoreResult<()> {
        memory.get_or_create_layer(self)?.value = value;
        Ok(())
    }

    /// Sets the value to `true`.
    ///
    /// # Errors
    ///
    /// Fails when no layer can be opened.
    pub fn set_to_true(&self, memory: &mut TransactionalMemory) -> CoreResult<()> {
        self.set(memory, true)
    }

    /// Sets the value to `false`.
    ///
    /// # Errors
    ///
    /// Fails when no layer can be opened.
    pub fn set_to_false(&self, memory: &mut TransactionalMemory) -> CoreResult<()> {
        self.set(memory, false)
    }
}

impl LayerCreator for TransactionalFlag {
    type Layer = FlagChange;

    fn id(&self) -> ObjectId {
        self.id
    }

    fn create_layer(&self) -> FlagChange {
        FlagChange { value: self.value }
    }
}

impl LayerProducer for TransactionalFlag {
    type Snapshot = bool;

    fn create_copy_with_merged_layer(
        &self,
        layer: Option<&FlagChange>,
        _maintainer: &mut LayerMaintainer,
    ) -> CoreResult<bool> {
        Ok(layer.map_or(self.value, |change| change.value))
    }

    fn remove_layer(&self, maintainer: &mut LayerMaintainer) {
        maintainer.remove_layer_if_exists(self);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::TransactionId;

    #[test]
    fn writes_are_isolated() {
        let flag = TransactionalFlag::new(false);
        let mut t1 = TransactionalMemory::new(TransactionId::new(1));
        let t2 = TransactionalMemory::new(TransactionId::new(2));

        flag.set_to_true(&mut t1).unwrap();
        assert!(flag.get(&t1));
        assert!(!flag.get(&t2));
        assert!(!flag.committed());
    }

    #[test]
    fn merge_reflects_layer() {
        let flag = TransactionalFlag::new(true);
        let mut memory = TransactionalMemory::new(TransactionId::new(1));
        assert!(memory.get_state_copy_with_committed_changes(&flag).unwrap());

        flag.set_to_false(&mut memory).unwrap();
        assert!(!memory.get_state_copy_with_committed_changes(&flag).unwrap());
        memory.commit().unwrap();
    }
}
