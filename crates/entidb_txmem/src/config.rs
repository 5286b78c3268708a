//! Transactional memory configuration.

/// Configuration for a [`TransactionalMemory`](crate::memory::TransactionalMemory).
#[derive(Debug, Clone)]
pub struct MemoryConfig {
    /// Number of layers the registry reserves room for up front.
    pub initial_layer_capacity: usize,

    /// Maximum number of nested layer suppression scopes.
    pub max_suppression_depth: usize,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            initial_layer_capacity: 32,
            max_suppression_depth: 64,
        }
    }
}

impl MemoryConfig {
    /// Creates a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the initial registry capacity.
    #[must_use]
    pub const fn initial_layer_capacity(mut self, capacity: usize) -> Self {
        self.initial_layer_capacity = capacity;
        self
    }

    /// Sets the maximum nesting of suppression scopes.
    #[must_use]
    pub const fn max_suppression_depth(mut self, depth: usize) -> Self {
        self.max_suppression_depth = depth;
        self
    }
}
