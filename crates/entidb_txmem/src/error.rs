//! Error types for the EntiDB transactional memory layer.

use crate::memory::StaleLayer;
use crate::types::TransactionId;
use std::fmt::Write;
use thiserror::Error;

/// Result type for transactional memory operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors that can occur in the transactional memory layer.
///
/// None of these are transient: every variant signals either a contract
/// violation by the calling code or corrupted input data, so callers are
/// expected to abort the surrounding transaction rather than retry.
#[derive(Debug, Error)]
pub enum CoreError {
    /// A layer was requested after the commit sequence had started.
    #[error("transaction {transaction}: layer for {creator} requested after commit began")]
    LayerCreationForbidden {
        /// Transaction whose commit is in progress.
        transaction: TransactionId,
        /// Creator that asked for the layer.
        creator: String,
    },

    /// The non-discarding merge was entered while another one was in progress.
    #[error("non-discarding merge is already in progress, nested use is not supported")]
    ReentrantMerge,

    /// Layer suppression was requested for an object that owns no layer.
    #[error("layer suppression is not supported for {creator}: it does not create layers")]
    SuppressionUnsupported {
        /// Object the suppression was requested for.
        creator: String,
    },

    /// A write was attempted against a creator whose layer is suppressed.
    #[error("{creator} is suppressed in the current scope and cannot be written")]
    LayerSuppressed {
        /// Suppressed creator.
        creator: String,
    },

    /// A layer was expected to exist but was never created.
    #[error("no transactional layer exists for {creator}")]
    MissingLayer {
        /// Creator whose layer was missing.
        creator: String,
    },

    /// Uncommitted layers were left behind when the commit finished.
    #[error("{}", stale_message(.transaction, .layers))]
    StaleTransactionalMemory {
        /// Transaction that leaked the layers.
        transaction: TransactionId,
        /// Every leaked layer, sorted by creator id.
        layers: Vec<StaleLayer>,
        /// Failure that interrupted the commit and likely caused the leak.
        #[source]
        cause: Option<Box<CoreError>>,
    },

    /// A data structure failed its consistency check.
    #[error("consistency violation: {report}")]
    ConsistencyViolation {
        /// Human readable diagnostic.
        report: String,
    },

    /// A word is bound to several values where exactly one was expected.
    #[error("there are {count} values connected with word `{word}`")]
    AmbiguousValue {
        /// The word looked up.
        word: String,
        /// Number of values bound to it.
        count: usize,
    },

    /// Operation not permitted with the given arguments or in current state.
    #[error("invalid operation: {message}")]
    InvalidOperation {
        /// Description of why operation is invalid.
        message: String,
    },
}

impl CoreError {
    /// Creates an invalid operation error.
    pub fn invalid_operation(message: impl Into<String>) -> Self {
        Self::InvalidOperation {
            message: message.into(),
        }
    }

    /// Creates a consistency violation error.
    pub fn consistency_violation(report: impl Into<String>) -> Self {
        Self::ConsistencyViolation {
            report: report.into(),
        }
    }

    /// Creates a missing layer error.
    pub fn missing_layer(creator: impl Into<String>) -> Self {
        Self::MissingLayer {
            creator: creator.into(),
        }
    }

    /// Returns the stale layers carried by this error, if any.
    #[must_use]
    pub fn stale_layers(&self) -> Option<&[StaleLayer]> {
        match self {
            Self::StaleTransactionalMemory { layers, .. } => Some(layers),
            _ => None,
        }
    }
}

fn stale_message(transaction: &TransactionId, layers: &[StaleLayer]) -> String {
    let mut message = format!(
        "transaction {transaction} left {} uncommitted layer(s) behind:",
        layers.len()
    );
    for layer in layers {
        let _ = write!(message, " {layer};");
    }
    message
}
