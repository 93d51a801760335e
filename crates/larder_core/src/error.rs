//! Error types for Larder core.

use crate::remote::RemoteError;
use thiserror::Error;

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors that can occur in Larder core operations.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Storage backend error.
    #[error("storage error: {0}")]
    Storage(#[from] larder_storage::StorageError),

    /// A value could not be encoded for storage.
    #[error("codec error: {message}")]
    Codec {
        /// Description of the failure.
        message: String,
    },

    /// The referenced entity does not exist locally (or is tombstoned).
    #[error("entity not found: {id}")]
    NotFound {
        /// The identifier that was looked up.
        id: String,
    },

    /// No owner identifier could be resolved for the caller.
    #[error("authentication required: no current owner")]
    AuthRequired,

    /// The remote authority failed.
    #[error("remote error: {0}")]
    Remote(#[from] RemoteError),
}

impl CoreError {
    /// Creates a not-found error.
    pub fn not_found(id: impl Into<String>) -> Self {
        Self::NotFound { id: id.into() }
    }

    /// Creates a codec error.
    pub fn codec(message: impl Into<String>) -> Self {
        Self::Codec {
            message: message.into(),
        }
    }

    /// Returns true if this error is a missing-entity error.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}
