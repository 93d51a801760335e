//! Error types for the sync engine.

use larder_core::{CoreError, RemoteError};
use std::time::Duration;
use thiserror::Error;

/// Result type for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Errors that can occur during sync operations.
#[derive(Error, Debug)]
pub enum SyncError {
    /// Another pass holds the guard and is not stale yet.
    #[error("sync already in progress (running for {running_for:?})")]
    AlreadyInProgress {
        /// Age of the running pass.
        running_for: Duration,
    },

    /// A remote call failed in a way a later attempt may fix.
    #[error("transient remote failure: {0}")]
    Transient(String),

    /// A remote call failed for good; the operation is dropped.
    #[error("permanent remote failure: {0}")]
    Permanent(String),

    /// Local cache or storage error.
    #[error("core error: {0}")]
    Core(#[from] CoreError),
}

impl SyncError {
    /// Returns true if this error can be retried.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transient(_))
    }
}

impl From<RemoteError> for SyncError {
    fn from(err: RemoteError) -> Self {
        if err.is_retryable() {
            Self::Transient(err.to_string())
        } else {
            Self::Permanent(err.to_string())
        }
    }
}

impl From<larder_storage::StorageError> for SyncError {
    fn from(err: larder_storage::StorageError) -> Self {
        Self::Core(CoreError::from(err))
    }
}
