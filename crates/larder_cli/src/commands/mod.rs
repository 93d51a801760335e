//! CLI command implementations.

pub mod dump_pending;
pub mod inspect;
pub mod repair;
pub mod verify;

use larder_core::{
    codec, CoreError, EntityCollection, PendingOperation, SyncableItem, PENDING_OPERATIONS_KEY,
};
use larder_storage::{FileStore, KvStore, StorageError};
use larder_sync_engine::{SyncMetadata, SYNC_METADATA_KEY};
use serde::de::DeserializeOwned;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;

/// Errors reported by CLI commands.
#[derive(Debug, Error)]
pub enum CliError {
    /// The path is not a larder data directory.
    #[error("no larder data directory at {0}")]
    NoLarder(PathBuf),

    /// The requested entity type has no collection.
    #[error("no collection for entity type '{0}'")]
    UnknownEntityType(String),

    /// A blob does not decode.
    #[error("blob '{key}' is corrupted: {message}")]
    Corrupted {
        /// Storage key of the blob.
        key: String,
        /// Decoder message.
        message: String,
    },

    /// Verification found problems.
    #[error("verification failed with {0} issue(s)")]
    VerificationFailed(usize),

    /// Storage failure.
    #[error(transparent)]
    Storage(#[from] StorageError),

    /// Cache failure.
    #[error(transparent)]
    Core(#[from] CoreError),

    /// JSON output failure.
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

/// Result type for CLI commands.
pub type CliResult<T> = Result<T, CliError>;

/// A larder data directory opened for diagnostics.
///
/// Blobs are decoded strictly: a corrupted blob is reported, never reset.
pub struct DataDir {
    store: Arc<dyn KvStore>,
}

impl DataDir {
    /// Opens the directory at `path`, which must already exist.
    pub fn open(path: &Path) -> CliResult<Self> {
        if !path.is_dir() {
            return Err(CliError::NoLarder(path.to_path_buf()));
        }
        let store: Arc<dyn KvStore> = Arc::new(FileStore::open(path)?);
        Ok(Self::from_store(store))
    }

    /// Wraps an already opened store.
    pub fn from_store(store: Arc<dyn KvStore>) -> Self {
        Self { store }
    }

    /// Returns the underlying store.
    pub fn store(&self) -> &Arc<dyn KvStore> {
        &self.store
    }

    /// Returns every entity type with a collection blob, sorted.
    pub fn entity_types(&self) -> CliResult<Vec<String>> {
        let mut types: Vec<String> = self
            .store
            .keys()?
            .iter()
            .filter_map(|key| EntityCollection::entity_type_of(key))
            .map(str::to_string)
            .collect();
        types.sort();
        Ok(types)
    }

    /// Resolves the entity types a command should look at.
    pub fn select_types(&self, entity_type: Option<&str>) -> CliResult<Vec<String>> {
        let types = self.entity_types()?;
        match entity_type {
            None => Ok(types),
            Some(wanted) if types.iter().any(|t| t == wanted) => Ok(vec![wanted.to_string()]),
            Some(wanted) => Err(CliError::UnknownEntityType(wanted.to_string())),
        }
    }

    /// Reads the items of `entity_type`.
    pub fn items(&self, entity_type: &str) -> CliResult<Vec<SyncableItem>> {
        self.read_blob(&EntityCollection::storage_key(entity_type))
    }

    /// Reads the pending operation log.
    pub fn operations(&self) -> CliResult<Vec<PendingOperation>> {
        self.read_blob(PENDING_OPERATIONS_KEY)
    }

    /// Reads the sync metadata.
    pub fn metadata(&self) -> CliResult<SyncMetadata> {
        self.read_blob(SYNC_METADATA_KEY)
    }

    fn read_blob<T: DeserializeOwned + Default>(&self, key: &str) -> CliResult<T> {
        let Some(bytes) = self.store.get(key)? else {
            return Ok(T::default());
        };
        codec::decode(&bytes).map_err(|err| CliError::Corrupted {
            key: key.to_string(),
            message: err.to_string(),
        })
    }
}

/// Output format of listing commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum Format {
    /// Human-readable text.
    Text,
    /// Pretty-printed JSON.
    Json,
}
