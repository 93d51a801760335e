//! Test fixtures and larder helpers.
//!
//! Provides convenience functions for setting up test larders
//! and common test scenarios.

use larder_core::{MemoryRemote, Record, RecordPatch, StaticIdentity};
use larder_storage::{FileStore, InMemoryStore, KvStore};
use larder_sync_engine::{Larder, LarderConfig, RetryPolicy, SyncConfig};
use serde_json::{Map, Value};
use std::path::Path;
use std::sync::Arc;
use tempfile::TempDir;

/// Entity type used by fixtures.
pub const TEST_ENTITY_TYPE: &str = "recipes";

/// Owner used by fixtures.
pub const TEST_OWNER: &str = "alice";

/// Returns a configuration for deterministic tests.
///
/// Background sync is off and retries are immediate, so passes only run
/// when a test calls `sync_now`.
pub fn test_config() -> LarderConfig {
    LarderConfig::new()
        .entity_type(TEST_ENTITY_TYPE)
        .max_retries(3)
        .with_sync(
            SyncConfig::new()
                .with_auto_sync(false)
                .with_retry(RetryPolicy::immediate()),
        )
}

/// Builds a record patch from a JSON object.
///
/// A non-object value is stored under the `value` key.
pub fn patch(value: Value) -> RecordPatch {
    match value {
        Value::Object(map) => map,
        other => {
            let mut map = Map::new();
            map.insert("value".into(), other);
            map
        }
    }
}

/// A test larder with an in-process remote and automatic cleanup.
pub struct TestLarder {
    /// The larder instance.
    pub larder: Larder<MemoryRemote>,
    /// The remote behind the larder.
    pub remote: Arc<MemoryRemote>,
    /// The identity the cache stamps on new records.
    pub identity: Arc<StaticIdentity>,
    /// The durable store.
    pub store: Arc<dyn KvStore>,
    config: LarderConfig,
    /// The temporary directory (kept alive to prevent cleanup).
    _temp_dir: Option<TempDir>,
}

impl TestLarder {
    /// Opens a larder over an in-memory store.
    pub async fn memory() -> Self {
        Self::memory_with_config(test_config()).await
    }

    /// Opens a larder over an in-memory store with `config`.
    pub async fn memory_with_config(config: LarderConfig) -> Self {
        Self::open(config, Arc::new(InMemoryStore::new()), None).await
    }

    /// Opens a larder over a file store in a fresh temporary directory.
    pub async fn file() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let store = FileStore::open(temp_dir.path()).expect("Failed to open file store");
        Self::open(test_config(), Arc::new(store), Some(temp_dir)).await
    }

    async fn open(config: LarderConfig, store: Arc<dyn KvStore>, temp_dir: Option<TempDir>) -> Self {
        let remote = Arc::new(MemoryRemote::new());
        let identity = Arc::new(StaticIdentity::new(TEST_OWNER));
        let larder = Larder::open(
            config.clone(),
            Arc::clone(&store),
            Arc::clone(&remote),
            identity.clone(),
        )
        .await
        .expect("Failed to open larder");

        Self {
            larder,
            remote,
            identity,
            store,
            config,
            _temp_dir: temp_dir,
        }
    }

    /// Closes the larder and opens a new one over the same data and remote.
    ///
    /// File-backed larders reopen the directory, as a restarted process
    /// would.
    pub async fn reopen(self) -> Self {
        self.larder.close();
        let store: Arc<dyn KvStore> = match &self._temp_dir {
            Some(dir) => Arc::new(FileStore::open(dir.path()).expect("Failed to reopen file store")),
            None => self.store,
        };
        let larder = Larder::open(
            self.config.clone(),
            Arc::clone(&store),
            Arc::clone(&self.remote),
            self.identity.clone(),
        )
        .await
        .expect("Failed to reopen larder");

        Self {
            larder,
            remote: self.remote,
            identity: self.identity,
            store,
            config: self.config,
            _temp_dir: self._temp_dir,
        }
    }

    /// Returns the data directory if file-based, None if in-memory.
    pub fn path(&self) -> Option<&Path> {
        self._temp_dir.as_ref().map(TempDir::path)
    }

    /// Creates a record with the given name.
    pub async fn create_named(&self, name: &str) -> Record {
        self.larder
            .cache()
            .create(patch(serde_json::json!({ "name": name })))
            .await
            .expect("Failed to create record")
    }
}

impl std::ops::Deref for TestLarder {
    type Target = Larder<MemoryRemote>;

    fn deref(&self) -> &Self::Target {
        &self.larder
    }
}

/// Test scenario helpers.
pub mod scenarios {
    use super::*;

    /// Opens a larder with `count` records created while offline.
    ///
    /// The remote is left offline.
    pub async fn offline_creates(count: usize) -> (TestLarder, Vec<Record>) {
        let larder = TestLarder::memory().await;
        larder.remote.set_online(false);

        let mut records = Vec::with_capacity(count);
        for i in 0..count {
            records.push(larder.create_named(&format!("item {i}")).await);
        }
        (larder, records)
    }

    /// Opens a larder hydrated with `count` remote records.
    pub async fn hydrated(count: usize) -> TestLarder {
        let larder = TestLarder::memory().await;
        for i in 0..count {
            larder.remote.seed(
                TEST_ENTITY_TYPE,
                Record::new(format!("srv_{}", i + 1), TEST_OWNER)
                    .with_field("name", format!("remote {i}")),
            );
        }
        let records = larder
            .cache()
            .read_all(TEST_OWNER)
            .await
            .expect("Failed to hydrate");
        assert_eq!(records.len(), count);
        larder
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_memory_larder() {
        let larder = TestLarder::memory().await;
        assert!(larder.path().is_none());
        let record = larder.create_named("A").await;
        assert_eq!(record.owner_id, TEST_OWNER);
    }

    #[tokio::test]
    async fn test_file_larder_reopens() {
        let larder = TestLarder::file().await;
        assert!(larder.path().is_some());
        let record = larder.create_named("kept").await;

        let larder = larder.reopen().await;
        let pending = larder.cache().pending_operations().await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].entity_id, record.id);
    }

    #[tokio::test]
    async fn test_offline_scenario() {
        let (larder, records) = scenarios::offline_creates(3).await;
        assert_eq!(records.len(), 3);
        assert!(!larder.remote.is_online());
        assert_eq!(larder.cache().read_all(TEST_OWNER).await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_hydrated_scenario() {
        let larder = scenarios::hydrated(2).await;
        assert!(larder.cache().pending_operations().await.unwrap().is_empty());
    }

    #[test]
    fn patch_wraps_scalars() {
        assert_eq!(patch(serde_json::json!(5))["value"], serde_json::json!(5));
        assert_eq!(patch(serde_json::json!({"a": 1}))["a"], serde_json::json!(1));
    }
}
