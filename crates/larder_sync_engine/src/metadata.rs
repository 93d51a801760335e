//! Persisted record of the last sync pass.

use crate::error::SyncResult;
use crate::state::SyncCycleResult;
use larder_core::codec;
use larder_storage::{KeyQueue, KvStore};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Storage key of the sync metadata blob.
pub const SYNC_METADATA_KEY: &str = "sync_metadata";

/// When the last pass ran and what it did.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncMetadata {
    /// Completion time of the last pass (ms since the Unix epoch).
    pub last_sync_at: Option<u64>,
    /// Result of the last pass.
    pub last_result: Option<SyncCycleResult>,
}

/// Reads and writes [`SyncMetadata`].
#[derive(Clone)]
pub struct SyncMetadataStore {
    store: Arc<dyn KvStore>,
    queue: Arc<KeyQueue>,
}

impl std::fmt::Debug for SyncMetadataStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncMetadataStore")
            .field("key", &SYNC_METADATA_KEY)
            .finish()
    }
}

impl SyncMetadataStore {
    /// Creates a metadata store over `store`.
    pub fn new(store: Arc<dyn KvStore>, queue: Arc<KeyQueue>) -> Self {
        Self { store, queue }
    }

    /// Loads the metadata; a missing or corrupted blob yields the default.
    pub async fn load(&self) -> SyncResult<SyncMetadata> {
        let metadata = self
            .queue
            .run(SYNC_METADATA_KEY, async {
                codec::load_or_reset(self.store.as_ref(), SYNC_METADATA_KEY)
            })
            .await?;
        Ok(metadata)
    }

    /// Records `result` as the last pass, completed at `at`.
    pub async fn record(&self, result: &SyncCycleResult, at: u64) -> SyncResult<()> {
        let metadata = SyncMetadata {
            last_sync_at: Some(at),
            last_result: Some(result.clone()),
        };
        self.queue
            .run(SYNC_METADATA_KEY, async {
                codec::save(self.store.as_ref(), SYNC_METADATA_KEY, &metadata)
            })
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use larder_storage::InMemoryStore;

    #[tokio::test]
    async fn record_then_load() {
        let metadata = SyncMetadataStore::new(
            Arc::new(InMemoryStore::new()),
            Arc::new(KeyQueue::new()),
        );
        assert_eq!(metadata.load().await.unwrap(), SyncMetadata::default());

        let result = SyncCycleResult {
            success: true,
            processed: 2,
            ..SyncCycleResult::default()
        };
        metadata.record(&result, 1_700_000_000_000).await.unwrap();

        let loaded = metadata.load().await.unwrap();
        assert_eq!(loaded.last_sync_at, Some(1_700_000_000_000));
        assert_eq!(loaded.last_result, Some(result));
    }

    #[tokio::test]
    async fn corrupted_metadata_resets() {
        let store = Arc::new(InMemoryStore::with_entries([(SYNC_METADATA_KEY, vec![0xff; 4])]));
        let metadata = SyncMetadataStore::new(store, Arc::new(KeyQueue::new()));
        assert_eq!(metadata.load().await.unwrap(), SyncMetadata::default());
    }
}
