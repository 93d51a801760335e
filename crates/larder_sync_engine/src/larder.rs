//! The `Larder` facade wiring storage, cache and engine together.

use crate::config::SyncConfig;
use crate::engine::SyncEngine;
use crate::error::SyncResult;
use crate::metadata::SyncMetadata;
use crate::state::SyncCycleResult;
use larder_core::{
    CacheConfig, EntityCache, IdentityProvider, RemoteAuthority, RepairReport, SyncScheduler,
};
use larder_storage::{KeyQueue, KvStore};
use std::sync::Arc;

/// Configuration for a [`Larder`].
#[derive(Debug, Clone, Default)]
pub struct LarderConfig {
    /// Entity cache settings.
    pub cache: CacheConfig,
    /// Sync engine settings.
    pub sync: SyncConfig,
}

impl LarderConfig {
    /// Creates a configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the entity type.
    pub fn entity_type(mut self, entity_type: impl Into<String>) -> Self {
        self.cache = self.cache.entity_type(entity_type);
        self
    }

    /// Sets the retry budget stamped on new operations.
    pub fn max_retries(mut self, max_retries: u32) -> Self {
        self.cache = self.cache.max_retries(max_retries);
        self
    }

    /// Sets the cache configuration.
    pub fn with_cache(mut self, cache: CacheConfig) -> Self {
        self.cache = cache;
        self
    }

    /// Sets the sync engine configuration.
    pub fn with_sync(mut self, sync: SyncConfig) -> Self {
        self.sync = sync;
        self
    }
}

/// An offline-first store for one entity type.
///
/// Owns the entity cache and the sync engine behind it. Create one per
/// process and pass it to whoever needs it.
///
/// # Example
///
/// ```rust
/// use larder_core::{MemoryRemote, RecordPatch, StaticIdentity};
/// use larder_storage::InMemoryStore;
/// use larder_sync_engine::{Larder, LarderConfig, SyncConfig};
/// use std::sync::Arc;
///
/// # tokio::runtime::Runtime::new().unwrap().block_on(async {
/// let remote = Arc::new(MemoryRemote::new());
/// let larder = Larder::open(
///     LarderConfig::new()
///         .entity_type("recipes")
///         .with_sync(SyncConfig::new().with_auto_sync(false)),
///     Arc::new(InMemoryStore::new()),
///     remote.clone(),
///     Arc::new(StaticIdentity::new("alice")),
/// )
/// .await
/// .unwrap();
///
/// let mut fields = RecordPatch::new();
/// fields.insert("name".into(), "Recipe A".into());
/// larder.cache().create(fields).await.unwrap();
///
/// let result = larder.sync_now().await.unwrap();
/// assert_eq!(result.processed, 1);
/// assert_eq!(remote.records("recipes").len(), 1);
/// # });
/// ```
pub struct Larder<R: RemoteAuthority + 'static> {
    cache: Arc<EntityCache>,
    engine: SyncEngine<R>,
}

impl<R: RemoteAuthority + 'static> std::fmt::Debug for Larder<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Larder")
            .field("cache", &self.cache)
            .field("engine", &self.engine)
            .finish()
    }
}

impl<R: RemoteAuthority + 'static> Larder<R> {
    /// Opens a larder over `store`.
    ///
    /// Runs the repair routine once, so unsynced items left without an
    /// operation by an earlier crash are queued again.
    ///
    /// # Errors
    ///
    /// Returns an error if the repair cannot read or write the store.
    pub async fn open(
        config: LarderConfig,
        store: Arc<dyn KvStore>,
        remote: Arc<R>,
        identity: Arc<dyn IdentityProvider>,
    ) -> SyncResult<Self> {
        let queue = Arc::new(KeyQueue::new());
        let cache = EntityCache::new(
            config.cache,
            Arc::clone(&store),
            queue,
            Arc::clone(&remote) as Arc<dyn RemoteAuthority>,
            identity,
        );
        let engine = SyncEngine::new(
            config.sync,
            remote,
            cache.collection().clone(),
            cache.log().clone(),
            store,
        );
        let scheduler: Arc<dyn SyncScheduler> = Arc::new(engine.clone());
        let cache = Arc::new(cache.with_scheduler(scheduler));

        let larder = Self { cache, engine };
        let report = larder.repair().await?;
        if !report.is_clean() {
            tracing::info!(
                created = report.created,
                updated = report.updated,
                deleted = report.deleted,
                purged = report.purged,
                "repaired pending operations on open"
            );
            SyncScheduler::schedule_sync(&larder.engine);
        }
        Ok(larder)
    }

    /// Returns the entity cache.
    pub fn cache(&self) -> &Arc<EntityCache> {
        &self.cache
    }

    /// Returns the sync engine.
    pub fn engine(&self) -> &SyncEngine<R> {
        &self.engine
    }

    /// Queues operations for unsynced items that lost theirs.
    pub async fn repair(&self) -> SyncResult<RepairReport> {
        Ok(self.cache.repair().await?)
    }

    /// Runs a sync pass now.
    pub async fn sync_now(&self) -> SyncResult<SyncCycleResult> {
        self.engine.sync_pending_operations().await
    }

    /// Loads the persisted record of the last pass.
    pub async fn last_sync(&self) -> SyncResult<SyncMetadata> {
        self.engine.metadata().await
    }

    /// Cancels the scheduled pass, if any.
    pub fn close(&self) {
        self.engine.cancel_scheduled();
    }
}
