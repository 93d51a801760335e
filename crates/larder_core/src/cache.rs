//! The entity cache: local CRUD with durable pending operations.

use crate::collection::EntityCollection;
use crate::config::CacheConfig;
use crate::entity::{Record, RecordPatch, SyncableItem};
use crate::error::{CoreError, CoreResult};
use crate::hydration::{HydrationReport, Hydrator};
use crate::identity::IdentityProvider;
use crate::pending::{PendingLog, PendingOperation};
use crate::remote::RemoteAuthority;
use crate::repair::{repair_pending_operations, RepairReport};
use crate::stats::{CacheStats, CacheSummary};
use crate::types::{new_temp_id, MonotonicClock};
use larder_storage::{KeyQueue, KvStore};
use parking_lot::Mutex;
use std::cmp::Reverse;
use std::collections::HashSet;
use std::sync::Arc;

/// Receives requests for a background sync pass.
///
/// Implementations must return immediately; the pass itself runs later.
pub trait SyncScheduler: Send + Sync {
    /// Requests a sync pass.
    fn schedule_sync(&self);
}

impl<S: SyncScheduler + ?Sized> SyncScheduler for Arc<S> {
    fn schedule_sync(&self) {
        (**self).schedule_sync();
    }
}

/// A scheduler that ignores every request.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopScheduler;

impl SyncScheduler for NoopScheduler {
    fn schedule_sync(&self) {}
}

/// Offline-first CRUD over one entity type.
///
/// Every mutation writes the entity and appends its pending operation in
/// one unit on the collection key, then asks the [`SyncScheduler`] for a
/// background pass. No call waits for the remote authority.
pub struct EntityCache {
    config: CacheConfig,
    collection: EntityCollection,
    log: PendingLog,
    hydrator: Hydrator,
    identity: Arc<dyn IdentityProvider>,
    scheduler: Arc<dyn SyncScheduler>,
    clock: Arc<MonotonicClock>,
    hydrated: Mutex<HashSet<String>>,
    stats: CacheStats,
}

impl std::fmt::Debug for EntityCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EntityCache")
            .field("config", &self.config)
            .field("collection", &self.collection)
            .finish_non_exhaustive()
    }
}

impl EntityCache {
    /// Creates a cache over `store`.
    ///
    /// The cache starts with a [`NoopScheduler`]; install the real one
    /// with [`Self::with_scheduler`].
    pub fn new(
        config: CacheConfig,
        store: Arc<dyn KvStore>,
        queue: Arc<KeyQueue>,
        remote: Arc<dyn RemoteAuthority>,
        identity: Arc<dyn IdentityProvider>,
    ) -> Self {
        let clock = Arc::new(MonotonicClock::new());
        let collection =
            EntityCollection::new(Arc::clone(&store), Arc::clone(&queue), &config.entity_type);
        let log = PendingLog::new(store, queue);
        let hydrator = Hydrator::new(collection.clone(), remote, Arc::clone(&clock));
        Self {
            config,
            collection,
            log,
            hydrator,
            identity,
            scheduler: Arc::new(NoopScheduler),
            clock,
            hydrated: Mutex::new(HashSet::new()),
            stats: CacheStats::new(),
        }
    }

    /// Replaces the sync scheduler.
    #[must_use]
    pub fn with_scheduler(mut self, scheduler: Arc<dyn SyncScheduler>) -> Self {
        self.scheduler = scheduler;
        self
    }

    /// Returns the configuration.
    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Returns the entity collection.
    pub fn collection(&self) -> &EntityCollection {
        &self.collection
    }

    /// Returns the pending operation log.
    pub fn log(&self) -> &PendingLog {
        &self.log
    }

    /// Returns the clock used to stamp local changes.
    pub fn clock(&self) -> &Arc<MonotonicClock> {
        &self.clock
    }

    /// Returns the call counters.
    pub fn stats(&self) -> &CacheStats {
        &self.stats
    }

    fn owner(&self) -> CoreResult<String> {
        self.identity.current_owner().ok_or(CoreError::AuthRequired)
    }

    /// Creates a record owned by the current user.
    ///
    /// The record gets a temp id and is queued for creation remotely.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::AuthRequired`] if nobody is signed in.
    pub async fn create(&self, fields: RecordPatch) -> CoreResult<Record> {
        let owner_id = self.owner()?;
        let now = self.clock.now();
        let mut record = Record::new(new_temp_id(), owner_id);
        record.apply_patch(&fields);
        record.created_at = Some(now);
        record.updated_at = Some(now);

        let entity_type = self.collection.entity_type();
        let op = PendingOperation::create(entity_type, record.clone(), now, self.config.max_retries);
        self.collection
            .exclusive(async {
                let mut items = self.collection.load()?;
                items.push(SyncableItem::local(record.clone(), now));
                self.collection.save(&items)?;
                self.log.append(op).await
            })
            .await?;

        tracing::info!(entity_type, entity_id = %record.id, "created locally");
        self.stats.record_create();
        self.scheduler.schedule_sync();
        Ok(record)
    }

    /// Merges `patch` into the record named by `id`.
    ///
    /// `id` may be the real id, the temp id or a legacy alias.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::NotFound`] if no visible record matches.
    pub async fn update(&self, id: &str, patch: RecordPatch) -> CoreResult<Record> {
        let entity_type = self.collection.entity_type();
        let max_retries = self.config.max_retries;
        let record = self
            .collection
            .exclusive(async {
                let mut items = self.collection.load()?;
                let item = items
                    .iter_mut()
                    .find(|item| item.matches(id) && item.is_visible())
                    .ok_or_else(|| CoreError::not_found(id))?;

                let now = self.clock.now();
                item.data.apply_patch(&patch);
                item.data.updated_at = Some(now);
                item.touch(now);
                let record = item.data.clone();

                self.collection.save(&items)?;
                let op = PendingOperation::update(entity_type, record.clone(), now, max_retries);
                self.log.append(op).await?;
                Ok::<_, CoreError>(record)
            })
            .await?;

        tracing::info!(entity_type, entity_id = %record.id, "updated locally");
        self.stats.record_update();
        self.scheduler.schedule_sync();
        Ok(record)
    }

    /// Soft-deletes the record named by `id` on behalf of `owner_id`.
    ///
    /// The record is tombstoned and disappears from normal reads; it is
    /// purged once the remote confirms the delete.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::NotFound`] if no visible record owned by
    /// `owner_id` matches.
    pub async fn delete(&self, id: &str, owner_id: &str) -> CoreResult<()> {
        let entity_type = self.collection.entity_type();
        let max_retries = self.config.max_retries;
        let entity_id = self
            .collection
            .exclusive(async {
                let mut items = self.collection.load()?;
                let item = items
                    .iter_mut()
                    .find(|item| {
                        item.matches(id) && item.is_visible() && item.data.owner_id == owner_id
                    })
                    .ok_or_else(|| CoreError::not_found(id))?;

                let now = self.clock.now();
                item.tombstone(now);
                let entity_id = item.id.clone();

                self.collection.save(&items)?;
                let op =
                    PendingOperation::delete(entity_type, &entity_id, owner_id, now, max_retries);
                self.log.append(op).await?;
                Ok::<_, CoreError>(entity_id)
            })
            .await?;

        tracing::info!(entity_type, entity_id = %entity_id, "deleted locally");
        self.stats.record_delete();
        self.scheduler.schedule_sync();
        Ok(())
    }

    /// Returns the visible records of `owner_id`, newest first.
    ///
    /// If the cache holds nothing for the owner (tombstones count), the
    /// owner is hydrated from the remote authority once per process. A
    /// failed hydration is logged and the local view returned.
    pub async fn read_all(&self, owner_id: &str) -> CoreResult<Vec<Record>> {
        self.stats.record_read();
        let mut items = self.collection.read().await?;

        let owned = items.iter().any(|item| item.data.owner_id == owner_id);
        let hydrated = self.hydrated.lock().contains(owner_id);
        if !owned && !hydrated && self.config.hydrate_on_empty {
            match self.hydrator.hydrate(owner_id).await {
                Ok(_) => {
                    self.hydrated.lock().insert(owner_id.to_string());
                    self.stats.record_hydration(true);
                    items = self.collection.read().await?;
                }
                Err(err) => {
                    self.stats.record_hydration(false);
                    tracing::warn!(owner_id, error = %err, "hydration on empty cache failed");
                }
            }
        }

        let mut records: Vec<Record> = items
            .into_iter()
            .filter(|item| item.is_visible() && item.data.owner_id == owner_id)
            .map(|item| item.data)
            .collect();
        records.sort_by_key(|record| Reverse(record.recency()));
        Ok(records)
    }

    /// Returns the visible record named by `id`.
    pub async fn get(&self, id: &str) -> CoreResult<Option<Record>> {
        Ok(self
            .collection
            .find_visible(id)
            .await?
            .map(|item| item.data))
    }

    /// Rewrites the owner's slice of the cache from the remote authority,
    /// keeping unsynced local work.
    ///
    /// # Errors
    ///
    /// Returns the fetch or storage error; on a fetch error nothing changed.
    pub async fn refresh(&self, owner_id: &str) -> CoreResult<HydrationReport> {
        match self.hydrator.hydrate(owner_id).await {
            Ok(report) => {
                self.hydrated.lock().insert(owner_id.to_string());
                self.stats.record_hydration(true);
                Ok(report)
            }
            Err(err) => {
                self.stats.record_hydration(false);
                Err(err)
            }
        }
    }

    /// Returns every item, tombstones included.
    pub async fn all_items(&self) -> CoreResult<Vec<SyncableItem>> {
        self.collection.read().await
    }

    /// Returns every queued operation in enqueue order.
    pub async fn pending_operations(&self) -> CoreResult<Vec<PendingOperation>> {
        self.log.list().await
    }

    /// Enqueues operations for unsynced items that lost theirs.
    pub async fn repair(&self) -> CoreResult<RepairReport> {
        repair_pending_operations(&self.collection, &self.log, self.config.max_retries, &self.clock)
            .await
    }

    /// Summarizes the persisted state.
    pub async fn summary(&self) -> CoreResult<CacheSummary> {
        let items = self.collection.read().await?;
        let ops = self.log.list().await?;
        Ok(CacheSummary::collect(&items, &ops))
    }
}
