//! The reconciliation loop.

use crate::config::SyncConfig;
use crate::error::{SyncError, SyncResult};
use crate::metadata::{SyncMetadata, SyncMetadataStore};
use crate::state::{SyncCycleResult, SyncState, SyncStats};
use larder_core::{
    is_temp_id, now_millis, EntityCollection, FailureOutcome, OperationKind, PendingLog,
    PendingOperation, RemoteAuthority, RemoteError, SyncScheduler,
};
use larder_storage::KvStore;
use parking_lot::{Mutex, RwLock};
use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::task::JoinHandle;

#[derive(Debug, Clone, Copy)]
struct RunningPass {
    id: u64,
    started: Instant,
}

struct EngineInner<R> {
    config: SyncConfig,
    remote: Arc<R>,
    collection: EntityCollection,
    log: PendingLog,
    metadata: SyncMetadataStore,
    running: Mutex<Option<RunningPass>>,
    next_pass: AtomicU64,
    scheduled: Mutex<Option<JoinHandle<()>>>,
    stats: RwLock<SyncStats>,
}

/// Clears the pass guard on drop, unless a newer pass replaced it.
struct PassGuard<'a, R> {
    inner: &'a EngineInner<R>,
    id: u64,
}

impl<R> Drop for PassGuard<'_, R> {
    fn drop(&mut self) {
        let mut running = self.inner.running.lock();
        if running.is_some_and(|pass| pass.id == self.id) {
            *running = None;
        }
    }
}

/// How a dispatched operation was resolved.
enum Applied {
    Created(String),
    Updated,
    Deleted,
    PurgedLocally,
}

/// Drains the pending log against the remote authority.
///
/// One engine exists per [`Larder`](crate::Larder). Clones share all
/// state, including the pass guard and the scheduled task.
///
/// # Invariants
///
/// - At most one pass runs at a time, unless the running one is stale
/// - Operations are dispatched in enqueue order; once an operation for an
///   entity fails, later operations for that entity wait for the next pass
/// - A successful operation is removed from the log before the entity
///   collection is settled
pub struct SyncEngine<R: RemoteAuthority + 'static> {
    inner: Arc<EngineInner<R>>,
}

impl<R: RemoteAuthority + 'static> Clone for SyncEngine<R> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<R: RemoteAuthority + 'static> std::fmt::Debug for SyncEngine<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncEngine")
            .field("config", &self.inner.config)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl<R: RemoteAuthority + 'static> SyncEngine<R> {
    /// Creates an engine over `collection` and `log`.
    ///
    /// `store` holds the sync metadata blob and must be the store behind
    /// the collection.
    pub fn new(
        config: SyncConfig,
        remote: Arc<R>,
        collection: EntityCollection,
        log: PendingLog,
        store: Arc<dyn KvStore>,
    ) -> Self {
        let metadata = SyncMetadataStore::new(store, Arc::clone(collection.queue()));
        Self {
            inner: Arc::new(EngineInner {
                config,
                remote,
                collection,
                log,
                metadata,
                running: Mutex::new(None),
                next_pass: AtomicU64::new(1),
                scheduled: Mutex::new(None),
                stats: RwLock::new(SyncStats::default()),
            }),
        }
    }

    /// Returns the configuration.
    pub fn config(&self) -> &SyncConfig {
        &self.inner.config
    }

    /// Returns the current state.
    pub fn state(&self) -> SyncState {
        if self.inner.running.lock().is_some() {
            SyncState::Syncing
        } else if self.has_scheduled() {
            SyncState::Scheduled
        } else {
            SyncState::Idle
        }
    }

    /// Returns the pass statistics.
    pub fn stats(&self) -> SyncStats {
        self.inner.stats.read().clone()
    }

    /// Loads the persisted record of the last pass.
    pub async fn metadata(&self) -> SyncResult<SyncMetadata> {
        self.inner.metadata.load().await
    }

    fn begin_pass(&self) -> SyncResult<PassGuard<'_, R>> {
        let mut running = self.inner.running.lock();
        if let Some(pass) = *running {
            let running_for = pass.started.elapsed();
            if running_for < self.inner.config.stale_after {
                self.inner.stats.write().rejected_passes += 1;
                return Err(SyncError::AlreadyInProgress { running_for });
            }
            tracing::warn!(
                pass_id = pass.id,
                running_for_ms = running_for.as_millis() as u64,
                "clearing stale sync pass"
            );
            self.inner.stats.write().stale_overrides += 1;
        }

        let id = self.inner.next_pass.fetch_add(1, Ordering::SeqCst);
        *running = Some(RunningPass {
            id,
            started: Instant::now(),
        });
        Ok(PassGuard {
            inner: &self.inner,
            id,
        })
    }

    /// Runs one pass over the pending log.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::AlreadyInProgress`] if another pass holds the
    /// guard and is not stale, or a core error if local storage fails.
    /// Remote failures are not errors; they are counted in the result.
    pub async fn sync_pending_operations(&self) -> SyncResult<SyncCycleResult> {
        let result = self.run_pass().await?;
        if self.inner.config.auto_sync && !self.inner.log.is_empty().await? {
            self.schedule_sync();
        }
        Ok(result)
    }

    async fn run_pass(&self) -> SyncResult<SyncCycleResult> {
        let _pass = self.begin_pass()?;
        let start = Instant::now();

        let outcome = self.drain().await;
        let mut result = match outcome {
            Ok(result) => result,
            Err(err) => {
                self.inner.stats.write().last_error = Some(err.to_string());
                return Err(err);
            }
        };
        result.duration_ms = start.elapsed().as_millis() as u64;
        result.success = result.failed == 0 && result.dropped == 0;

        self.inner.metadata.record(&result, now_millis()).await?;
        {
            let mut stats = self.inner.stats.write();
            stats.passes += 1;
            stats.processed += result.processed as u64;
            stats.failed += result.failed as u64;
            stats.dropped += result.dropped as u64;
            if let Some(last) = result.errors.last() {
                stats.last_error = Some(last.clone());
            }
        }

        tracing::info!(
            processed = result.processed,
            failed = result.failed,
            dropped = result.dropped,
            duration_ms = result.duration_ms,
            "sync pass finished"
        );
        Ok(result)
    }

    async fn drain(&self) -> SyncResult<SyncCycleResult> {
        let mut result = SyncCycleResult::default();
        let mut blocked: HashSet<String> = HashSet::new();

        let snapshot = self.inner.log.list().await?;
        for queued in snapshot {
            // Re-read: an earlier create in this pass may have retargeted it.
            let Some(op) = self.inner.log.get(&queued.id).await? else {
                continue;
            };
            if blocked.contains(&op.entity_id) {
                tracing::debug!(op_id = %op.id, entity_id = %op.entity_id, "skipping behind failed operation");
                continue;
            }

            match self.dispatch(&op).await {
                Ok(applied) => {
                    self.settle(&op, applied).await?;
                    result.processed += 1;
                }
                Err(err) => {
                    if let Some(message) = self.record_failure(&op, &err).await? {
                        result.dropped += 1;
                        result.errors.push(message);
                    } else {
                        result.failed += 1;
                        blocked.insert(op.entity_id.clone());
                    }
                }
            }
        }
        Ok(result)
    }

    async fn dispatch(&self, op: &PendingOperation) -> SyncResult<Applied> {
        let remote = &self.inner.remote;
        let entity_type = op.entity_type.as_str();
        tracing::debug!(
            op_id = %op.id,
            op_type = %op.op_type(),
            entity_id = %op.entity_id,
            retry_count = op.retry_count,
            "dispatching operation"
        );

        match &op.kind {
            OperationKind::Create { record } => {
                let id = remote.create_entity(entity_type, record).await?;
                Ok(Applied::Created(id))
            }
            OperationKind::Update { record } => {
                remote.update_entity(entity_type, &op.entity_id, record).await?;
                Ok(Applied::Updated)
            }
            OperationKind::Delete if is_temp_id(&op.entity_id) => Ok(Applied::PurgedLocally),
            OperationKind::Delete => match remote.delete_entity(entity_type, &op.entity_id).await {
                Ok(()) | Err(RemoteError::NotFound(_)) => Ok(Applied::Deleted),
                Err(err) => Err(err.into()),
            },
        }
    }

    /// Removes `op` from the log and updates the collection, in one unit
    /// on the collection key.
    async fn settle(&self, op: &PendingOperation, applied: Applied) -> SyncResult<()> {
        let collection = &self.inner.collection;
        let log = &self.inner.log;
        collection
            .exclusive(async {
                log.remove(&op.id).await?;
                let mut items = collection.load()?;

                match &applied {
                    Applied::Created(real_id) => {
                        let rewritten = log.rewrite_entity_id(&op.entity_id, real_id).await?;
                        let still_queued = log.references(real_id).await?;
                        // A refresh during dispatch may already hold the remote copy.
                        let before = items.len();
                        items.retain(|item| item.matches(&op.entity_id) || item.id != *real_id);
                        if items.len() != before {
                            tracing::debug!(entity_id = %real_id, "dropped hydrated copy of reconciled entity");
                        }
                        if let Some(item) = items.iter_mut().find(|item| item.matches(&op.entity_id)) {
                            item.reconcile_id(real_id);
                            if !still_queued {
                                item.mark_synced();
                            }
                        }
                        tracing::info!(
                            temp_id = %op.entity_id,
                            entity_id = %real_id,
                            rewritten,
                            "reconciled temp id"
                        );
                    }
                    Applied::Updated => {
                        if !log.references(&op.entity_id).await? {
                            if let Some(item) =
                                items.iter_mut().find(|item| item.matches(&op.entity_id))
                            {
                                item.mark_synced();
                            }
                        }
                    }
                    Applied::Deleted | Applied::PurgedLocally => {
                        items.retain(|item| !item.matches(&op.entity_id));
                        tracing::info!(entity_id = %op.entity_id, "purged deleted entity");
                    }
                }

                collection.save(&items)?;
                Ok::<_, SyncError>(())
            })
            .await
    }

    /// Counts a failed attempt. Returns the error message if the operation
    /// was dropped.
    async fn record_failure(
        &self,
        op: &PendingOperation,
        err: &SyncError,
    ) -> SyncResult<Option<String>> {
        let log = &self.inner.log;
        if !err.is_retryable() {
            log.remove(&op.id).await?;
            tracing::warn!(op_id = %op.id, entity_id = %op.entity_id, error = %err, "dropping rejected operation");
            return Ok(Some(format!("{} {}: {err}", op.op_type(), op.entity_id)));
        }

        self.inner.stats.write().last_error = Some(err.to_string());
        match log.record_failure(&op.id).await? {
            FailureOutcome::Retrying { retry_count } => {
                tracing::warn!(
                    op_id = %op.id,
                    entity_id = %op.entity_id,
                    retry_count,
                    error = %err,
                    "operation failed, will retry"
                );
                Ok(None)
            }
            FailureOutcome::Dropped { retry_count } => {
                tracing::warn!(
                    op_id = %op.id,
                    entity_id = %op.entity_id,
                    retry_count,
                    error = %err,
                    "operation dropped after exhausting retries"
                );
                Ok(Some(format!(
                    "{} {} dropped after {retry_count} attempts: {err}",
                    op.op_type(),
                    op.entity_id
                )))
            }
            FailureOutcome::Missing => Ok(None),
        }
    }

    fn has_scheduled(&self) -> bool {
        self.inner
            .scheduled
            .lock()
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    /// Schedules a background pass after the backoff delay.
    ///
    /// Does nothing if a pass is already scheduled. Without a tokio
    /// runtime the request is logged and ignored.
    pub fn schedule_sync(&self) {
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            tracing::debug!("no async runtime, sync request ignored");
            return;
        };

        let mut slot = self.inner.scheduled.lock();
        if slot.as_ref().is_some_and(|handle| !handle.is_finished()) {
            return;
        }

        let engine = self.clone();
        *slot = Some(runtime.spawn(async move {
            let max_retry = engine.inner.log.max_retry_count().await.unwrap_or(0);
            let delay = engine.inner.config.retry.delay_for(max_retry);
            tracing::debug!(delay_ms = delay.as_millis() as u64, "sync pass scheduled");
            tokio::time::sleep(delay).await;

            // Free the slot so mutations made during the pass can schedule.
            engine.inner.scheduled.lock().take();
            engine.run_scheduled().await;
        }));
    }

    async fn run_scheduled(&self) {
        match self.sync_pending_operations().await {
            Ok(_) => {}
            // The running pass reschedules itself when work remains.
            Err(SyncError::AlreadyInProgress { .. }) => {
                tracing::debug!("scheduled pass found another pass running");
            }
            Err(err) => {
                tracing::warn!(error = %err, "scheduled sync pass failed");
                if self.inner.config.auto_sync {
                    self.schedule_sync();
                }
            }
        }
    }

    /// Aborts the scheduled pass, if it has not started yet.
    ///
    /// Returns true if a scheduled task was aborted.
    pub fn cancel_scheduled(&self) -> bool {
        match self.inner.scheduled.lock().take() {
            Some(handle) if !handle.is_finished() => {
                handle.abort();
                true
            }
            _ => false,
        }
    }
}

impl<R: RemoteAuthority + 'static> SyncScheduler for SyncEngine<R> {
    fn schedule_sync(&self) {
        if self.inner.config.auto_sync {
            SyncEngine::schedule_sync(self);
        }
    }
}
