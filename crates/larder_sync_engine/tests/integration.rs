//! Integration tests for the cache, the sync engine and the remote authority.

use async_trait::async_trait;
use larder_core::{
    is_temp_id, MemoryRemote, OperationType, Record, RecordPatch, RemoteAuthority, RemoteCall,
    RemoteError, RemoteResult, StaticIdentity, SyncStatus,
};
use larder_storage::{FileStore, InMemoryStore, KvStore};
use larder_sync_engine::{
    Larder, LarderConfig, RetryPolicy, SyncConfig, SyncEngine, SyncError, SyncState,
};
use serde_json::json;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;

const TYPE: &str = "recipes";

fn config() -> LarderConfig {
    LarderConfig::new().entity_type(TYPE).max_retries(3).with_sync(
        SyncConfig::new()
            .with_auto_sync(false)
            .with_retry(RetryPolicy::immediate()),
    )
}

fn fields(value: serde_json::Value) -> RecordPatch {
    value.as_object().cloned().unwrap()
}

async fn open_with<R: RemoteAuthority + 'static>(
    config: LarderConfig,
    store: Arc<dyn KvStore>,
    remote: Arc<R>,
) -> Larder<R> {
    Larder::open(config, store, remote, Arc::new(StaticIdentity::new("alice")))
        .await
        .unwrap()
}

async fn open(remote: Arc<MemoryRemote>) -> Larder<MemoryRemote> {
    open_with(config(), Arc::new(InMemoryStore::new()), remote).await
}

/// Fails every create or update whose record carries `"fail": true`.
struct ScriptedRemote {
    inner: MemoryRemote,
}

impl ScriptedRemote {
    fn new() -> Self {
        Self {
            inner: MemoryRemote::new(),
        }
    }

    fn check(record: &Record) -> RemoteResult<()> {
        if record.field("fail") == Some(&json!(true)) {
            Err(RemoteError::Server("scripted failure".into()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl RemoteAuthority for ScriptedRemote {
    async fn create_entity(&self, entity_type: &str, record: &Record) -> RemoteResult<String> {
        Self::check(record)?;
        self.inner.create_entity(entity_type, record).await
    }

    async fn update_entity(
        &self,
        entity_type: &str,
        id: &str,
        record: &Record,
    ) -> RemoteResult<()> {
        Self::check(record)?;
        self.inner.update_entity(entity_type, id, record).await
    }

    async fn delete_entity(&self, entity_type: &str, id: &str) -> RemoteResult<()> {
        self.inner.delete_entity(entity_type, id).await
    }

    async fn fetch_all(&self, entity_type: &str, owner_id: &str) -> RemoteResult<Vec<Record>> {
        self.inner.fetch_all(entity_type, owner_id).await
    }
}

/// Applies each write, then parks until released while armed.
struct GatedRemote {
    inner: MemoryRemote,
    armed: AtomicBool,
    applied: Notify,
    release: Notify,
}

impl GatedRemote {
    fn new() -> Self {
        Self {
            inner: MemoryRemote::new(),
            armed: AtomicBool::new(false),
            applied: Notify::new(),
            release: Notify::new(),
        }
    }

    fn arm(&self) {
        self.armed.store(true, Ordering::SeqCst);
    }

    async fn hold(&self) {
        if self.armed.swap(false, Ordering::SeqCst) {
            self.applied.notify_one();
            self.release.notified().await;
        }
    }
}

#[async_trait]
impl RemoteAuthority for GatedRemote {
    async fn create_entity(&self, entity_type: &str, record: &Record) -> RemoteResult<String> {
        let id = self.inner.create_entity(entity_type, record).await?;
        self.hold().await;
        Ok(id)
    }

    async fn update_entity(
        &self,
        entity_type: &str,
        id: &str,
        record: &Record,
    ) -> RemoteResult<()> {
        self.inner.update_entity(entity_type, id, record).await?;
        self.hold().await;
        Ok(())
    }

    async fn delete_entity(&self, entity_type: &str, id: &str) -> RemoteResult<()> {
        self.inner.delete_entity(entity_type, id).await?;
        self.hold().await;
        Ok(())
    }

    async fn fetch_all(&self, entity_type: &str, owner_id: &str) -> RemoteResult<Vec<Record>> {
        self.inner.fetch_all(entity_type, owner_id).await
    }
}

/// Runs a pass that parks after its first remote write, refreshes the
/// cache while it is parked, then lets the pass finish.
async fn refresh_during_pass(
    larder: &Larder<GatedRemote>,
    remote: &GatedRemote,
) -> larder_core::HydrationReport {
    remote.arm();
    let engine = larder.engine().clone();
    let pass = tokio::spawn(async move { engine.sync_pending_operations().await });

    remote.applied.notified().await;
    let report = larder.cache().refresh("alice").await.unwrap();
    remote.release.notify_one();

    let result = pass.await.unwrap().unwrap();
    assert!(result.success, "pass failed: {:?}", result.errors);
    assert_eq!(result.processed, 1);
    report
}

#[tokio::test]
async fn offline_create_then_sync_reconciles_temp_id() {
    let remote = Arc::new(MemoryRemote::new());
    let larder = open(remote.clone()).await;
    remote.set_online(false);

    let record = larder
        .cache()
        .create(fields(json!({"name": "Recipe A"})))
        .await
        .unwrap();
    let temp_id = record.id.clone();
    assert!(is_temp_id(&temp_id));

    let all = larder.cache().read_all("alice").await.unwrap();
    assert_eq!(all.len(), 1);
    assert_eq!(all[0].id, temp_id);
    assert!(larder.cache().all_items().await.unwrap()[0].needs_sync);

    let offline = larder.sync_now().await.unwrap();
    assert!(!offline.success);
    assert_eq!(offline.failed, 1);
    assert_eq!(larder.cache().pending_operations().await.unwrap()[0].retry_count, 1);

    remote.set_online(true);
    let result = larder.sync_now().await.unwrap();
    assert!(result.success);
    assert_eq!(result.processed, 1);
    assert_eq!(result.conflicts, 0);

    let items = larder.cache().all_items().await.unwrap();
    assert_eq!(items.len(), 1);
    assert_eq!(items[0].id, "srv_1");
    assert_eq!(items[0].data.id, "srv_1");
    assert!(items[0].temp_id.is_none());
    assert!(!items[0].needs_sync);
    assert_eq!(items[0].sync_status, SyncStatus::Synced);
    assert!(!items.iter().any(|item| item.matches(&temp_id)));
    assert!(larder.cache().pending_operations().await.unwrap().is_empty());

    assert_eq!(remote.get(TYPE, "srv_1").unwrap().name(), Some("Recipe A"));
    assert_eq!(larder.cache().get(&temp_id).await.unwrap(), None);
    assert!(larder.cache().get("srv_1").await.unwrap().is_some());
}

#[tokio::test]
async fn updates_before_sync_follow_the_create() {
    let remote = Arc::new(MemoryRemote::new());
    let larder = open(remote.clone()).await;

    let record = larder.cache().create(fields(json!({"name": "A"}))).await.unwrap();
    larder.cache().update(&record.id, fields(json!({"name": "B"}))).await.unwrap();
    larder.cache().update(&record.id, fields(json!({"name": "C"}))).await.unwrap();

    let ops = larder.cache().pending_operations().await.unwrap();
    let types: Vec<_> = ops.iter().map(|op| op.op_type()).collect();
    assert_eq!(
        types,
        vec![OperationType::Create, OperationType::Update, OperationType::Update]
    );

    let result = larder.sync_now().await.unwrap();
    assert_eq!(result.processed, 3);

    assert_eq!(remote.get(TYPE, "srv_1").unwrap().name(), Some("C"));
    assert_eq!(
        remote.calls(),
        vec![
            RemoteCall::Create {
                entity_type: TYPE.into(),
                local_id: record.id.clone(),
            },
            RemoteCall::Update {
                entity_type: TYPE.into(),
                id: "srv_1".into(),
            },
            RemoteCall::Update {
                entity_type: TYPE.into(),
                id: "srv_1".into(),
            },
        ]
    );
    let item = &larder.cache().all_items().await.unwrap()[0];
    assert!(!item.needs_sync);
}

#[tokio::test]
async fn delete_before_create_synced_is_purged() {
    let remote = Arc::new(MemoryRemote::new());
    let larder = open(remote.clone()).await;

    let record = larder.cache().create(fields(json!({"name": "A"}))).await.unwrap();
    larder.cache().delete(&record.id, "alice").await.unwrap();
    assert!(larder.cache().read_all("alice").await.unwrap().is_empty());

    let result = larder.sync_now().await.unwrap();
    assert_eq!(result.processed, 2);

    assert!(larder.cache().all_items().await.unwrap().is_empty());
    assert!(larder.cache().pending_operations().await.unwrap().is_empty());
    assert!(remote.records(TYPE).is_empty());
}

#[tokio::test]
async fn delete_after_rejected_create_is_purged_locally() {
    let remote = Arc::new(MemoryRemote::new());
    let larder = open(remote.clone()).await;

    let record = larder.cache().create(RecordPatch::new()).await.unwrap();
    larder.cache().delete(&record.id, "alice").await.unwrap();
    remote.fail_next(1, RemoteError::Rejected("invalid record".into()));

    let result = larder.sync_now().await.unwrap();
    assert_eq!(result.dropped, 1);
    assert_eq!(result.processed, 1);
    assert_eq!(result.errors.len(), 1);

    assert!(larder.cache().all_items().await.unwrap().is_empty());
    assert!(remote
        .calls()
        .iter()
        .all(|call| !matches!(call, RemoteCall::Delete { .. })));
}

#[tokio::test]
async fn failing_delete_is_dropped_after_max_retries() {
    let remote = Arc::new(MemoryRemote::new());
    remote.seed(TYPE, Record::new("srv_1", "alice").with_field("name", "remote"));
    let larder = open(remote.clone()).await;

    assert_eq!(larder.cache().read_all("alice").await.unwrap().len(), 1);
    larder.cache().delete("srv_1", "alice").await.unwrap();
    remote.set_online(false);

    let mut errors = Vec::new();
    for expected in 1..=2 {
        let result = larder.sync_now().await.unwrap();
        assert_eq!(result.failed, 1);
        errors.extend(result.errors);
        let ops = larder.cache().pending_operations().await.unwrap();
        assert_eq!(ops.len(), 1);
        assert_eq!(ops[0].retry_count, expected);
    }

    let last = larder.sync_now().await.unwrap();
    assert_eq!(last.dropped, 1);
    errors.extend(last.errors);
    assert_eq!(errors.len(), 1);
    assert!(larder.cache().pending_operations().await.unwrap().is_empty());

    let items = larder.cache().all_items().await.unwrap();
    assert_eq!(items.len(), 1);
    assert!(items[0].is_deleted);
    assert!(larder.cache().read_all("alice").await.unwrap().is_empty());
    assert_eq!(larder.engine().stats().dropped, 1);
}

#[tokio::test]
async fn remote_not_found_on_delete_counts_as_success() {
    let remote = Arc::new(MemoryRemote::new());
    remote.seed(TYPE, Record::new("srv_1", "alice"));
    let larder = open(remote.clone()).await;
    larder.cache().read_all("alice").await.unwrap();

    remote.delete_entity(TYPE, "srv_1").await.unwrap();
    larder.cache().delete("srv_1", "alice").await.unwrap();

    let result = larder.sync_now().await.unwrap();
    assert!(result.success);
    assert_eq!(result.processed, 1);
    assert!(larder.cache().all_items().await.unwrap().is_empty());
}

#[tokio::test]
async fn update_stays_unsynced_while_later_ops_queue() {
    let remote = Arc::new(ScriptedRemote::new());
    let larder = open_with(config(), Arc::new(InMemoryStore::new()), remote.clone()).await;

    let record = larder.cache().create(RecordPatch::new()).await.unwrap();
    larder.sync_now().await.unwrap();
    assert_eq!(larder.cache().get(&record.id).await.unwrap(), None);
    let id = larder.cache().get("srv_1").await.unwrap().unwrap().id;

    larder.cache().update(&id, fields(json!({"name": "B"}))).await.unwrap();
    larder.cache().update(&id, fields(json!({"fail": true}))).await.unwrap();

    let result = larder.sync_now().await.unwrap();
    assert_eq!(result.processed, 1);
    assert_eq!(result.failed, 1);

    let item = &larder.cache().all_items().await.unwrap()[0];
    assert!(item.needs_sync);
    assert_eq!(item.sync_status, SyncStatus::Pending);
    assert_eq!(remote.inner.get(TYPE, "srv_1").unwrap().name(), Some("B"));
}

#[tokio::test]
async fn failed_create_holds_back_later_ops_for_that_entity() {
    let remote = Arc::new(ScriptedRemote::new());
    let larder = open_with(config(), Arc::new(InMemoryStore::new()), remote.clone()).await;

    let bad = larder
        .cache()
        .create(fields(json!({"fail": true})))
        .await
        .unwrap();
    larder.cache().update(&bad.id, fields(json!({"name": "x"}))).await.unwrap();
    larder.cache().create(fields(json!({"name": "ok"}))).await.unwrap();

    let result = larder.sync_now().await.unwrap();
    assert_eq!(result.failed, 1);
    assert_eq!(result.processed, 1);

    let ops = larder.cache().pending_operations().await.unwrap();
    assert_eq!(ops.len(), 2);
    assert_eq!(ops[0].retry_count, 1);
    assert_eq!(ops[1].retry_count, 0);
    assert_eq!(ops[1].entity_id, bad.id);
    assert!(remote
        .inner
        .calls()
        .iter()
        .all(|call| !matches!(call, RemoteCall::Update { .. })));
}

#[tokio::test]
async fn forced_refresh_preserves_offline_create() {
    let remote = Arc::new(MemoryRemote::new());
    remote.seed(TYPE, Record::new("srv_1", "alice").with_field("name", "remote"));
    let larder = open(remote.clone()).await;

    remote.set_online(false);
    let local = larder.cache().create(fields(json!({"name": "offline"}))).await.unwrap();
    remote.set_online(true);

    let report = larder.cache().refresh("alice").await.unwrap();
    assert_eq!(report.fetched, 1);
    assert_eq!(report.preserved, 1);

    let all = larder.cache().read_all("alice").await.unwrap();
    assert_eq!(all.len(), 2);
    assert!(all.iter().any(|r| r.id == local.id));
    assert!(all.iter().any(|r| r.id == "srv_1"));
    assert_eq!(larder.cache().pending_operations().await.unwrap().len(), 1);
}

#[tokio::test]
async fn concurrent_pass_is_rejected() {
    let remote = Arc::new(MemoryRemote::new());
    let larder = open(remote.clone()).await;
    larder.cache().create(RecordPatch::new()).await.unwrap();
    remote.set_latency(Some(Duration::from_millis(300)));

    let engine = larder.engine().clone();
    let first = tokio::spawn(async move { engine.sync_pending_operations().await });
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(larder.engine().state(), SyncState::Syncing);

    let second = larder.sync_now().await;
    assert!(matches!(second, Err(SyncError::AlreadyInProgress { .. })));

    let first = first.await.unwrap().unwrap();
    assert_eq!(first.processed, 1);
    assert_eq!(larder.engine().state(), SyncState::Idle);
    assert_eq!(larder.engine().stats().rejected_passes, 1);
}

#[tokio::test]
async fn stale_pass_is_overridden() {
    let remote = Arc::new(MemoryRemote::new());
    let config = config().with_sync(
        SyncConfig::new()
            .with_auto_sync(false)
            .with_retry(RetryPolicy::immediate())
            .with_stale_after(Duration::from_millis(50)),
    );
    let larder = open_with(config, Arc::new(InMemoryStore::new()), remote.clone()).await;
    larder.cache().create(RecordPatch::new()).await.unwrap();
    remote.set_latency(Some(Duration::from_millis(300)));

    let engine = larder.engine().clone();
    let first = tokio::spawn(async move { engine.sync_pending_operations().await });
    tokio::time::sleep(Duration::from_millis(100)).await;

    let second = larder.sync_now().await;
    assert!(second.is_ok());
    assert!(first.await.unwrap().is_ok());
    assert_eq!(larder.engine().stats().stale_overrides, 1);
}

#[tokio::test]
async fn sync_metadata_is_persisted() {
    let remote = Arc::new(MemoryRemote::new());
    let larder = open(remote).await;
    assert_eq!(larder.last_sync().await.unwrap().last_sync_at, None);

    larder.cache().create(RecordPatch::new()).await.unwrap();
    larder.sync_now().await.unwrap();

    let metadata = larder.last_sync().await.unwrap();
    assert!(metadata.last_sync_at.is_some());
    assert_eq!(metadata.last_result.unwrap().processed, 1);
}

#[tokio::test]
async fn open_repairs_lost_operations() {
    let store: Arc<dyn KvStore> = Arc::new(InMemoryStore::new());
    let remote = Arc::new(MemoryRemote::new());

    let first = open_with(config(), Arc::clone(&store), remote.clone()).await;
    let record = first.cache().create(RecordPatch::new()).await.unwrap();
    drop(first);
    store.remove("pending_operations").unwrap();

    let reopened = open_with(config(), Arc::clone(&store), remote.clone()).await;
    let ops = reopened.cache().pending_operations().await.unwrap();
    assert_eq!(ops.len(), 1);
    assert_eq!(ops[0].op_type(), OperationType::Create);
    assert_eq!(ops[0].entity_id, record.id);

    reopened.sync_now().await.unwrap();
    assert_eq!(remote.records(TYPE).len(), 1);
}

#[tokio::test]
async fn file_store_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let remote = Arc::new(MemoryRemote::new());
    remote.set_online(false);

    let record = {
        let store = Arc::new(FileStore::open(dir.path()).unwrap());
        let larder = open_with(config(), store, remote.clone()).await;
        larder.cache().create(fields(json!({"name": "kept"}))).await.unwrap()
    };

    let store = Arc::new(FileStore::open(dir.path()).unwrap());
    let larder = open_with(config(), store, remote.clone()).await;
    let all = larder.cache().read_all("alice").await.unwrap();
    assert_eq!(all.len(), 1);
    assert_eq!(all[0].id, record.id);
    assert_eq!(larder.cache().pending_operations().await.unwrap().len(), 1);

    remote.set_online(true);
    larder.sync_now().await.unwrap();
    assert_eq!(larder.cache().all_items().await.unwrap()[0].id, "srv_1");
}

#[tokio::test]
async fn mutation_schedules_background_pass() {
    let remote = Arc::new(MemoryRemote::new());
    let config = config().with_sync(
        SyncConfig::new()
            .with_auto_sync(true)
            .with_retry(RetryPolicy::immediate()),
    );
    let larder = open_with(config, Arc::new(InMemoryStore::new()), remote.clone()).await;

    larder.cache().create(fields(json!({"name": "bg"}))).await.unwrap();

    for _ in 0..100 {
        if larder.cache().pending_operations().await.unwrap().is_empty() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert!(larder.cache().pending_operations().await.unwrap().is_empty());
    assert_eq!(remote.records(TYPE).len(), 1);
    assert_eq!(larder.cache().all_items().await.unwrap()[0].id, "srv_1");
}

#[tokio::test]
async fn scheduled_pass_can_be_cancelled() {
    let remote = Arc::new(MemoryRemote::new());
    let config = config().with_sync(
        SyncConfig::new()
            .with_auto_sync(true)
            .with_retry(RetryPolicy::new(Duration::from_secs(60))),
    );
    let larder = open_with(config, Arc::new(InMemoryStore::new()), remote.clone()).await;

    larder.cache().create(RecordPatch::new()).await.unwrap();
    assert_eq!(larder.engine().state(), SyncState::Scheduled);

    assert!(larder.engine().cancel_scheduled());
    assert_eq!(larder.engine().state(), SyncState::Idle);
    assert!(!larder.engine().cancel_scheduled());
    assert!(remote.calls().is_empty());
}

#[test]
fn scheduling_without_runtime_is_ignored() {
    let store: Arc<dyn KvStore> = Arc::new(InMemoryStore::new());
    let queue = Arc::new(larder_storage::KeyQueue::new());
    let engine = SyncEngine::new(
        SyncConfig::new(),
        Arc::new(MemoryRemote::new()),
        larder_core::EntityCollection::new(Arc::clone(&store), Arc::clone(&queue), TYPE),
        larder_core::PendingLog::new(Arc::clone(&store), queue),
        store,
    );

    engine.schedule_sync();
    assert_eq!(engine.state(), SyncState::Idle);
}

#[tokio::test]
async fn signed_out_create_is_refused() {
    let identity = Arc::new(StaticIdentity::anonymous());
    let larder = Larder::open(
        config(),
        Arc::new(InMemoryStore::new()),
        Arc::new(MemoryRemote::new()),
        identity.clone(),
    )
    .await
    .unwrap();

    let err = larder.cache().create(RecordPatch::new()).await.unwrap_err();
    assert!(matches!(err, larder_core::CoreError::AuthRequired));

    identity.set("alice");
    assert!(larder.cache().create(RecordPatch::new()).await.is_ok());
}

#[tokio::test]
async fn refresh_during_create_keeps_one_entity() {
    let remote = Arc::new(GatedRemote::new());
    let larder = open_with(config(), Arc::new(InMemoryStore::new()), remote.clone()).await;
    let local = larder.cache().create(fields(json!({"name": "Recipe A"}))).await.unwrap();

    let report = refresh_during_pass(&larder, &remote).await;
    assert_eq!(report.fetched, 1);
    assert_eq!(report.preserved, 1);

    let items = larder.cache().all_items().await.unwrap();
    assert_eq!(items.len(), 1);
    assert_eq!(items[0].id, "srv_1");
    assert!(items[0].temp_id.is_none());
    assert!(!items[0].needs_sync);

    let all = larder.cache().read_all("alice").await.unwrap();
    assert_eq!(all.len(), 1);
    assert_eq!(all[0].name(), Some("Recipe A"));
    assert!(larder.cache().get(&local.id).await.unwrap().is_none());
    assert!(larder.cache().pending_operations().await.unwrap().is_empty());
}

#[tokio::test]
async fn refresh_during_update_keeps_local_edit() {
    let remote = Arc::new(GatedRemote::new());
    let larder = open_with(config(), Arc::new(InMemoryStore::new()), remote.clone()).await;
    larder.cache().create(fields(json!({"name": "v1"}))).await.unwrap();
    larder.sync_now().await.unwrap();

    larder.cache().update("srv_1", fields(json!({"name": "v2"}))).await.unwrap();
    let report = refresh_during_pass(&larder, &remote).await;
    assert_eq!(report.fetched, 1);
    assert_eq!(report.preserved, 1);

    let items = larder.cache().all_items().await.unwrap();
    assert_eq!(items.len(), 1);
    assert_eq!(items[0].id, "srv_1");
    assert!(!items[0].needs_sync);
    assert_eq!(items[0].data.name(), Some("v2"));
    assert!(larder.cache().pending_operations().await.unwrap().is_empty());
}

#[tokio::test]
async fn refresh_during_delete_keeps_tombstone_until_settled() {
    let remote = Arc::new(GatedRemote::new());
    let larder = open_with(config(), Arc::new(InMemoryStore::new()), remote.clone()).await;
    larder.cache().create(fields(json!({"name": "doomed"}))).await.unwrap();
    larder.sync_now().await.unwrap();

    larder.cache().delete("srv_1", "alice").await.unwrap();
    let report = refresh_during_pass(&larder, &remote).await;
    assert_eq!(report.fetched, 0);
    assert_eq!(report.preserved, 1);

    assert!(larder.cache().all_items().await.unwrap().is_empty());
    assert!(larder.cache().read_all("alice").await.unwrap().is_empty());
    assert!(larder.cache().pending_operations().await.unwrap().is_empty());
    assert!(remote.inner.records(TYPE).is_empty());
}
