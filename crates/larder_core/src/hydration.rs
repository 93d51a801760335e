//! Bulk population of the cache from the remote authority.

use crate::collection::EntityCollection;
use crate::entity::SyncableItem;
use crate::error::CoreResult;
use crate::remote::RemoteAuthority;
use crate::types::MonotonicClock;
use std::collections::HashSet;
use std::sync::Arc;

/// Summary of one hydration.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HydrationReport {
    /// Records received from the remote authority.
    pub fetched: usize,
    /// Unsynced local items kept over the remote copy.
    pub preserved: usize,
}

/// Replaces an owner's slice of the cache with the remote collection.
#[derive(Clone)]
pub struct Hydrator {
    collection: EntityCollection,
    remote: Arc<dyn RemoteAuthority>,
    clock: Arc<MonotonicClock>,
}

impl std::fmt::Debug for Hydrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Hydrator")
            .field("collection", &self.collection)
            .finish_non_exhaustive()
    }
}

impl Hydrator {
    /// Creates a hydrator for `collection`.
    pub fn new(
        collection: EntityCollection,
        remote: Arc<dyn RemoteAuthority>,
        clock: Arc<MonotonicClock>,
    ) -> Self {
        Self {
            collection,
            remote,
            clock,
        }
    }

    /// Rewrites the items of `owner_id` from the remote authority.
    ///
    /// Unsynced local items of the owner survive and win over a remote
    /// record with the same id. Other owners' items are untouched. If the
    /// fetch fails nothing is changed.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Remote`](crate::CoreError::Remote) if the fetch
    /// fails, or a storage error if the rewrite fails.
    pub async fn hydrate(&self, owner_id: &str) -> CoreResult<HydrationReport> {
        let entity_type = self.collection.entity_type().to_string();
        let records = self.remote.fetch_all(&entity_type, owner_id).await?;
        let fetched = records.len();

        let preserved = self
            .collection
            .mutate(|items| {
                let (mine, others): (Vec<_>, Vec<_>) = items
                    .drain(..)
                    .partition(|item| item.data.owner_id == owner_id);
                let kept: Vec<SyncableItem> =
                    mine.into_iter().filter(SyncableItem::is_unsynced).collect();

                let mut claimed: HashSet<&str> = HashSet::new();
                for item in &kept {
                    claimed.insert(item.id.as_str());
                    if let Some(legacy) = item.legacy_id.as_deref() {
                        claimed.insert(legacy);
                    }
                }

                let now = self.clock.now();
                let fresh: Vec<SyncableItem> = records
                    .into_iter()
                    .filter(|record| record.owner_id == owner_id)
                    .filter(|record| !claimed.contains(record.id.as_str()))
                    .map(|record| SyncableItem::synced(record, now))
                    .collect();

                let preserved = kept.len();
                items.extend(others);
                items.extend(fresh);
                items.extend(kept);
                Ok(preserved)
            })
            .await?;

        tracing::info!(
            entity_type = %entity_type,
            owner_id,
            fetched,
            preserved,
            "hydrated from remote"
        );
        Ok(HydrationReport { fetched, preserved })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::Record;
    use crate::remote::{MemoryRemote, RemoteError};
    use crate::types::new_temp_id;
    use larder_storage::{InMemoryStore, KeyQueue};

    fn setup() -> (EntityCollection, Arc<MemoryRemote>, Hydrator) {
        let collection = EntityCollection::new(
            Arc::new(InMemoryStore::new()),
            Arc::new(KeyQueue::new()),
            "recipes",
        );
        let remote = Arc::new(MemoryRemote::new());
        let hydrator = Hydrator::new(
            collection.clone(),
            remote.clone(),
            Arc::new(MonotonicClock::new()),
        );
        (collection, remote, hydrator)
    }

    #[tokio::test]
    async fn unsynced_items_survive() {
        let (collection, remote, hydrator) = setup();
        remote.seed("recipes", Record::new("srv_1", "alice").with_field("name", "remote"));
        remote.seed("recipes", Record::new("srv_2", "alice"));

        let temp = new_temp_id();
        collection
            .mutate(|items| {
                items.push(SyncableItem::local(Record::new(temp.clone(), "alice"), 1));
                let mut edited = SyncableItem::synced(
                    Record::new("srv_1", "alice").with_field("name", "local"),
                    1,
                );
                edited.touch(2);
                items.push(edited);
                items.push(SyncableItem::synced(Record::new("srv_stale", "alice"), 1));
                items.push(SyncableItem::synced(Record::new("srv_b", "bob"), 1));
                Ok(())
            })
            .await
            .unwrap();

        let report = hydrator.hydrate("alice").await.unwrap();
        assert_eq!(report, HydrationReport { fetched: 2, preserved: 2 });

        let items = collection.read().await.unwrap();
        let ids: HashSet<_> = items.iter().map(|i| i.id.as_str()).collect();
        assert!(ids.contains(temp.as_str()));
        assert!(ids.contains("srv_2"));
        assert!(ids.contains("srv_b"));
        assert!(!ids.contains("srv_stale"));

        let srv_1: Vec<_> = items.iter().filter(|i| i.id == "srv_1").collect();
        assert_eq!(srv_1.len(), 1);
        assert_eq!(srv_1[0].data.name(), Some("local"));
    }

    #[tokio::test]
    async fn failed_fetch_changes_nothing() {
        let (collection, remote, hydrator) = setup();
        collection
            .mutate(|items| {
                items.push(SyncableItem::synced(Record::new("srv_1", "alice"), 1));
                Ok(())
            })
            .await
            .unwrap();

        remote.fail_next(1, RemoteError::Timeout);
        assert!(hydrator.hydrate("alice").await.is_err());
        assert_eq!(collection.read().await.unwrap().len(), 1);
    }
}
