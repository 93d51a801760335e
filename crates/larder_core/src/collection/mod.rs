//! Durable collection of cached entities.
//!
//! [`EntityCollection`] owns one blob (`entities.<type>`) holding every
//! [`SyncableItem`] of an entity type, tombstones included. Compound
//! read-modify-write cycles go through [`EntityCollection::exclusive`],
//! which serializes them on the collection's storage key.

pub mod codec;

use crate::entity::SyncableItem;
use crate::error::CoreResult;
use larder_storage::{KeyQueue, KvStore};
use std::future::Future;
use std::sync::Arc;

/// Prefix of every entity collection storage key.
pub const ENTITY_KEY_PREFIX: &str = "entities.";

/// Handle to the entity blob of one entity type.
///
/// Cloning is cheap; clones share the store and the key queue.
#[derive(Clone)]
pub struct EntityCollection {
    store: Arc<dyn KvStore>,
    queue: Arc<KeyQueue>,
    entity_type: String,
    key: String,
}

impl std::fmt::Debug for EntityCollection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EntityCollection")
            .field("entity_type", &self.entity_type)
            .field("key", &self.key)
            .finish()
    }
}

impl EntityCollection {
    /// Creates a handle for `entity_type`.
    pub fn new(
        store: Arc<dyn KvStore>,
        queue: Arc<KeyQueue>,
        entity_type: impl Into<String>,
    ) -> Self {
        let entity_type = entity_type.into();
        Self {
            key: Self::storage_key(&entity_type),
            store,
            queue,
            entity_type,
        }
    }

    /// Returns the storage key used for `entity_type`.
    pub fn storage_key(entity_type: &str) -> String {
        format!("{ENTITY_KEY_PREFIX}{entity_type}")
    }

    /// Returns the entity type a storage key belongs to, if it is an
    /// entity collection key.
    pub fn entity_type_of(key: &str) -> Option<&str> {
        key.strip_prefix(ENTITY_KEY_PREFIX)
            .filter(|entity_type| !entity_type.is_empty())
    }

    /// Returns the entity type.
    pub fn entity_type(&self) -> &str {
        &self.entity_type
    }

    /// Returns the storage key.
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Returns the key queue shared with the pending log.
    pub fn queue(&self) -> &Arc<KeyQueue> {
        &self.queue
    }

    /// Reads every item without taking the collection key.
    ///
    /// Inside [`Self::exclusive`] this is the consistent read of a
    /// read-modify-write cycle; outside it is a point-in-time snapshot.
    pub fn load(&self) -> CoreResult<Vec<SyncableItem>> {
        codec::load_or_reset(self.store.as_ref(), &self.key)
    }

    /// Replaces every item. Callers must hold the collection key.
    pub fn save(&self, items: &[SyncableItem]) -> CoreResult<()> {
        codec::save(self.store.as_ref(), &self.key, items)
    }

    /// Runs `unit` while holding the collection key.
    ///
    /// A unit may nest the pending-operation key, never the reverse.
    pub async fn exclusive<F, T>(&self, unit: F) -> T
    where
        F: Future<Output = T>,
    {
        self.queue.run(&self.key, unit).await
    }

    /// Reads every item, ordered after all queued writes.
    pub async fn read(&self) -> CoreResult<Vec<SyncableItem>> {
        self.exclusive(async { self.load() }).await
    }

    /// Applies `f` to the items and saves the result if `f` succeeds.
    pub async fn mutate<F, T>(&self, f: F) -> CoreResult<T>
    where
        F: FnOnce(&mut Vec<SyncableItem>) -> CoreResult<T>,
    {
        self.exclusive(async {
            let mut items = self.load()?;
            let out = f(&mut items)?;
            self.save(&items)?;
            Ok(out)
        })
        .await
    }

    /// Finds a non-tombstoned item by any of its identifiers.
    pub async fn find_visible(&self, id: &str) -> CoreResult<Option<SyncableItem>> {
        Ok(self
            .read()
            .await?
            .into_iter()
            .find(|item| item.matches(id) && item.is_visible()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::Record;
    use larder_storage::InMemoryStore;

    fn collection() -> EntityCollection {
        EntityCollection::new(
            Arc::new(InMemoryStore::new()),
            Arc::new(KeyQueue::new()),
            "recipes",
        )
    }

    #[tokio::test]
    async fn empty_collection_reads_empty() {
        let c = collection();
        assert_eq!(c.key(), "entities.recipes");
        assert!(c.read().await.unwrap().is_empty());
    }

    #[test]
    fn entity_type_of_key() {
        assert_eq!(EntityCollection::entity_type_of("entities.recipes"), Some("recipes"));
        assert_eq!(EntityCollection::entity_type_of("entities."), None);
        assert_eq!(EntityCollection::entity_type_of("pending_operations"), None);
    }

    #[tokio::test]
    async fn mutate_persists_on_success_only() {
        let c = collection();
        c.mutate(|items| {
            items.push(SyncableItem::synced(Record::new("srv_1", "alice"), 1));
            Ok(())
        })
        .await
        .unwrap();

        let failed: CoreResult<()> = c
            .mutate(|items| {
                items.clear();
                Err(crate::CoreError::not_found("x"))
            })
            .await;
        assert!(failed.is_err());

        assert_eq!(c.read().await.unwrap().len(), 1);
        assert!(c.find_visible("srv_1").await.unwrap().is_some());
    }
}
