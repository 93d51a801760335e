//! Sync metadata wrapped around a cached record.

use super::record::Record;
use crate::types::is_temp_id;
use serde::{Deserialize, Serialize};

/// Whether the local copy of an item has been confirmed remotely.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncStatus {
    /// Local changes are waiting for the remote authority.
    Pending,
    /// The local copy matches what the remote authority last acknowledged.
    Synced,
}

/// A cached record plus everything the sync engine needs to know about it.
///
/// # Invariants
///
/// - `id == data.id`
/// - `temp_id`, when present, equals `id` (the remote has not assigned one yet)
/// - a tombstoned item (`is_deleted`) always has `deleted_at` set
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncableItem {
    /// Authoritative local key.
    pub id: String,
    /// The record payload.
    pub data: Record,
    /// Monotonic local modification time.
    pub last_modified: u64,
    /// Remote confirmation state.
    pub sync_status: SyncStatus,
    /// Whether a local change still has to reach the remote authority.
    pub needs_sync: bool,
    /// Placeholder id, present only before the remote assigns a real one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temp_id: Option<String>,
    /// Alias carried over by the legacy importer.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub legacy_id: Option<String>,
    /// Tombstone flag.
    #[serde(default)]
    pub is_deleted: bool,
    /// Tombstone time.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deleted_at: Option<u64>,
}

impl SyncableItem {
    /// Wraps a record created locally and not yet known remotely.
    pub fn local(record: Record, now: u64) -> Self {
        let temp_id = is_temp_id(&record.id).then(|| record.id.clone());
        Self {
            id: record.id.clone(),
            data: record,
            last_modified: now,
            sync_status: SyncStatus::Pending,
            needs_sync: true,
            temp_id,
            legacy_id: None,
            is_deleted: false,
            deleted_at: None,
        }
    }

    /// Wraps a record as received from the remote authority.
    pub fn synced(record: Record, now: u64) -> Self {
        Self {
            id: record.id.clone(),
            data: record,
            last_modified: now,
            sync_status: SyncStatus::Synced,
            needs_sync: false,
            temp_id: None,
            legacy_id: None,
            is_deleted: false,
            deleted_at: None,
        }
    }

    /// Returns true if `id` names this item by real id, temp id or legacy alias.
    pub fn matches(&self, id: &str) -> bool {
        self.id == id
            || self.temp_id.as_deref() == Some(id)
            || self.legacy_id.as_deref() == Some(id)
    }

    /// Returns true if the item is visible to normal reads.
    pub fn is_visible(&self) -> bool {
        !self.is_deleted
    }

    /// Returns true if the item holds local work the remote has not seen.
    pub fn is_unsynced(&self) -> bool {
        self.needs_sync
            || self.temp_id.is_some()
            || (self.is_deleted && self.sync_status == SyncStatus::Pending)
    }

    /// Records a local change.
    pub fn touch(&mut self, now: u64) {
        self.last_modified = now;
        self.needs_sync = true;
        self.sync_status = SyncStatus::Pending;
    }

    /// Marks the item as soft-deleted.
    pub fn tombstone(&mut self, now: u64) {
        self.is_deleted = true;
        self.deleted_at = Some(now);
        self.touch(now);
    }

    /// Replaces the temp id with the identifier assigned remotely.
    pub fn reconcile_id(&mut self, real_id: &str) {
        self.id = real_id.to_string();
        self.data.id = real_id.to_string();
        self.temp_id = None;
    }

    /// Clears the pending state after the remote confirmed every change.
    pub fn mark_synced(&mut self) {
        self.needs_sync = false;
        self.sync_status = SyncStatus::Synced;
    }
}
