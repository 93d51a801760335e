//! Cache statistics and diagnostics.
//!
//! [`CacheStats`] counts calls made through an
//! [`EntityCache`](crate::EntityCache) in this process. [`CacheSummary`]
//! describes what is currently persisted and is computed on demand.

use crate::entity::SyncableItem;
use crate::pending::{OperationType, PendingOperation};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

/// Entity cache counters.
///
/// All counters are atomic and monotonically increasing.
#[derive(Debug, Default)]
pub struct CacheStats {
    creates: AtomicU64,
    updates: AtomicU64,
    deletes: AtomicU64,
    reads: AtomicU64,
    hydrations: AtomicU64,
    hydration_failures: AtomicU64,
}

impl CacheStats {
    /// Creates a new stats instance.
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record_create(&self) {
        self.creates.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_update(&self) {
        self.updates.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_delete(&self) {
        self.deletes.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_read(&self) {
        self.reads.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_hydration(&self, ok: bool) {
        if ok {
            self.hydrations.fetch_add(1, Ordering::Relaxed);
        } else {
            self.hydration_failures.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Returns a snapshot of all counters.
    pub fn snapshot(&self) -> CacheStatsSnapshot {
        CacheStatsSnapshot {
            creates: self.creates.load(Ordering::Relaxed),
            updates: self.updates.load(Ordering::Relaxed),
            deletes: self.deletes.load(Ordering::Relaxed),
            reads: self.reads.load(Ordering::Relaxed),
            hydrations: self.hydrations.load(Ordering::Relaxed),
            hydration_failures: self.hydration_failures.load(Ordering::Relaxed),
        }
    }
}

/// A point-in-time copy of [`CacheStats`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct CacheStatsSnapshot {
    /// Successful `create` calls.
    pub creates: u64,
    /// Successful `update` calls.
    pub updates: u64,
    /// Successful `delete` calls.
    pub deletes: u64,
    /// `read_all` calls.
    pub reads: u64,
    /// Completed hydrations.
    pub hydrations: u64,
    /// Hydrations that failed to fetch or write.
    pub hydration_failures: u64,
}

/// Shape of the persisted cache state.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CacheSummary {
    /// Items in the collection, tombstones included.
    pub items: usize,
    /// Tombstoned items.
    pub tombstones: usize,
    /// Items still carrying a temp id.
    pub temp_ids: usize,
    /// Items holding local work not yet confirmed remotely.
    pub unsynced: usize,
    /// Queued create operations.
    pub pending_creates: usize,
    /// Queued update operations.
    pub pending_updates: usize,
    /// Queued delete operations.
    pub pending_deletes: usize,
    /// Highest retry count in the log.
    pub max_retry_count: u32,
}

impl CacheSummary {
    /// Summarizes `items` and `ops`.
    pub fn collect(items: &[SyncableItem], ops: &[PendingOperation]) -> Self {
        let mut summary = Self {
            items: items.len(),
            ..Self::default()
        };
        for item in items {
            summary.tombstones += usize::from(item.is_deleted);
            summary.temp_ids += usize::from(item.temp_id.is_some());
            summary.unsynced += usize::from(item.is_unsynced());
        }
        for op in ops {
            match op.op_type() {
                OperationType::Create => summary.pending_creates += 1,
                OperationType::Update => summary.pending_updates += 1,
                OperationType::Delete => summary.pending_deletes += 1,
            }
            summary.max_retry_count = summary.max_retry_count.max(op.retry_count);
        }
        summary
    }

    /// Returns the total number of queued operations.
    pub fn pending(&self) -> usize {
        self.pending_creates + self.pending_updates + self.pending_deletes
    }
}
