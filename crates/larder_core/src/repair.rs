//! Consistency repair between the entity collection and the pending log.
//!
//! An entity with unsynced local work must be referenced by at least one
//! pending operation, otherwise its change would never reach the remote
//! authority. A crash between the entity write and the log append, or a
//! reset of a corrupted log blob, can break that pairing. Repair finds such
//! orphans and enqueues one operation for each.

use crate::collection::EntityCollection;
use crate::entity::SyncableItem;
use crate::error::{CoreError, CoreResult};
use crate::pending::{PendingLog, PendingOperation};
use crate::types::{is_temp_id, MonotonicClock};
use serde::Serialize;
use std::collections::HashSet;

/// What a repair run did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RepairReport {
    /// Create operations enqueued.
    pub created: usize,
    /// Update operations enqueued.
    pub updated: usize,
    /// Delete operations enqueued.
    pub deleted: usize,
    /// Local-only tombstones purged without a remote call.
    pub purged: usize,
}

impl RepairReport {
    /// Returns true if repair changed nothing.
    pub fn is_clean(&self) -> bool {
        self.created + self.updated + self.deleted + self.purged == 0
    }
}

/// Inconsistencies found by [`find_orphans`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct OrphanReport {
    /// Ids of unsynced items no pending operation references.
    pub unqueued_items: Vec<String>,
    /// Ids of operations whose target is not in the collection.
    pub dangling_operations: Vec<String>,
}

impl OrphanReport {
    /// Returns true if nothing is inconsistent.
    pub fn is_clean(&self) -> bool {
        self.unqueued_items.is_empty() && self.dangling_operations.is_empty()
    }
}

fn needs_repair(item: &SyncableItem, referenced: &HashSet<&str>) -> bool {
    item.is_unsynced() && !referenced.contains(item.id.as_str())
}

/// Checks `items` against `ops` without changing anything.
pub fn find_orphans(items: &[SyncableItem], ops: &[PendingOperation]) -> OrphanReport {
    let referenced: HashSet<&str> = ops.iter().map(|op| op.entity_id.as_str()).collect();
    let unqueued_items = items
        .iter()
        .filter(|item| needs_repair(item, &referenced))
        .map(|item| item.id.clone())
        .collect();
    let dangling_operations = ops
        .iter()
        .filter(|op| !items.iter().any(|item| item.matches(&op.entity_id)))
        .map(|op| op.id.clone())
        .collect();
    OrphanReport {
        unqueued_items,
        dangling_operations,
    }
}

/// Enqueues an operation for every unsynced item that has none.
///
/// - a tombstone still carrying a temp id never existed remotely and is
///   purged locally
/// - any other tombstone gets a delete
/// - an item still carrying a temp id gets a create
/// - anything else gets an update with its current snapshot
///
/// Runs as one unit on the collection key.
pub async fn repair_pending_operations(
    collection: &EntityCollection,
    log: &PendingLog,
    max_retries: u32,
    clock: &MonotonicClock,
) -> CoreResult<RepairReport> {
    let entity_type = collection.entity_type();
    collection
        .exclusive(async {
            let mut items = collection.load()?;
            let ops = log.list().await?;
            let referenced: HashSet<&str> = ops.iter().map(|op| op.entity_id.as_str()).collect();

            let mut report = RepairReport::default();
            let mut repairs = Vec::new();
            let mut purge = HashSet::new();
            for item in items.iter().filter(|item| needs_repair(item, &referenced)) {
                let now = clock.now();
                let op = if item.is_deleted {
                    if is_temp_id(&item.id) {
                        purge.insert(item.id.clone());
                        report.purged += 1;
                        continue;
                    }
                    report.deleted += 1;
                    PendingOperation::delete(
                        entity_type,
                        &item.id,
                        &item.data.owner_id,
                        now,
                        max_retries,
                    )
                } else if item.temp_id.is_some() {
                    report.created += 1;
                    PendingOperation::create(entity_type, item.data.clone(), now, max_retries)
                } else {
                    report.updated += 1;
                    PendingOperation::update(entity_type, item.data.clone(), now, max_retries)
                };
                tracing::warn!(
                    entity_id = %item.id,
                    op_type = %op.op_type(),
                    "resynthesizing missing pending operation"
                );
                repairs.push(op);
            }

            if !purge.is_empty() {
                items.retain(|item| !purge.contains(&item.id));
                collection.save(&items)?;
            }
            for op in repairs {
                log.append(op).await?;
            }
            Ok::<_, CoreError>(report)
        })
        .await
}
