//! Repair command implementation.

use super::{CliResult, DataDir};
use larder_core::{
    find_orphans, repair_pending_operations, EntityCollection, MonotonicClock, PendingLog,
    RepairReport,
};
use larder_storage::KeyQueue;
use std::path::Path;
use std::sync::Arc;

/// Runs the repair command.
///
/// Corrupted blobs abort the command instead of being reset.
pub async fn run(
    path: &Path,
    entity_type: Option<&str>,
    max_retries: u32,
    dry_run: bool,
) -> CliResult<()> {
    let dir = DataDir::open(path)?;

    for entity_type in dir.select_types(entity_type)? {
        if dry_run {
            let unqueued = unqueued_items(&dir, &entity_type)?;
            println!("Collection '{entity_type}': {} item(s) would be queued", unqueued.len());
            for id in unqueued {
                println!("  {id}");
            }
            continue;
        }

        let report = repair(&dir, &entity_type, max_retries).await?;
        println!(
            "Collection '{entity_type}': {} create, {} update, {} delete queued; {} purged",
            report.created, report.updated, report.deleted, report.purged
        );
    }
    Ok(())
}

/// Lists unsynced items of `entity_type` no operation covers.
pub fn unqueued_items(dir: &DataDir, entity_type: &str) -> CliResult<Vec<String>> {
    let items = dir.items(entity_type)?;
    let ops: Vec<_> = dir
        .operations()?
        .into_iter()
        .filter(|op| op.entity_type == entity_type)
        .collect();
    Ok(find_orphans(&items, &ops).unqueued_items)
}

/// Queues operations for the unsynced items of `entity_type`.
pub async fn repair(dir: &DataDir, entity_type: &str, max_retries: u32) -> CliResult<RepairReport> {
    // Strict reads first; the repair routine itself resets corrupted blobs.
    dir.items(entity_type)?;
    dir.operations()?;

    let queue = Arc::new(KeyQueue::new());
    let collection = EntityCollection::new(Arc::clone(dir.store()), Arc::clone(&queue), entity_type);
    let log = PendingLog::new(Arc::clone(dir.store()), queue);
    let report =
        repair_pending_operations(&collection, &log, max_retries, &MonotonicClock::new()).await?;
    tracing::info!(
        entity_type,
        created = report.created,
        updated = report.updated,
        deleted = report.deleted,
        purged = report.purged,
        "repair finished"
    );
    Ok(report)
}
