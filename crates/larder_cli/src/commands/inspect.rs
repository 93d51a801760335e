//! Inspect command implementation.

use super::{CliResult, DataDir, Format};
use larder_core::CacheSummary;
use larder_sync_engine::SyncCycleResult;
use serde::Serialize;
use std::path::Path;

/// Summary of one entity collection.
#[derive(Debug, Serialize)]
pub struct CollectionReport {
    /// Entity type.
    pub entity_type: String,
    /// Item and operation counts.
    #[serde(flatten)]
    pub summary: CacheSummary,
}

/// Data directory inspection result.
#[derive(Debug, Serialize)]
pub struct InspectResult {
    /// Directory path.
    pub path: String,
    /// One report per entity type.
    pub collections: Vec<CollectionReport>,
    /// Operations in the log.
    pub pending_operations: usize,
    /// Completion time of the last sync pass.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_sync_at: Option<u64>,
    /// Result of the last sync pass.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_result: Option<SyncCycleResult>,
}

/// Runs the inspect command.
pub fn run(path: &Path, entity_type: Option<&str>, format: Format) -> CliResult<()> {
    let dir = DataDir::open(path)?;
    let result = collect(&dir, path, entity_type)?;

    match format {
        Format::Json => println!("{}", serde_json::to_string_pretty(&result)?),
        Format::Text => print_text_output(&result),
    }
    Ok(())
}

/// Gathers the inspection result for `dir`.
pub fn collect(dir: &DataDir, path: &Path, entity_type: Option<&str>) -> CliResult<InspectResult> {
    let ops = dir.operations()?;
    let metadata = dir.metadata()?;

    let mut collections = Vec::new();
    for entity_type in dir.select_types(entity_type)? {
        let items = dir.items(&entity_type)?;
        let type_ops: Vec<_> = ops
            .iter()
            .filter(|op| op.entity_type == entity_type)
            .cloned()
            .collect();
        collections.push(CollectionReport {
            summary: CacheSummary::collect(&items, &type_ops),
            entity_type,
        });
    }

    Ok(InspectResult {
        path: path.display().to_string(),
        collections,
        pending_operations: ops.len(),
        last_sync_at: metadata.last_sync_at,
        last_result: metadata.last_result,
    })
}

fn print_text_output(result: &InspectResult) {
    println!("Larder Inspection");
    println!("=================");
    println!();
    println!("Path: {}", result.path);
    println!("Pending operations: {}", result.pending_operations);

    for report in &result.collections {
        let s = &report.summary;
        println!();
        println!("Collection '{}':", report.entity_type);
        println!("  Items:       {}", s.items);
        println!("  Tombstones:  {}", s.tombstones);
        println!("  Temp ids:    {}", s.temp_ids);
        println!("  Unsynced:    {}", s.unsynced);
        println!(
            "  Pending:     {} create, {} update, {} delete",
            s.pending_creates, s.pending_updates, s.pending_deletes
        );
        println!("  Max retries: {}", s.max_retry_count);
    }

    println!();
    match (&result.last_sync_at, &result.last_result) {
        (Some(at), Some(last)) => {
            println!("Last sync at {at} ms:");
            println!(
                "  processed {}, failed {}, dropped {} in {} ms",
                last.processed, last.failed, last.dropped, last.duration_ms
            );
            for error in &last.errors {
                println!("  ERROR: {error}");
            }
        }
        _ => println!("Never synced"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use larder_core::{codec, PendingOperation, Record, SyncableItem, PENDING_OPERATIONS_KEY};
    use larder_storage::{InMemoryStore, KvStore};
    use std::sync::Arc;

    #[test]
    fn collect_counts_per_entity_type() {
        let store = Arc::new(InMemoryStore::new());
        let items = vec![
            SyncableItem::synced(Record::new("srv_1", "alice"), 1),
            SyncableItem::local(Record::new("tmp_a", "alice"), 2),
        ];
        store
            .set("entities.recipes", &codec::encode(&items).unwrap())
            .unwrap();
        store
            .set("entities.notes", &codec::encode(&Vec::<SyncableItem>::new()).unwrap())
            .unwrap();
        let ops = vec![PendingOperation::create(
            "recipes",
            Record::new("tmp_a", "alice"),
            2,
            3,
        )];
        store
            .set(PENDING_OPERATIONS_KEY, &codec::encode(&ops).unwrap())
            .unwrap();

        let dir = DataDir::from_store(store);
        let result = collect(&dir, Path::new("data"), None).unwrap();
        assert_eq!(result.pending_operations, 1);
        assert_eq!(result.collections.len(), 2);
        assert_eq!(result.collections[0].entity_type, "notes");
        let recipes = &result.collections[1].summary;
        assert_eq!(recipes.items, 2);
        assert_eq!(recipes.temp_ids, 1);
        assert_eq!(recipes.pending_creates, 1);
        assert!(result.last_sync_at.is_none());
    }

    #[test]
    fn unknown_entity_type_is_an_error() {
        let dir = DataDir::from_store(Arc::new(InMemoryStore::new()));
        assert!(collect(&dir, Path::new("data"), Some("recipes")).is_err());
    }
}
