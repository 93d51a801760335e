//! Dump-pending command implementation.

use super::{CliResult, DataDir, Format};
use larder_core::{OperationType, PendingOperation};
use serde::Serialize;
use std::path::Path;

/// One queued operation, flattened for output.
#[derive(Debug, Serialize)]
pub struct OperationInfo {
    /// Position in the log.
    pub position: usize,
    /// Operation id.
    pub id: String,
    /// Operation type.
    pub op_type: OperationType,
    /// Entity type.
    pub entity_type: String,
    /// Target entity id.
    pub entity_id: String,
    /// Owner of the target.
    pub owner_id: String,
    /// Enqueue time (ms since the Unix epoch).
    pub timestamp: u64,
    /// Failed attempts so far.
    pub retry_count: u32,
    /// Retry budget.
    pub max_retries: u32,
    /// Payload of create and update operations.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fields: Option<serde_json::Value>,
}

impl OperationInfo {
    fn new(position: usize, op: &PendingOperation, with_payload: bool) -> CliResult<Self> {
        let fields = match op.kind.record() {
            Some(record) if with_payload => Some(serde_json::to_value(&record.fields)?),
            _ => None,
        };
        Ok(Self {
            position,
            id: op.id.clone(),
            op_type: op.op_type(),
            entity_type: op.entity_type.clone(),
            entity_id: op.entity_id.clone(),
            owner_id: op.owner_id.clone(),
            timestamp: op.timestamp,
            retry_count: op.retry_count,
            max_retries: op.max_retries,
            fields,
        })
    }
}

/// Runs the dump-pending command.
pub fn run(
    path: &Path,
    entity_type: Option<&str>,
    limit: Option<usize>,
    with_payload: bool,
    format: Format,
) -> CliResult<()> {
    let dir = DataDir::open(path)?;
    let ops = list(&dir, entity_type, limit, with_payload)?;

    match format {
        Format::Json => println!("{}", serde_json::to_string_pretty(&ops)?),
        Format::Text => print_text_output(&ops),
    }
    Ok(())
}

/// Lists queued operations in log order.
pub fn list(
    dir: &DataDir,
    entity_type: Option<&str>,
    limit: Option<usize>,
    with_payload: bool,
) -> CliResult<Vec<OperationInfo>> {
    dir.operations()?
        .iter()
        .enumerate()
        .filter(|(_, op)| entity_type.is_none_or(|t| op.entity_type == t))
        .take(limit.unwrap_or(usize::MAX))
        .map(|(position, op)| OperationInfo::new(position, op, with_payload))
        .collect()
}

fn print_text_output(ops: &[OperationInfo]) {
    if ops.is_empty() {
        println!("No pending operations");
        return;
    }

    println!("Pending Operations ({} shown)", ops.len());
    println!("==============================");
    for op in ops {
        println!(
            "[{:>4}] {:<6} {}/{} owner={} retries={}/{} id={}",
            op.position,
            op.op_type,
            op.entity_type,
            op.entity_id,
            op.owner_id,
            op.retry_count,
            op.max_retries,
            op.id
        );
        if let Some(fields) = &op.fields {
            println!("       {fields}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use larder_core::{codec, Record, PENDING_OPERATIONS_KEY};
    use larder_storage::{InMemoryStore, KvStore};
    use std::sync::Arc;

    fn dir_with_ops() -> DataDir {
        let store = Arc::new(InMemoryStore::new());
        let ops = vec![
            PendingOperation::create(
                "recipes",
                Record::new("tmp_a", "alice").with_field("name", "A"),
                1,
                3,
            ),
            PendingOperation::delete("notes", "srv_9", "alice", 2, 3),
            PendingOperation::update("recipes", Record::new("tmp_a", "alice"), 3, 3),
        ];
        store
            .set(PENDING_OPERATIONS_KEY, &codec::encode(&ops).unwrap())
            .unwrap();
        DataDir::from_store(store)
    }

    #[test]
    fn lists_in_log_order() {
        let ops = list(&dir_with_ops(), None, None, false).unwrap();
        let types: Vec<_> = ops.iter().map(|op| op.op_type).collect();
        assert_eq!(
            types,
            vec![OperationType::Create, OperationType::Delete, OperationType::Update]
        );
        assert!(ops.iter().all(|op| op.fields.is_none()));
    }

    #[test]
    fn filter_keeps_positions() {
        let ops = list(&dir_with_ops(), Some("recipes"), Some(5), true).unwrap();
        assert_eq!(ops.len(), 2);
        assert_eq!(ops[1].position, 2);
        assert_eq!(ops[0].fields, Some(serde_json::json!({"name": "A"})));
    }

    #[test]
    fn limit_truncates() {
        let ops = list(&dir_with_ops(), None, Some(1), false).unwrap();
        assert_eq!(ops.len(), 1);
        assert_eq!(ops[0].entity_id, "tmp_a");
    }
}
