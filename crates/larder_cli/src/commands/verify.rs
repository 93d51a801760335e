//! Verify command implementation.

use super::{CliError, CliResult, DataDir};
use larder_core::{find_orphans, EntityCollection, PendingOperation, SyncableItem};
use std::collections::HashSet;
use std::path::Path;

/// Verification result.
#[derive(Debug, Default)]
pub struct VerifyResult {
    /// Blobs decoded.
    pub blobs_checked: usize,
    /// Items checked across all collections.
    pub items_checked: usize,
    /// Operations checked.
    pub operations_checked: usize,
    /// Problems found.
    pub errors: Vec<String>,
}

impl VerifyResult {
    /// Returns true if nothing was found.
    pub fn is_ok(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Runs the verify command.
pub fn run(path: &Path) -> CliResult<()> {
    println!("Verifying larder at {}", path.display());
    println!();

    let dir = DataDir::open(path)?;
    let result = verify(&dir)?;

    println!(
        "  blobs: {}, items: {}, operations: {}",
        result.blobs_checked, result.items_checked, result.operations_checked
    );
    for error in &result.errors {
        println!("    ERROR: {error}");
    }

    println!();
    if result.is_ok() {
        println!("✓ Larder verification passed");
        Ok(())
    } else {
        println!("✗ Larder verification failed");
        Err(CliError::VerificationFailed(result.errors.len()))
    }
}

/// Checks every blob in `dir` and the consistency between them.
///
/// Corrupted blobs are reported as errors rather than returned as one.
pub fn verify(dir: &DataDir) -> CliResult<VerifyResult> {
    let mut result = VerifyResult::default();

    let ops = decoded(&mut result, dir.operations())?.unwrap_or_default();
    decoded(&mut result, dir.metadata())?;
    result.operations_checked = ops.len();
    check_operations(&ops, &mut result.errors);

    let types = dir.entity_types()?;
    for entity_type in &types {
        let Some(items) = decoded(&mut result, dir.items(entity_type))? else {
            continue;
        };
        result.items_checked += items.len();
        check_items(entity_type, &items, &mut result.errors);

        let type_ops: Vec<PendingOperation> = ops
            .iter()
            .filter(|op| &op.entity_type == entity_type)
            .cloned()
            .collect();
        let orphans = find_orphans(&items, &type_ops);
        for id in orphans.unqueued_items {
            result
                .errors
                .push(format!("{entity_type}/{id} needs sync but has no pending operation"));
        }
        for id in orphans.dangling_operations {
            result
                .errors
                .push(format!("operation {id} targets a missing {entity_type} entity"));
        }
    }

    for op in &ops {
        if !types.contains(&op.entity_type) {
            result.errors.push(format!(
                "operation {} targets entity type '{}' with no collection",
                op.id, op.entity_type
            ));
        }
    }

    Ok(result)
}

/// Unwraps a decoded blob, turning corruption into a reported error.
fn decoded<T>(result: &mut VerifyResult, value: CliResult<T>) -> CliResult<Option<T>> {
    match value {
        Ok(value) => {
            result.blobs_checked += 1;
            Ok(Some(value))
        }
        Err(CliError::Corrupted { key, message }) => {
            result.blobs_checked += 1;
            result.errors.push(format!("{key}: corrupted ({message})"));
            Ok(None)
        }
        Err(err) => Err(err),
    }
}

fn check_operations(ops: &[PendingOperation], errors: &mut Vec<String>) {
    let mut seen = HashSet::new();
    for op in ops {
        if !seen.insert(op.id.as_str()) {
            errors.push(format!("operation id {} appears more than once", op.id));
        }
        if op.is_exhausted() {
            errors.push(format!(
                "operation {} exhausted its retries ({}/{}) but is still queued",
                op.id, op.retry_count, op.max_retries
            ));
        }
        if let Some(record) = op.kind.record() {
            if record.id != op.entity_id {
                errors.push(format!(
                    "operation {} payload id {} differs from target {}",
                    op.id, record.id, op.entity_id
                ));
            }
        }
    }
}

fn check_items(entity_type: &str, items: &[SyncableItem], errors: &mut Vec<String>) {
    let key = EntityCollection::storage_key(entity_type);
    let mut seen = HashSet::new();
    for item in items {
        if !seen.insert(item.id.as_str()) {
            errors.push(format!("{key}: id {} appears more than once", item.id));
        }
        if item.data.id != item.id {
            errors.push(format!(
                "{key}: item {} carries record id {}",
                item.id, item.data.id
            ));
        }
        if let Some(temp_id) = &item.temp_id {
            if temp_id != &item.id {
                errors.push(format!(
                    "{key}: item {} keeps stale temp id {temp_id}",
                    item.id
                ));
            }
        }
    }
}
