//! Pending operations awaiting remote application.

use crate::entity::Record;
use crate::types::new_operation_id;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Type of a pending operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationType {
    /// Entity was created locally.
    Create,
    /// Entity was modified locally.
    Update,
    /// Entity was soft-deleted locally.
    Delete,
}

impl fmt::Display for OperationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            OperationType::Create => "create",
            OperationType::Update => "update",
            OperationType::Delete => "delete",
        };
        f.pad(name)
    }
}

/// The mutation carried by a pending operation, with its payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OperationKind {
    /// Create the record remotely; the remote assigns the real id.
    Create {
        /// Snapshot of the record at creation time.
        record: Record,
    },
    /// Overwrite the remote record (last write wins).
    Update {
        /// Snapshot of the record after the local merge.
        record: Record,
    },
    /// Delete the remote record.
    Delete,
}

impl OperationKind {
    /// Returns the operation type.
    pub fn op_type(&self) -> OperationType {
        match self {
            OperationKind::Create { .. } => OperationType::Create,
            OperationKind::Update { .. } => OperationType::Update,
            OperationKind::Delete => OperationType::Delete,
        }
    }

    /// Returns the embedded record, if any.
    pub fn record(&self) -> Option<&Record> {
        match self {
            OperationKind::Create { record } | OperationKind::Update { record } => Some(record),
            OperationKind::Delete => None,
        }
    }

    fn record_mut(&mut self) -> Option<&mut Record> {
        match self {
            OperationKind::Create { record } | OperationKind::Update { record } => Some(record),
            OperationKind::Delete => None,
        }
    }
}

/// A durable mutation waiting to be applied by the remote authority.
///
/// # Invariants
///
/// - `retry_count <= max_retries`; an operation whose count reaches the
///   bound is dropped and never retried
/// - `entity_id` equals the embedded record's id for create and update
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingOperation {
    /// Unique operation id.
    pub id: String,
    /// The mutation and its payload.
    pub kind: OperationKind,
    /// Entity type the operation applies to.
    pub entity_type: String,
    /// Target entity id (temp id until reconciled).
    pub entity_id: String,
    /// Owner of the target entity.
    pub owner_id: String,
    /// Local enqueue time.
    pub timestamp: u64,
    /// Failed remote attempts so far.
    pub retry_count: u32,
    /// Retry budget.
    pub max_retries: u32,
}

impl PendingOperation {
    /// Creates an operation with a fresh id and no failed attempts.
    pub fn new(
        kind: OperationKind,
        entity_type: impl Into<String>,
        entity_id: impl Into<String>,
        owner_id: impl Into<String>,
        timestamp: u64,
        max_retries: u32,
    ) -> Self {
        Self {
            id: new_operation_id(),
            kind,
            entity_type: entity_type.into(),
            entity_id: entity_id.into(),
            owner_id: owner_id.into(),
            timestamp,
            retry_count: 0,
            max_retries,
        }
    }

    /// Creates a create operation for `record`.
    pub fn create(entity_type: &str, record: Record, timestamp: u64, max_retries: u32) -> Self {
        let (entity_id, owner_id) = (record.id.clone(), record.owner_id.clone());
        Self::new(
            OperationKind::Create { record },
            entity_type,
            entity_id,
            owner_id,
            timestamp,
            max_retries,
        )
    }

    /// Creates an update operation for `record`.
    pub fn update(entity_type: &str, record: Record, timestamp: u64, max_retries: u32) -> Self {
        let (entity_id, owner_id) = (record.id.clone(), record.owner_id.clone());
        Self::new(
            OperationKind::Update { record },
            entity_type,
            entity_id,
            owner_id,
            timestamp,
            max_retries,
        )
    }

    /// Creates a delete operation.
    pub fn delete(
        entity_type: &str,
        entity_id: &str,
        owner_id: &str,
        timestamp: u64,
        max_retries: u32,
    ) -> Self {
        Self::new(
            OperationKind::Delete,
            entity_type,
            entity_id,
            owner_id,
            timestamp,
            max_retries,
        )
    }

    /// Returns the operation type.
    pub fn op_type(&self) -> OperationType {
        self.kind.op_type()
    }

    /// Returns true if the retry budget is used up.
    pub fn is_exhausted(&self) -> bool {
        self.retry_count >= self.max_retries
    }

    /// Returns true if the operation targets `entity_id`.
    pub fn references(&self, entity_id: &str) -> bool {
        self.entity_id == entity_id
    }

    /// Points the operation (and its payload) at `new_id`.
    pub(crate) fn retarget(&mut self, new_id: &str) {
        self.entity_id = new_id.to_string();
        if let Some(record) = self.kind.record_mut() {
            record.id = new_id.to_string();
        }
    }
}
