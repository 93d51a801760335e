//! Pending operations and their durable log.

mod log;
mod operation;

pub use log::{FailureOutcome, PendingLog, PENDING_OPERATIONS_KEY};
pub use operation::{OperationKind, OperationType, PendingOperation};
