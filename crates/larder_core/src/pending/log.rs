//! Durable, ordered log of pending operations.

use super::operation::PendingOperation;
use crate::collection::codec;
use crate::error::CoreResult;
use larder_storage::{KeyQueue, KvStore};
use std::sync::Arc;

/// Storage key of the pending operation log.
pub const PENDING_OPERATIONS_KEY: &str = "pending_operations";

/// Outcome of recording a failed attempt for an operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureOutcome {
    /// The operation stays queued with the incremented count.
    Retrying {
        /// Count after the increment.
        retry_count: u32,
    },
    /// The retry budget is exhausted; the operation was removed.
    Dropped {
        /// Count after the increment.
        retry_count: u32,
    },
    /// No operation with that id was queued.
    Missing,
}

/// The pending operation log.
///
/// Every method is one unit on the `pending_operations` key, so a call
/// never interleaves with another read-modify-write of the log. Callers
/// holding an entity-collection key may call into the log; the log never
/// calls back out.
#[derive(Clone)]
pub struct PendingLog {
    store: Arc<dyn KvStore>,
    queue: Arc<KeyQueue>,
}

impl std::fmt::Debug for PendingLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PendingLog")
            .field("key", &PENDING_OPERATIONS_KEY)
            .finish()
    }
}

impl PendingLog {
    /// Creates a log over `store`, serialized through `queue`.
    pub fn new(store: Arc<dyn KvStore>, queue: Arc<KeyQueue>) -> Self {
        Self { store, queue }
    }

    fn load(&self) -> CoreResult<Vec<PendingOperation>> {
        codec::load_or_reset(self.store.as_ref(), PENDING_OPERATIONS_KEY)
    }

    fn save(&self, ops: &[PendingOperation]) -> CoreResult<()> {
        codec::save(self.store.as_ref(), PENDING_OPERATIONS_KEY, ops)
    }

    async fn mutate<F, T>(&self, f: F) -> CoreResult<T>
    where
        F: FnOnce(&mut Vec<PendingOperation>) -> T,
    {
        self.queue
            .run(PENDING_OPERATIONS_KEY, async {
                let mut ops = self.load()?;
                let out = f(&mut ops);
                self.save(&ops)?;
                Ok(out)
            })
            .await
    }

    /// Appends an operation at the tail.
    pub async fn append(&self, op: PendingOperation) -> CoreResult<()> {
        tracing::debug!(
            op_id = %op.id,
            op_type = %op.op_type(),
            entity_id = %op.entity_id,
            "enqueue pending operation"
        );
        self.mutate(|ops| ops.push(op)).await
    }

    /// Returns every queued operation in enqueue order.
    pub async fn list(&self) -> CoreResult<Vec<PendingOperation>> {
        self.queue
            .run(PENDING_OPERATIONS_KEY, async { self.load() })
            .await
    }

    /// Returns the operation with `op_id`, if still queued.
    pub async fn get(&self, op_id: &str) -> CoreResult<Option<PendingOperation>> {
        Ok(self.list().await?.into_iter().find(|op| op.id == op_id))
    }

    /// Returns the number of queued operations.
    pub async fn len(&self) -> CoreResult<usize> {
        Ok(self.list().await?.len())
    }

    /// Returns true if nothing is queued.
    pub async fn is_empty(&self) -> CoreResult<bool> {
        Ok(self.len().await? == 0)
    }

    /// Removes the operation with `op_id`. Returns whether it was queued.
    pub async fn remove(&self, op_id: &str) -> CoreResult<bool> {
        self.mutate(|ops| {
            let before = ops.len();
            ops.retain(|op| op.id != op_id);
            ops.len() != before
        })
        .await
    }

    /// Counts one failed attempt for `op_id`.
    ///
    /// When the count reaches the operation's budget it is removed and
    /// [`FailureOutcome::Dropped`] is returned.
    pub async fn record_failure(&self, op_id: &str) -> CoreResult<FailureOutcome> {
        self.mutate(|ops| {
            let Some(pos) = ops.iter().position(|op| op.id == op_id) else {
                return FailureOutcome::Missing;
            };
            let op = &mut ops[pos];
            op.retry_count = op.retry_count.saturating_add(1).min(op.max_retries);
            let retry_count = op.retry_count;
            if op.is_exhausted() {
                ops.remove(pos);
                FailureOutcome::Dropped { retry_count }
            } else {
                FailureOutcome::Retrying { retry_count }
            }
        })
        .await
    }

    /// Retargets every operation on `from` (payload included) to `to`.
    ///
    /// Returns the number of rewritten operations.
    pub async fn rewrite_entity_id(&self, from: &str, to: &str) -> CoreResult<usize> {
        self.mutate(|ops| {
            let mut rewritten = 0;
            for op in ops.iter_mut().filter(|op| op.references(from)) {
                op.retarget(to);
                rewritten += 1;
            }
            rewritten
        })
        .await
    }

    /// Returns true if any queued operation targets `entity_id`.
    pub async fn references(&self, entity_id: &str) -> CoreResult<bool> {
        Ok(self.list().await?.iter().any(|op| op.references(entity_id)))
    }

    /// Returns the highest retry count in the log (zero when empty).
    pub async fn max_retry_count(&self) -> CoreResult<u32> {
        Ok(self
            .list()
            .await?
            .iter()
            .map(|op| op.retry_count)
            .max()
            .unwrap_or(0))
    }
}
