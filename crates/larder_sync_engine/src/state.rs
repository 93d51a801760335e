//! Observable state of the sync engine.

use serde::{Deserialize, Serialize};

/// What the engine is doing right now.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncState {
    /// Nothing running or scheduled.
    Idle,
    /// A background pass is waiting out its backoff delay.
    Scheduled,
    /// A pass is running.
    Syncing,
}

impl SyncState {
    /// Returns true if a pass is running.
    pub fn is_active(&self) -> bool {
        matches!(self, SyncState::Syncing)
    }
}

/// Statistics about sync passes in this process.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncStats {
    /// Passes that ran to completion.
    pub passes: u64,
    /// Operations applied remotely.
    pub processed: u64,
    /// Failed attempts that left the operation queued.
    pub failed: u64,
    /// Operations dropped after exhausting their budget or being rejected.
    pub dropped: u64,
    /// Passes that found the guard taken.
    pub rejected_passes: u64,
    /// Stale passes that were force-cleared.
    pub stale_overrides: u64,
    /// Last error message.
    pub last_error: Option<String>,
}

/// Outcome of one sync pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncCycleResult {
    /// True when every attempted operation was applied.
    pub success: bool,
    /// Operations applied remotely (or resolved locally) and removed.
    pub processed: usize,
    /// Operations that failed and stay queued for a later pass.
    pub failed: usize,
    /// Operations dropped in this pass.
    pub dropped: usize,
    /// Conflicts detected. Always zero: updates are last-write-wins.
    pub conflicts: usize,
    /// One message per dropped operation.
    pub errors: Vec<String>,
    /// Wall-clock duration of the pass.
    pub duration_ms: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_checks() {
        assert!(SyncState::Syncing.is_active());
        assert!(!SyncState::Scheduled.is_active());
        assert!(!SyncState::Idle.is_active());
    }

    #[test]
    fn default_result_is_empty() {
        let result = SyncCycleResult::default();
        assert_eq!(result.processed, 0);
        assert_eq!(result.conflicts, 0);
        assert!(result.errors.is_empty());
    }
}
