//! Cross-crate integration test helpers.
//!
//! Provides a harness that mirrors every mutation in a model and checks
//! the cache, the pending log and the remote against it.

use crate::fixtures::{patch, TestLarder, TEST_ENTITY_TYPE, TEST_OWNER};
use larder_core::{
    find_orphans, is_temp_id, OperationType, PendingOperation, Record, SyncableItem,
};
use serde_json::{json, Value};
use std::collections::{BTreeMap, HashSet};

/// Field carrying the harness's stable record tag.
pub const TAG_FIELD: &str = "tag";

#[derive(Debug, Clone)]
struct Tracked {
    id: String,
    name: String,
}

/// A test harness for integration testing.
pub struct IntegrationHarness {
    /// The larder under test.
    pub larder: TestLarder,
    live: BTreeMap<u64, Tracked>,
    expected_ops: Vec<(OperationType, String)>,
    next_tag: u64,
}

fn tag_of(record: &Record) -> Option<u64> {
    record.field(TAG_FIELD).and_then(Value::as_u64)
}

impl IntegrationHarness {
    /// Wraps `larder`, which must hold no records yet.
    pub fn new(larder: TestLarder) -> Self {
        Self {
            larder,
            live: BTreeMap::new(),
            expected_ops: Vec::new(),
            next_tag: 1,
        }
    }

    /// Creates a tracked record and returns its tag.
    pub async fn create(&mut self, name: &str) -> u64 {
        let tag = self.next_tag;
        self.next_tag += 1;
        let record = self
            .larder
            .cache()
            .create(patch(json!({ TAG_FIELD: tag, "name": name })))
            .await
            .expect("Failed to create record");

        self.expected_ops
            .push((OperationType::Create, record.id.clone()));
        self.live.insert(
            tag,
            Tracked {
                id: record.id,
                name: name.to_string(),
            },
        );
        tag
    }

    /// Renames the record tagged `tag`.
    pub async fn update(&mut self, tag: u64, name: &str) {
        let tracked = self.live.get_mut(&tag).expect("Unknown tag");
        self.larder
            .cache()
            .update(&tracked.id, patch(json!({ "name": name })))
            .await
            .expect("Failed to update record");

        tracked.name = name.to_string();
        self.expected_ops
            .push((OperationType::Update, tracked.id.clone()));
    }

    /// Deletes the record tagged `tag`.
    pub async fn delete(&mut self, tag: u64) {
        let tracked = self.live.remove(&tag).expect("Unknown tag");
        self.larder
            .cache()
            .delete(&tracked.id, TEST_OWNER)
            .await
            .expect("Failed to delete record");
        self.expected_ops.push((OperationType::Delete, tracked.id));
    }

    /// Returns the tags of records that were not deleted, in creation order.
    pub fn live_tags(&self) -> Vec<u64> {
        self.live.keys().copied().collect()
    }

    /// Returns the operations expected in the log, in order.
    pub fn expected_ops(&self) -> &[(OperationType, String)] {
        &self.expected_ops
    }

    /// Verifies `read_all` returns exactly the live records.
    pub async fn verify_all(&self) {
        let records = self
            .larder
            .cache()
            .read_all(TEST_OWNER)
            .await
            .expect("Failed to read records");

        let actual: BTreeMap<u64, String> = records
            .iter()
            .filter_map(|r| Some((tag_of(r)?, r.name()?.to_string())))
            .collect();
        let expected: BTreeMap<u64, String> = self
            .live
            .iter()
            .map(|(tag, tracked)| (*tag, tracked.name.clone()))
            .collect();
        assert_eq!(records.len(), expected.len(), "unexpected record count");
        assert_eq!(actual, expected, "visible records differ from the model");
    }

    /// Verifies the pending log holds the expected operations in order.
    pub async fn verify_log(&self) {
        let ops = self
            .larder
            .cache()
            .pending_operations()
            .await
            .expect("Failed to list operations");
        let actual: Vec<(OperationType, String)> = ops
            .iter()
            .map(|op| (op.op_type(), op.entity_id.clone()))
            .collect();
        assert_eq!(actual, self.expected_ops, "pending log differs from the model");
    }

    /// Runs a pass against an online remote and checks the converged state.
    ///
    /// Afterwards no temp id remains, the log is empty and the remote holds
    /// exactly the live records.
    pub async fn sync_and_verify(&mut self) {
        let result = self.larder.sync_now().await.expect("Sync pass failed");
        assert!(result.success, "sync pass reported errors: {:?}", result.errors);
        assert_eq!(result.processed, self.expected_ops.len());
        self.expected_ops.clear();

        let items = self.larder.cache().all_items().await.expect("Failed to read items");
        let ops = self
            .larder
            .cache()
            .pending_operations()
            .await
            .expect("Failed to list operations");
        let problems = invariants(&items, &ops);
        assert!(problems.is_empty(), "invariants violated: {problems:?}");
        assert!(ops.is_empty());

        for item in &items {
            assert!(!is_temp_id(&item.id), "temp id {} survived sync", item.id);
            assert!(!item.needs_sync);
            assert!(!item.is_deleted);
            if let Some(tracked) = tag_of(&item.data).and_then(|tag| self.live.get_mut(&tag)) {
                tracked.id = item.id.clone();
            }
        }

        let remote: BTreeMap<u64, String> = self
            .larder
            .remote
            .records(TEST_ENTITY_TYPE)
            .iter()
            .filter_map(|r| Some((tag_of(r)?, r.name()?.to_string())))
            .collect();
        let expected: BTreeMap<u64, String> = self
            .live
            .iter()
            .map(|(tag, tracked)| (*tag, tracked.name.clone()))
            .collect();
        assert_eq!(remote, expected, "remote differs from the model");
        self.verify_all().await;
    }
}

/// Checks structural invariants between the items and the log.
///
/// Returns one message per violation.
pub fn invariants(items: &[SyncableItem], ops: &[PendingOperation]) -> Vec<String> {
    let mut problems = Vec::new();

    let mut seen = HashSet::new();
    for item in items {
        if !seen.insert(item.id.as_str()) {
            problems.push(format!("duplicate item id {}", item.id));
        }
        if item.data.id != item.id {
            problems.push(format!("item {} carries record id {}", item.id, item.data.id));
        }
        if item.temp_id.as_deref().is_some_and(|temp| temp != item.id) {
            problems.push(format!("item {} keeps a stale temp id", item.id));
        }
        if item.temp_id.is_none() && is_temp_id(&item.id) {
            problems.push(format!("item {} lost its temp id marker", item.id));
        }
    }

    let orphans = find_orphans(items, ops);
    problems.extend(
        orphans
            .unqueued_items
            .into_iter()
            .map(|id| format!("unsynced item {id} has no operation")),
    );
    problems.extend(
        orphans
            .dangling_operations
            .into_iter()
            .map(|id| format!("operation {id} targets a missing item")),
    );
    problems
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_harness_tracks_mutations() {
        let mut harness = IntegrationHarness::new(TestLarder::memory().await);
        let a = harness.create("A").await;
        let b = harness.create("B").await;
        harness.update(a, "A2").await;
        harness.delete(b).await;

        assert_eq!(harness.live_tags(), vec![a]);
        assert_eq!(harness.expected_ops().len(), 4);
        harness.verify_all().await;
        harness.verify_log().await;

        harness.sync_and_verify().await;
        assert_eq!(harness.larder.remote.records(TEST_ENTITY_TYPE).len(), 1);
    }

    #[tokio::test]
    async fn test_harness_survives_second_round() {
        let mut harness = IntegrationHarness::new(TestLarder::memory().await);
        let a = harness.create("A").await;
        harness.sync_and_verify().await;

        harness.update(a, "A2").await;
        harness.verify_log().await;
        harness.sync_and_verify().await;
    }

    #[test]
    fn test_invariants_flag_orphans() {
        let item = SyncableItem::local(Record::new("tmp_a", TEST_OWNER), 1);
        let problems = invariants(&[item], &[]);
        assert_eq!(problems.len(), 1);
        assert!(invariants(&[], &[]).is_empty());
    }
}
