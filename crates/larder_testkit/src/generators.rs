//! Property-based test generators using proptest.
//!
//! Provides strategies for generating record payloads and mutation
//! scripts, and a driver that replays a script through an
//! [`IntegrationHarness`].

use crate::integration::IntegrationHarness;
use larder_core::{RecordPatch, RESERVED_FIELDS};
use proptest::prelude::*;
use serde_json::Value;

/// Strategy for generating record names.
pub fn name_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("[a-zA-Z][a-zA-Z0-9 ]{0,15}").expect("Invalid regex")
}

/// Strategy for generating field values.
pub fn field_value_strategy() -> impl Strategy<Value = Value> {
    prop_oneof![
        any::<i64>().prop_map(Value::from),
        any::<bool>().prop_map(Value::from),
        name_strategy().prop_map(Value::from),
        Just(Value::Null),
    ]
}

/// Strategy for generating patches that never touch reserved fields.
pub fn patch_strategy() -> impl Strategy<Value = RecordPatch> {
    prop::collection::vec(
        (
            prop::string::string_regex("[a-z][a-z_]{0,11}").expect("Invalid regex"),
            field_value_strategy(),
        ),
        0..5,
    )
    .prop_map(|pairs| {
        pairs
            .into_iter()
            .filter(|(key, _)| !RESERVED_FIELDS.contains(&key.as_str()))
            .collect()
    })
}

/// One step of a mutation script.
///
/// Targets are indexes into the live records at the time the step runs,
/// taken modulo their count.
#[derive(Debug, Clone)]
pub enum Mutation {
    /// Create a record
    Create {
        /// Record name
        name: String,
    },
    /// Rename a live record
    Update {
        /// Index of the target
        target: usize,
        /// New name
        name: String,
    },
    /// Delete a live record
    Delete {
        /// Index of the target
        target: usize,
    },
}

/// Strategy for generating mutations.
pub fn mutation_strategy() -> impl Strategy<Value = Mutation> {
    prop_oneof![
        3 => name_strategy().prop_map(|name| Mutation::Create { name }),
        4 => (any::<usize>(), name_strategy())
            .prop_map(|(target, name)| Mutation::Update { target, name }),
        1 => any::<usize>().prop_map(|target| Mutation::Delete { target }),
    ]
}

/// Strategy for generating a mutation script.
pub fn mutation_script_strategy(
    min_steps: usize,
    max_steps: usize,
) -> impl Strategy<Value = Vec<Mutation>> {
    prop::collection::vec(mutation_strategy(), min_steps..max_steps)
}

/// Strategy for generating a run of updates against a single record.
pub fn update_run_strategy(max_updates: usize) -> impl Strategy<Value = Vec<String>> {
    prop::collection::vec(name_strategy(), 1..max_updates)
}

/// Replays `script` through `harness`.
///
/// Updates and deletes with no live record to target are skipped.
/// Returns the number of steps applied.
pub async fn apply_script(harness: &mut IntegrationHarness, script: &[Mutation]) -> usize {
    let mut applied = 0;
    for step in script {
        let live = harness.live_tags();
        match step {
            Mutation::Create { name } => {
                harness.create(name).await;
            }
            Mutation::Update { target, name } => {
                if live.is_empty() {
                    continue;
                }
                harness.update(live[target % live.len()], name).await;
            }
            Mutation::Delete { target } => {
                if live.is_empty() {
                    continue;
                }
                harness.delete(live[target % live.len()]).await;
            }
        }
        applied += 1;
    }
    applied
}

/// Configuration for property tests.
#[derive(Debug, Clone)]
pub struct PropTestConfig {
    /// Number of test cases to run.
    pub cases: u32,
    /// Maximum shrink iterations.
    pub max_shrink_iters: u32,
}

impl Default for PropTestConfig {
    fn default() -> Self {
        Self {
            cases: 256,
            max_shrink_iters: 1000,
        }
    }
}

impl PropTestConfig {
    /// Creates a configuration for quick tests.
    #[must_use]
    pub fn quick() -> Self {
        Self {
            cases: 32,
            max_shrink_iters: 100,
        }
    }

    /// Converts to proptest config.
    #[must_use]
    pub fn to_proptest_config(&self) -> ProptestConfig {
        ProptestConfig {
            cases: self.cases,
            max_shrink_iters: self.max_shrink_iters,
            ..ProptestConfig::default()
        }
    }
}

/// Builds a single-threaded runtime for driving async code in a proptest.
pub fn test_runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .expect("Failed to build runtime")
}
