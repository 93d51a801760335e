//! The domain record stored in the cache.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A shallow set of field changes applied by [`Record::apply_patch`].
pub type RecordPatch = Map<String, Value>;

/// Field names owned by [`Record`] itself; patches cannot overwrite them.
pub const RESERVED_FIELDS: [&str; 4] = ["id", "owner_id", "created_at", "updated_at"];

/// A named, owned document.
///
/// Besides its identity and timestamps a record carries an open map of
/// JSON fields (for example `name`). Timestamps are milliseconds since the
/// Unix epoch and may be absent on records fetched from older servers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    /// Identifier: a temp id until the remote authority assigns a real one.
    pub id: String,
    /// Identifier of the owning user.
    pub owner_id: String,
    /// Creation time.
    #[serde(default)]
    pub created_at: Option<u64>,
    /// Last modification time.
    #[serde(default)]
    pub updated_at: Option<u64>,
    /// Application fields.
    #[serde(default)]
    pub fields: Map<String, Value>,
}

impl Record {
    /// Creates a record with no fields and no timestamps.
    pub fn new(id: impl Into<String>, owner_id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            owner_id: owner_id.into(),
            created_at: None,
            updated_at: None,
            fields: Map::new(),
        }
    }

    /// Sets a field, builder style.
    #[must_use]
    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        let key = key.into();
        if !RESERVED_FIELDS.contains(&key.as_str()) {
            self.fields.insert(key, value.into());
        }
        self
    }

    /// Returns a field value.
    pub fn field(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    /// Returns the `name` field when it is a string.
    pub fn name(&self) -> Option<&str> {
        self.field("name").and_then(Value::as_str)
    }

    /// Merges `patch` into the fields. Reserved keys are ignored.
    pub fn apply_patch(&mut self, patch: &RecordPatch) {
        for (key, value) in patch {
            if RESERVED_FIELDS.contains(&key.as_str()) {
                continue;
            }
            self.fields.insert(key.clone(), value.clone());
        }
    }

    /// Recency used for newest-first ordering: `updated_at`, then
    /// `created_at`, then zero.
    pub fn recency(&self) -> u64 {
        self.updated_at.or(self.created_at).unwrap_or(0)
    }
}
