//! Entity cache configuration.

/// Default entity type managed by a cache.
pub const DEFAULT_ENTITY_TYPE: &str = "records";

/// Default retry budget given to every new pending operation.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Configuration for an [`EntityCache`](crate::EntityCache).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheConfig {
    /// Entity type name; selects the storage key and the remote collection.
    pub entity_type: String,

    /// Retry budget stamped on each pending operation when it is enqueued.
    pub max_retries: u32,

    /// Whether an empty owner view triggers a one-time hydration.
    pub hydrate_on_empty: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            entity_type: DEFAULT_ENTITY_TYPE.to_string(),
            max_retries: DEFAULT_MAX_RETRIES,
            hydrate_on_empty: true,
        }
    }
}

impl CacheConfig {
    /// Creates a configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the entity type.
    #[must_use]
    pub fn entity_type(mut self, entity_type: impl Into<String>) -> Self {
        self.entity_type = entity_type.into();
        self
    }

    /// Sets the retry budget for new operations.
    #[must_use]
    pub const fn max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Sets whether empty reads hydrate from the remote authority.
    #[must_use]
    pub const fn hydrate_on_empty(mut self, value: bool) -> Self {
        self.hydrate_on_empty = value;
        self
    }
}
