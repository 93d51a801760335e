//! # Larder Core
//!
//! Offline-first entity cache for Larder.
//!
//! This crate provides:
//! - The record model and its sync wrapper ([`Record`], [`SyncableItem`])
//! - The entity cache with tombstoned deletes and temp ids ([`EntityCache`])
//! - The durable pending operation log ([`PendingLog`])
//! - Repair of unsynced items that lost their operation
//! - Hydration from the remote authority, preserving unsynced local work
//! - The remote authority and identity contracts
//!
//! ## Key Invariants
//!
//! - Every mutation writes one item and appends one pending operation, in
//!   one unit on the entity-collection key
//! - Deletes tombstone; the item is purged only after the remote confirms
//! - A temp id is replaced by the remote id exactly once
//! - `needs_sync == false` implies no pending operation targets the item
//!
//! ## Example
//!
//! ```rust
//! use larder_core::{CacheConfig, EntityCache, MemoryRemote, RecordPatch, StaticIdentity};
//! use larder_storage::{InMemoryStore, KeyQueue};
//! use std::sync::Arc;
//!
//! # tokio::runtime::Runtime::new().unwrap().block_on(async {
//! let cache = EntityCache::new(
//!     CacheConfig::new().entity_type("recipes"),
//!     Arc::new(InMemoryStore::new()),
//!     Arc::new(KeyQueue::new()),
//!     Arc::new(MemoryRemote::new()),
//!     Arc::new(StaticIdentity::new("alice")),
//! );
//!
//! let mut fields = RecordPatch::new();
//! fields.insert("name".into(), "Recipe A".into());
//! let record = cache.create(fields).await.unwrap();
//!
//! let all = cache.read_all("alice").await.unwrap();
//! assert_eq!(all[0].id, record.id);
//! # });
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod cache;
mod collection;
mod config;
mod entity;
mod error;
mod hydration;
mod identity;
mod pending;
mod remote;
mod repair;
mod stats;
mod types;

pub use cache::{EntityCache, NoopScheduler, SyncScheduler};
pub use collection::{codec, EntityCollection, ENTITY_KEY_PREFIX};
pub use config::{CacheConfig, DEFAULT_ENTITY_TYPE, DEFAULT_MAX_RETRIES};
pub use entity::{Record, RecordPatch, SyncStatus, SyncableItem, RESERVED_FIELDS};
pub use error::{CoreError, CoreResult};
pub use hydration::{HydrationReport, Hydrator};
pub use identity::{IdentityProvider, StaticIdentity};
pub use pending::{
    FailureOutcome, OperationKind, OperationType, PendingLog, PendingOperation,
    PENDING_OPERATIONS_KEY,
};
pub use remote::{MemoryRemote, RemoteAuthority, RemoteCall, RemoteError, RemoteResult};
pub use repair::{find_orphans, repair_pending_operations, OrphanReport, RepairReport};
pub use stats::{CacheStats, CacheStatsSnapshot, CacheSummary};
pub use types::{is_temp_id, new_operation_id, new_temp_id, now_millis, MonotonicClock, TEMP_ID_PREFIX};

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
