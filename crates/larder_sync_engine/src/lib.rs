//! # Larder Sync Engine
//!
//! Drains the pending operation log of a Larder cache against the remote
//! authority.
//!
//! This crate provides:
//! - The reconciliation loop ([`SyncEngine::sync_pending_operations`])
//! - Bounded retry with exponential backoff and jitter
//! - Temp id reconciliation and tombstone purge after remote success
//! - A stale-pass guard so a crashed pass cannot block syncing forever
//! - The [`Larder`] facade that wires store, cache and engine together
//!
//! ## Key Invariants
//!
//! - One pass at a time
//! - Operations are applied in enqueue order
//! - A temp id is replaced exactly once, in the store and the log together
//! - Every operation is dropped after at most `max_retries` failures
//!
//! Delivery is at-least-once; the remote authority must tolerate repeats.
//! Concurrent edits from other devices are resolved last-write-wins.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod config;
mod engine;
mod error;
mod larder;
mod metadata;
mod state;

pub use config::{
    RetryPolicy, SyncConfig, DEFAULT_BACKOFF_CAP, DEFAULT_BASE_DELAY, DEFAULT_JITTER_RATIO,
    DEFAULT_STALE_AFTER,
};
pub use engine::SyncEngine;
pub use error::{SyncError, SyncResult};
pub use larder::{Larder, LarderConfig};
pub use metadata::{SyncMetadata, SyncMetadataStore, SYNC_METADATA_KEY};
pub use state::{SyncCycleResult, SyncState, SyncStats};
