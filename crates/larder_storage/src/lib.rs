//! # Larder Storage
//!
//! Durable key-value storage and per-key serialization for Larder.
//!
//! This crate provides the lowest-level persistence layer. Stores hold a
//! small, fixed set of **named blobs** and only ever read or replace a blob
//! as a whole. They do not interpret the bytes they store.
//!
//! ## Design Principles
//!
//! - Whole-value `get` / `set`; no partial writes, no multi-key transactions
//! - Must be `Send + Sync` for concurrent access
//! - Read-modify-write cycles are serialized by [`KeyQueue`], not by the store
//!
//! ## Available Stores
//!
//! - [`InMemoryStore`] - For testing and ephemeral caches
//! - [`FileStore`] - One file per key, crash-safe replace via rename
//!
//! ## Example
//!
//! ```rust
//! use larder_storage::{InMemoryStore, KvStore};
//!
//! let store = InMemoryStore::new();
//! store.set("pending_operations", b"[]").unwrap();
//! assert_eq!(store.get("pending_operations").unwrap(), Some(b"[]".to_vec()));
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod backend;
mod error;
mod file;
mod memory;
mod queue;

pub use backend::{validate_key, KvStore};
pub use error::{StorageError, StorageResult};
pub use file::FileStore;
pub use memory::InMemoryStore;
pub use queue::KeyQueue;
