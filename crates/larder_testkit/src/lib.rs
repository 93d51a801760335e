//! # Larder Testkit
//!
//! Test utilities for Larder.
//!
//! This crate provides:
//! - Larder fixtures over in-memory and temp-dir stores
//! - A harness that tracks the expected state of a larder
//! - Property-based generators for mutation scripts using proptest
//! - Concurrent mutation stress helpers
//!
//! ## Usage
//!
//! ```rust,ignore
//! use larder_testkit::prelude::*;
//!
//! #[tokio::test]
//! async fn offline_create() {
//!     let larder = TestLarder::memory().await;
//!     larder.remote.set_online(false);
//!     larder.cache().create(patch(json!({"name": "A"}))).await.unwrap();
//! }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod fixtures;
pub mod generators;
pub mod integration;
pub mod stress;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::fixtures::*;
    pub use crate::generators::*;
    pub use crate::integration::*;
    pub use crate::stress::*;
}

pub use fixtures::*;
pub use generators::*;
pub use integration::*;
pub use stress::*;
