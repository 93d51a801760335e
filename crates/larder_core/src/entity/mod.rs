//! Entity payloads and their sync wrappers.

mod item;
mod record;

pub use item::{SyncStatus, SyncableItem};
pub use record::{Record, RecordPatch, RESERVED_FIELDS};
