//! Identifier conventions and local timestamps.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};
use uuid::Uuid;

/// Prefix marking a client-generated placeholder identifier.
///
/// Identifiers issued by the remote authority never start with it.
pub const TEMP_ID_PREFIX: &str = "tmp_";

/// Generates a fresh temp identifier (`tmp_<uuid>`).
#[must_use]
pub fn new_temp_id() -> String {
    format!("{TEMP_ID_PREFIX}{}", Uuid::new_v4().simple())
}

/// Returns true if `id` is a client-generated temp identifier.
#[must_use]
pub fn is_temp_id(id: &str) -> bool {
    id.starts_with(TEMP_ID_PREFIX)
}

/// Generates a fresh pending-operation identifier.
#[must_use]
pub fn new_operation_id() -> String {
    Uuid::new_v4().to_string()
}

/// Milliseconds since the Unix epoch according to the system clock.
#[must_use]
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}

/// A millisecond clock that never goes backwards.
///
/// Every call to [`MonotonicClock::now`] returns a value strictly greater
/// than the previous one, even when the wall clock stalls or is moved back.
#[derive(Debug, Default)]
pub struct MonotonicClock {
    last: AtomicU64,
}

impl MonotonicClock {
    /// Creates a new clock.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the next timestamp.
    pub fn now(&self) -> u64 {
        let wall = now_millis();
        let mut prev = self.last.load(Ordering::SeqCst);
        loop {
            let next = wall.max(prev + 1);
            match self
                .last
                .compare_exchange(prev, next, Ordering::SeqCst, Ordering::SeqCst)
            {
                Ok(_) => return next,
                Err(actual) => prev = actual,
            }
        }
    }
}
