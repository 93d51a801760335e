//! Per-key serialization of read-modify-write cycles.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

#[derive(Debug, Default)]
struct Slot {
    lock: tokio::sync::Mutex<()>,
    depth: AtomicUsize,
}

struct DepthGuard<'a> {
    queue: &'a KeyQueue,
    key: &'a str,
    slot: Arc<Slot>,
}

impl Drop for DepthGuard<'_> {
    fn drop(&mut self) {
        self.queue.leave(self.key, &self.slot);
    }
}

/// Serializes asynchronous units of work per storage key.
///
/// The underlying [`KvStore`](crate::KvStore) has no multi-step transactions,
/// so every compound read-modify-write against one blob goes through
/// [`KeyQueue::run`] with that blob's key.
///
/// # Guarantees
///
/// - A unit runs only after every unit queued earlier under the same key
///   has settled, whether it succeeded, failed or panicked
/// - Waiters are served in arrival order
/// - Units under different keys never wait on each other
///
/// # Example
///
/// ```rust
/// use larder_storage::KeyQueue;
///
/// let rt = tokio::runtime::Runtime::new().unwrap();
/// rt.block_on(async {
///     let queue = KeyQueue::new();
///     let value = queue.run("pending_operations", async { 41 + 1 }).await;
///     assert_eq!(value, 42);
/// });
/// ```
#[derive(Debug, Default)]
pub struct KeyQueue {
    slots: Mutex<HashMap<String, Arc<Slot>>>,
}

impl KeyQueue {
    /// Creates an empty queue.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    // Depth only changes under the map lock, so a slot is removed only
    // when no caller holds or awaits it.
    fn enter(&self, key: &str) -> Arc<Slot> {
        let mut slots = self.slots.lock();
        let slot = slots.entry(key.to_string()).or_default();
        slot.depth.fetch_add(1, Ordering::SeqCst);
        Arc::clone(slot)
    }

    fn leave(&self, key: &str, slot: &Arc<Slot>) {
        let mut slots = self.slots.lock();
        if slot.depth.fetch_sub(1, Ordering::SeqCst) == 1 {
            slots.remove(key);
        }
    }

    /// Runs `unit` once all earlier work queued under `key` has settled.
    ///
    /// The returned value (including any `Err`) belongs to this unit alone;
    /// it never affects the units queued after it.
    pub async fn run<F, T>(&self, key: &str, unit: F) -> T
    where
        F: Future<Output = T>,
    {
        let depth = DepthGuard {
            queue: self,
            key,
            slot: self.enter(key),
        };

        let _turn = depth.slot.lock.lock().await;
        unit.await
    }

    /// Returns the number of units queued or running under `key`.
    #[must_use]
    pub fn depth(&self, key: &str) -> usize {
        self.slots
            .lock()
            .get(key)
            .map_or(0, |slot| slot.depth.load(Ordering::SeqCst))
    }
}
