//! Stress tests for Larder.
//!
//! These helpers drive many concurrent mutations through one cache, with
//! and without sync passes running alongside, and report what happened.

use crate::fixtures::{patch, TestLarder, TEST_OWNER};
use larder_core::EntityCache;
use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Result of a stress test run.
#[derive(Debug, Clone)]
pub struct StressTestResult {
    /// Total operations performed.
    pub total_ops: usize,
    /// Successful operations.
    pub successful_ops: usize,
    /// Failed operations.
    pub failed_ops: usize,
    /// Total duration.
    pub duration: Duration,
    /// Operations per second.
    pub ops_per_second: f64,
}

impl StressTestResult {
    /// Creates a new result.
    pub fn new(successful: usize, failed: usize, duration: Duration) -> Self {
        let total = successful + failed;
        let ops_per_second = if duration.as_secs_f64() > 0.0 {
            total as f64 / duration.as_secs_f64()
        } else {
            0.0
        };

        Self {
            total_ops: total,
            successful_ops: successful,
            failed_ops: failed,
            duration,
            ops_per_second,
        }
    }

    /// Prints a summary of the test.
    pub fn print_summary(&self, name: &str) {
        println!("\n=== {name} ===");
        println!("Total operations: {}", self.total_ops);
        println!("Successful: {}", self.successful_ops);
        println!("Failed: {}", self.failed_ops);
        println!("Duration: {:?}", self.duration);
        println!("Throughput: {:.2} ops/sec", self.ops_per_second);
    }
}

/// Configuration for stress tests.
#[derive(Debug, Clone)]
pub struct StressConfig {
    /// Number of concurrent tasks.
    pub tasks: usize,
    /// Mutations each task performs.
    pub mutations_per_task: usize,
}

impl Default for StressConfig {
    fn default() -> Self {
        Self {
            tasks: 8,
            mutations_per_task: 50,
        }
    }
}

impl StressConfig {
    /// Total mutations across all tasks.
    pub fn total(&self) -> usize {
        self.tasks * self.mutations_per_task
    }
}

async fn run_tasks<F, Fut>(cache: &Arc<EntityCache>, config: &StressConfig, f: F) -> StressTestResult
where
    F: Fn(Arc<EntityCache>, usize, usize) -> Fut,
    Fut: std::future::Future<Output = bool> + Send + 'static,
{
    let successful = Arc::new(AtomicUsize::new(0));
    let failed = Arc::new(AtomicUsize::new(0));
    let start = Instant::now();

    let mut handles = Vec::with_capacity(config.tasks);
    for task in 0..config.tasks {
        for i in 0..config.mutations_per_task {
            let fut = f(Arc::clone(cache), task, i);
            let successful = Arc::clone(&successful);
            let failed = Arc::clone(&failed);
            handles.push(tokio::spawn(async move {
                if fut.await {
                    successful.fetch_add(1, Ordering::Relaxed);
                } else {
                    failed.fetch_add(1, Ordering::Relaxed);
                }
            }));
        }
    }

    for handle in handles {
        handle.await.expect("Task panicked");
    }

    StressTestResult::new(
        successful.load(Ordering::Relaxed),
        failed.load(Ordering::Relaxed),
        start.elapsed(),
    )
}

/// Runs concurrent creates of distinct records.
pub async fn stress_concurrent_creates(larder: &TestLarder, config: &StressConfig) -> StressTestResult {
    run_tasks(larder.cache(), config, |cache, task, i| async move {
        cache
            .create(patch(json!({ "name": format!("task {task} item {i}") })))
            .await
            .is_ok()
    })
    .await
}

/// Runs concurrent updates against one record.
pub async fn stress_concurrent_updates(
    larder: &TestLarder,
    target: &str,
    config: &StressConfig,
) -> StressTestResult {
    let target = target.to_string();
    run_tasks(larder.cache(), config, move |cache, task, i| {
        let target = target.clone();
        async move {
            cache
                .update(&target, patch(json!({ "name": format!("task {task} rev {i}") })))
                .await
                .is_ok()
        }
    })
    .await
}

/// Runs concurrent creates while sync passes drain the log.
///
/// Keeps syncing after the mutations finish until the log is empty or
/// `max_passes` passes ran.
pub async fn stress_sync_under_load(
    larder: &TestLarder,
    config: &StressConfig,
    max_passes: usize,
) -> StressTestResult {
    let engine = larder.engine().clone();
    let syncing = tokio::spawn(async move {
        for _ in 0..max_passes {
            let _ = engine.sync_pending_operations().await;
            tokio::task::yield_now().await;
        }
    });

    let result = stress_concurrent_creates(larder, config).await;
    syncing.await.expect("Sync task panicked");

    for _ in 0..max_passes {
        let pending = larder.cache().pending_operations().await.expect("Failed to list operations");
        if pending.is_empty() {
            break;
        }
        larder.sync_now().await.expect("Sync pass failed");
    }
    result
}

/// Counts visible records of the test owner.
pub async fn visible_count(larder: &TestLarder) -> usize {
    larder
        .cache()
        .read_all(TEST_OWNER)
        .await
        .expect("Failed to read records")
        .len()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::integration::invariants;
    use larder_core::OperationType;

    fn small() -> StressConfig {
        StressConfig {
            tasks: 4,
            mutations_per_task: 10,
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_creates_each_queue_one_operation() {
        let larder = TestLarder::memory().await;
        let config = small();
        let result = stress_concurrent_creates(&larder, &config).await;
        assert_eq!(result.successful_ops, config.total());

        let ops = larder.cache().pending_operations().await.unwrap();
        assert_eq!(ops.len(), config.total());
        assert!(ops.iter().all(|op| op.op_type() == OperationType::Create));
        assert_eq!(visible_count(&larder).await, config.total());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_updates_keep_every_operation() {
        let larder = TestLarder::memory().await;
        let record = larder.create_named("target").await;
        let config = small();

        let result = stress_concurrent_updates(&larder, &record.id, &config).await;
        assert_eq!(result.failed_ops, 0);

        let ops = larder.cache().pending_operations().await.unwrap();
        assert_eq!(ops.len(), config.total() + 1);
        let last = ops.last().and_then(|op| op.kind.record()).cloned().unwrap();
        let current = larder.cache().get(&record.id).await.unwrap().unwrap();
        assert_eq!(current.fields, last.fields);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_sync_under_load_converges() {
        let larder = TestLarder::memory().await;
        let config = small();

        let result = stress_sync_under_load(&larder, &config, 50).await;
        assert_eq!(result.successful_ops, config.total());

        let items = larder.cache().all_items().await.unwrap();
        let ops = larder.cache().pending_operations().await.unwrap();
        assert!(ops.is_empty());
        assert!(invariants(&items, &ops).is_empty());
        assert_eq!(items.len(), config.total());
        assert!(items.iter().all(|item| !item.needs_sync));
        assert_eq!(larder.remote.records(crate::TEST_ENTITY_TYPE).len(), config.total());
    }
}
