//! Configuration for the sync engine.

use rand::Rng;
use std::time::Duration;

/// Default delay before a scheduled pass when nothing has failed yet.
pub const DEFAULT_BASE_DELAY: Duration = Duration::from_secs(1);

/// Default ceiling on the backoff exponent.
pub const DEFAULT_BACKOFF_CAP: u32 = 6;

/// Default upper bound of the random jitter, as a share of the delay.
pub const DEFAULT_JITTER_RATIO: f64 = 0.1;

/// Default age after which a running pass is presumed crashed.
pub const DEFAULT_STALE_AFTER: Duration = Duration::from_secs(5 * 60);

/// Configuration for the sync engine.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Backoff applied to scheduled passes.
    pub retry: RetryPolicy,
    /// A pass running longer than this is force-cleared by the next caller.
    pub stale_after: Duration,
    /// Whether mutations and failed passes schedule passes automatically.
    pub auto_sync: bool,
}

impl SyncConfig {
    /// Creates a configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the retry policy.
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Sets the staleness ceiling of the pass guard.
    pub fn with_stale_after(mut self, stale_after: Duration) -> Self {
        self.stale_after = stale_after;
        self
    }

    /// Enables or disables automatic scheduling.
    pub fn with_auto_sync(mut self, auto_sync: bool) -> Self {
        self.auto_sync = auto_sync;
        self
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            stale_after: DEFAULT_STALE_AFTER,
            auto_sync: true,
        }
    }
}

/// Exponential backoff for scheduled passes.
///
/// The delay before a pass is `base_delay × 2^min(n, backoff_cap)` where
/// `n` is the highest retry count in the pending log, plus a random jitter
/// of at most `jitter_ratio` of that value.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Delay when no operation has failed yet.
    pub base_delay: Duration,
    /// Ceiling on the exponent.
    pub backoff_cap: u32,
    /// Upper bound of the jitter, as a share of the delay (0.0 disables it).
    pub jitter_ratio: f64,
}

impl RetryPolicy {
    /// Creates a policy with the given base delay and default cap and jitter.
    pub fn new(base_delay: Duration) -> Self {
        Self {
            base_delay,
            ..Self::default()
        }
    }

    /// Creates a policy that schedules passes immediately.
    pub fn immediate() -> Self {
        Self {
            base_delay: Duration::ZERO,
            backoff_cap: 0,
            jitter_ratio: 0.0,
        }
    }

    /// Sets the exponent ceiling.
    pub fn with_backoff_cap(mut self, cap: u32) -> Self {
        self.backoff_cap = cap;
        self
    }

    /// Sets the jitter ratio, clamped to `0.0..=1.0`.
    pub fn with_jitter_ratio(mut self, ratio: f64) -> Self {
        self.jitter_ratio = ratio.clamp(0.0, 1.0);
        self
    }

    /// Returns the delay without jitter for a log whose highest retry
    /// count is `max_retry_count`.
    pub fn base_delay_for(&self, max_retry_count: u32) -> Duration {
        let exponent = max_retry_count.min(self.backoff_cap).min(31);
        self.base_delay.saturating_mul(1u32 << exponent)
    }

    /// Returns the delay including a random jitter.
    pub fn delay_for(&self, max_retry_count: u32) -> Duration {
        let delay = self.base_delay_for(max_retry_count);
        if self.jitter_ratio <= 0.0 || delay.is_zero() {
            return delay;
        }
        let jitter = rand::thread_rng().gen_range(0.0..=self.jitter_ratio);
        delay + delay.mul_f64(jitter)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base_delay: DEFAULT_BASE_DELAY,
            backoff_cap: DEFAULT_BACKOFF_CAP,
            jitter_ratio: DEFAULT_JITTER_RATIO,
        }
    }
}
