//! Reconciliation loop primitives.
//!
//! This library provides the building blocks for controllers that converge
//! declared state toward actual state, one key at a time. Key concepts:
//!
//! - **Work queue**: a deduplicated queue of resource keys handed to workers.
//! - **Retry tracking**: per-key failure counts used to pace requeues.
//! - **Backoff**: exponential delay with jitter between failed attempts.
//!
//! # Invariants
//!
//! - A key is never handed to two workers at the same time
//! - A key added while queued is coalesced into the queued entry
//! - A key added while being processed is re-queued once processing is done

use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use rand::Rng;

mod queue;

pub use queue::WorkQueue;

/// Requeue pacing for failed reconcile passes.
///
/// Workers feed it the failure count from [`RetryTracker`]: the first failure
/// waits `base`, every further failure doubles the wait, capped at `max`.
/// Jitter spreads out targets that failed together, such as every target
/// behind a remote endpoint that went down.
#[derive(Debug, Clone)]
pub struct BackoffPolicy {
    /// Delay after the first failure.
    pub base: Duration,

    /// Upper bound on any delay.
    pub max: Duration,

    /// Relative jitter, clamped to 0.0..=1.0.
    pub jitter: f64,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            base: Duration::from_millis(100),
            max: Duration::from_secs(30),
            jitter: 0.25,
        }
    }
}

impl BackoffPolicy {
    /// Delay before requeueing a key that has failed `failures` times in a
    /// row. Zero failures is treated as one.
    pub fn requeue_delay(&self, failures: u32) -> Duration {
        let exponent = failures.saturating_sub(1).min(31);
        let delay = self.base.saturating_mul(1 << exponent).min(self.max);

        let jitter = self.jitter.clamp(0.0, 1.0);
        if jitter == 0.0 {
            return delay;
        }
        delay.mul_f64(1.0 + rand::rng().random_range(-jitter..=jitter))
    }
}

/// Retry tracker for failed reconciliations.
#[derive(Debug, Clone)]
pub struct RetryTracker {
    /// Window after which a key's failure count starts over.
    window: Duration,

    /// Tracked failures: key -> (count, first_failure_time).
    failures: BTreeMap<String, (u32, Instant)>,
}

impl RetryTracker {
    /// Create a new retry tracker.
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            failures: BTreeMap::new(),
        }
    }

    /// Record a failure for a key.
    ///
    /// Returns the number of consecutive failures within the window,
    /// starting at 1.
    pub fn record_failure(&mut self, key: &str) -> u32 {
        let now = Instant::now();

        let (count, first) = self.failures.entry(key.to_string()).or_insert((0, now));

        if now.duration_since(*first) > self.window {
            *count = 0;
            *first = now;
        }

        *count = count.saturating_add(1);
        *count
    }

    /// Current failure count for a key.
    pub fn failures(&self, key: &str) -> u32 {
        self.failures.get(key).map(|(count, _)| *count).unwrap_or(0)
    }

    /// Clear failure tracking for a key (on success).
    pub fn clear(&mut self, key: &str) {
        self.failures.remove(key);
    }

    /// Prune expired entries.
    pub fn prune(&mut self) {
        let now = Instant::now();
        self.failures
            .retain(|_, (_, first)| now.duration_since(*first) <= self.window);
    }
}

/// Default interval between full resyncs.
pub const DEFAULT_RESYNC_INTERVAL: Duration = Duration::from_secs(30);

/// Default number of reconcile workers.
pub const DEFAULT_WORKERS: usize = 4;

/// Default retry window.
pub const DEFAULT_RETRY_WINDOW: Duration = Duration::from_secs(10 * 60); // 10 minutes
