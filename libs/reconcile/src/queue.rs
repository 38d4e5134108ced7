//! Deduplicated work queue.
//!
//! Keys move through three sets:
//!
//! ```text
//! add() ──► queued ──get()──► processing ──done()──► (gone)
//!                                  │
//!             add() while here ──► dirty ──done()──► queued again
//! ```

use std::collections::{HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::Notify;
use tracing::trace;

#[derive(Debug, Default)]
struct State {
    /// Keys waiting for a worker, in arrival order.
    queue: VecDeque<String>,

    /// Keys that need processing (queued, or re-added while processing).
    dirty: HashSet<String>,

    /// Keys currently held by a worker.
    processing: HashSet<String>,

    shutting_down: bool,
}

/// A work queue that never hands the same key to two workers at once.
#[derive(Debug, Default)]
pub struct WorkQueue {
    state: Mutex<State>,
    notify: Notify,
}

impl WorkQueue {
    /// Create an empty queue.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Add a key. Coalesces with an already queued entry for the same key.
    pub fn add(&self, key: impl Into<String>) {
        let key = key.into();
        let mut state = self.lock();

        if state.shutting_down || state.dirty.contains(&key) {
            return;
        }

        state.dirty.insert(key.clone());
        if state.processing.contains(&key) {
            trace!(key = %key, "Key is being processed, deferring");
            return;
        }

        state.queue.push_back(key);
        drop(state);
        self.notify.notify_one();
    }

    /// Add a key after `delay` has elapsed.
    pub fn add_after(self: &Arc<Self>, key: impl Into<String>, delay: Duration) {
        let key = key.into();
        if delay.is_zero() {
            self.add(key);
            return;
        }

        let queue = Arc::clone(self);
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            queue.add(key);
        });
    }

    /// Wait for the next key.
    ///
    /// Returns `None` once the queue has been shut down and no keys remain.
    /// The caller must call [`WorkQueue::done`] when it finishes with the key.
    pub async fn get(&self) -> Option<String> {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let mut state = self.lock();
                if let Some(key) = state.queue.pop_front() {
                    state.dirty.remove(&key);
                    state.processing.insert(key.clone());
                    return Some(key);
                }
                if state.shutting_down {
                    return None;
                }
            }

            notified.await;
        }
    }

    /// Mark a key as no longer being processed.
    ///
    /// If the key was re-added in the meantime it goes back on the queue.
    pub fn done(&self, key: &str) {
        let mut state = self.lock();
        state.processing.remove(key);

        if state.dirty.contains(key) {
            state.queue.push_back(key.to_string());
            drop(state);
            self.notify.notify_one();
        }
    }

    /// Stop accepting keys and wake every waiting worker.
    ///
    /// Keys already queued are still handed out by [`WorkQueue::get`].
    pub fn shut_down(&self) {
        self.lock().shutting_down = true;
        self.notify.notify_waiters();
    }

    /// Returns true once [`WorkQueue::shut_down`] was called.
    pub fn is_shutting_down(&self) -> bool {
        self.lock().shutting_down
    }

    /// Number of keys waiting for a worker.
    pub fn len(&self) -> usize {
        self.lock().queue.len()
    }

    /// Returns true if no keys are waiting.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
