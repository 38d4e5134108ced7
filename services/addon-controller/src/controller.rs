//! Controller loop.
//!
//! Feeds target identities into a deduplicated work queue and drains it with
//! a pool of workers, each running reconcile passes:
//!
//! ```text
//! startup resync ─┐
//! periodic resync ├──► WorkQueue ──► worker × N ──► AddonReconciler
//! notifications  ─┘        ▲                              │
//!                          └──── add_after(backoff) ◄─────┘ on error
//! ```
//!
//! The queue never hands one target to two workers at once. The registry
//! lives only in memory, so a full resync on startup rebuilds it.

use std::sync::Arc;
use std::time::Duration;

use syncer_reconcile::{BackoffPolicy, RetryTracker, WorkQueue};
use tokio::sync::{broadcast, watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument, warn};

use crate::reconciler::{AddonReconciler, ReconcileOutcome};
use crate::resource::target_id_from_name;
use crate::store::{ResourceStore, StoreError};

/// Controller loop configuration.
#[derive(Debug, Clone)]
pub struct ControllerConfig {
    /// Number of concurrent reconcile workers.
    pub workers: usize,

    /// Interval between full resyncs.
    pub resync_interval: Duration,

    /// Requeue delay after failed passes.
    pub backoff: BackoffPolicy,

    /// Window after which a target's failure count starts over.
    pub retry_window: Duration,

    /// How long to wait for workers on shutdown.
    pub shutdown_timeout: Duration,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            workers: syncer_reconcile::DEFAULT_WORKERS,
            resync_interval: syncer_reconcile::DEFAULT_RESYNC_INTERVAL,
            backoff: BackoffPolicy::default(),
            retry_window: syncer_reconcile::DEFAULT_RETRY_WINDOW,
            shutdown_timeout: Duration::from_secs(10),
        }
    }
}

/// Drives the reconciler from resource changes.
pub struct AddonController {
    reconciler: Arc<AddonReconciler>,
    store: Arc<dyn ResourceStore>,
    queue: Arc<WorkQueue>,
    retries: Mutex<RetryTracker>,
    config: ControllerConfig,
}

impl AddonController {
    pub fn new(
        reconciler: Arc<AddonReconciler>,
        store: Arc<dyn ResourceStore>,
        config: ControllerConfig,
    ) -> Self {
        Self {
            reconciler,
            store,
            queue: Arc::new(WorkQueue::new()),
            retries: Mutex::new(RetryTracker::new(config.retry_window)),
            config,
        }
    }

    pub fn queue(&self) -> &Arc<WorkQueue> {
        &self.queue
    }

    pub fn reconciler(&self) -> &Arc<AddonReconciler> {
        &self.reconciler
    }

    /// Enqueue a resource by name.
    ///
    /// Names outside the `syncer-` convention are ignored; returns whether
    /// the name was accepted.
    pub fn enqueue_name(&self, name: &str) -> bool {
        match target_id_from_name(name) {
            Some(target_id) => {
                self.queue.add(target_id);
                true
            }
            None => {
                debug!(name = %name, "Ignoring resource outside naming convention");
                false
            }
        }
    }

    /// Enqueue every existing resource. Returns how many were enqueued.
    pub async fn resync(&self) -> Result<usize, StoreError> {
        let resources = self.store.list().await?;
        let enqueued = resources
            .iter()
            .filter(|resource| self.enqueue_name(&resource.name))
            .count();

        self.retries.lock().await.prune();
        debug!(enqueued, total = resources.len(), "Resynced addon resources");
        Ok(enqueued)
    }

    /// Process one key from the queue.
    ///
    /// Returns false once the queue has shut down.
    pub async fn process_next(&self) -> bool {
        let Some(target_id) = self.queue.get().await else {
            return false;
        };

        if self.queue.is_shutting_down() {
            self.queue.done(&target_id);
            return false;
        }

        match self.reconciler.reconcile(&target_id).await {
            Ok(outcome) => {
                self.retries.lock().await.clear(&target_id);
                debug!(target_id = %target_id, ?outcome, "Reconciled");
                // The attach pass stops early; run the next one without
                // waiting for a notification. Handed out again after `done`.
                if outcome == ReconcileOutcome::FinalizerAttached {
                    self.queue.add(target_id.clone());
                }
            }
            Err(e) => {
                let failures = self.retries.lock().await.record_failure(&target_id);
                let delay = self.config.backoff.requeue_delay(failures);
                warn!(
                    target_id = %target_id,
                    error = %e,
                    failures,
                    retry_in_ms = delay.as_millis() as u64,
                    "Reconcile failed, requeueing"
                );
                self.queue.add_after(target_id.clone(), delay);
            }
        }

        self.queue.done(&target_id);
        true
    }

    /// Forward store change notifications into the queue.
    pub fn spawn_notification_forwarder(
        self: &Arc<Self>,
        mut events: broadcast::Receiver<String>,
        mut shutdown: watch::Receiver<bool>,
    ) -> JoinHandle<()> {
        let controller = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    event = events.recv() => match event {
                        Ok(name) => {
                            controller.enqueue_name(&name);
                        }
                        Err(broadcast::error::RecvError::Lagged(missed)) => {
                            warn!(missed, "Missed change notifications, resyncing");
                            if let Err(e) = controller.resync().await {
                                error!(error = %e, "Resync after missed notifications failed");
                            }
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    },
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            break;
                        }
                    }
                }
            }
            debug!("Notification forwarder stopped");
        })
    }

    /// Run until shutdown is signaled, then stop every agent.
    #[instrument(skip(self, shutdown), name = "addon_controller")]
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        info!(
            workers = self.config.workers,
            resync_interval_secs = self.config.resync_interval.as_secs(),
            "Starting addon controller"
        );

        match self.resync().await {
            Ok(enqueued) => info!(enqueued, "Initial resync complete"),
            Err(e) => error!(error = %e, "Initial resync failed, waiting for next resync"),
        }

        let workers: Vec<_> = (0..self.config.workers.max(1))
            .map(|worker| {
                let controller = Arc::clone(&self);
                tokio::spawn(async move {
                    while controller.process_next().await {}
                    debug!(worker, "Worker stopped");
                })
            })
            .collect();

        let mut resync = tokio::time::interval(self.config.resync_interval);
        // The initial resync already ran.
        resync.tick().await;

        loop {
            tokio::select! {
                _ = resync.tick() => {
                    if let Err(e) = self.resync().await {
                        error!(error = %e, "Periodic resync failed");
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("Addon controller shutting down");
                        break;
                    }
                }
            }
        }

        self.queue.shut_down();
        for worker in workers {
            if tokio::time::timeout(self.config.shutdown_timeout, worker)
                .await
                .is_err()
            {
                warn!("Worker did not shut down in time");
            }
        }

        let stopped = self.reconciler.stop_all_agents();
        info!(stopped, "Addon controller stopped");
    }
}
