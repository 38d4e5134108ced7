//! Addon reconciler.
//!
//! Each pass converges one target toward what its addon resource declares:
//!
//! 1. Fetch `syncer-<target>`. Missing means already cleaned up.
//! 2. Not deleting and no cleanup finalizer: add it and stop. The update
//!    triggers the next pass, so the finalizer is always durable before any
//!    remote side effect.
//! 3. Deleting: cancel the agent, then drop the finalizer.
//! 4. Otherwise provision the remote prerequisites and make sure exactly one
//!    agent is running.
//!
//! Passes are idempotent and may run any number of times, in any order.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument};

use crate::agent::AgentLauncher;
use crate::error::ReconcileResult;
use crate::provision::Provisioner;
use crate::registry::{AgentHandle, AgentRegistry};
use crate::resource::{addon_name, AddonResource, CLEANUP_FINALIZER};
use crate::store::ResourceStore;

/// What a reconcile pass did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// The resource does not exist; nothing to do.
    NotFound,

    /// The cleanup finalizer was attached; the pass stopped there.
    FinalizerAttached,

    /// Deletion cleanup ran: agent cancelled (if any) and finalizer removed.
    Finalized,

    /// Prerequisites provisioned and a new agent started.
    AgentStarted,

    /// Prerequisites provisioned; an agent was already running.
    AgentRunning,

    /// The agent started but its slot was released meanwhile, so it was
    /// cancelled again.
    AgentDiscarded,
}

/// Reconciles addon resources into running agents.
pub struct AddonReconciler {
    store: Arc<dyn ResourceStore>,
    registry: Arc<AgentRegistry>,
    provisioner: Provisioner,
    launcher: Arc<dyn AgentLauncher>,

    /// Parent of every agent's cancellation token.
    agents_root: CancellationToken,
}

impl AddonReconciler {
    pub fn new(
        store: Arc<dyn ResourceStore>,
        registry: Arc<AgentRegistry>,
        provisioner: Provisioner,
        launcher: Arc<dyn AgentLauncher>,
    ) -> Self {
        Self {
            store,
            registry,
            provisioner,
            launcher,
            agents_root: CancellationToken::new(),
        }
    }

    pub fn registry(&self) -> &Arc<AgentRegistry> {
        &self.registry
    }

    /// Cancel every running agent.
    pub fn stop_all_agents(&self) -> usize {
        let cancelled = self.registry.release_all();
        self.agents_root.cancel();
        cancelled
    }

    /// Run one reconcile pass for `target_id`.
    #[instrument(skip(self))]
    pub async fn reconcile(&self, target_id: &str) -> ReconcileResult<ReconcileOutcome> {
        let name = addon_name(target_id);

        let mut resource = match self.store.get(&name).await {
            Ok(resource) => resource,
            Err(e) if e.is_not_found() => {
                debug!(name = %name, "Addon resource not found, nothing to do");
                return Ok(ReconcileOutcome::NotFound);
            }
            Err(e) => return Err(e.into()),
        };

        if !resource.is_deleting() && resource.add_finalizer(CLEANUP_FINALIZER) {
            self.store.update(&resource).await?;
            info!(name = %name, "Attached cleanup finalizer");
            return Ok(ReconcileOutcome::FinalizerAttached);
        }

        if resource.is_deleting() {
            self.finalize(target_id, resource).await?;
            return Ok(ReconcileOutcome::Finalized);
        }

        self.provisioner.provision(target_id).await?;

        self.ensure_agent(target_id).await
    }

    /// Deletion path: cancel the agent before releasing the finalizer.
    async fn finalize(&self, target_id: &str, mut resource: AddonResource) -> ReconcileResult<()> {
        if self.registry.release(target_id) {
            info!(target_id = %target_id, "Stopped agent for deleted addon");
        }

        if resource.remove_finalizer(CLEANUP_FINALIZER) {
            self.store.update(&resource).await?;
            info!(name = %resource.name, "Removed cleanup finalizer");
        }

        Ok(())
    }

    async fn ensure_agent(&self, target_id: &str) -> ReconcileResult<ReconcileOutcome> {
        if !self.registry.try_acquire(target_id) {
            debug!(target_id = %target_id, "Agent already running");
            return Ok(ReconcileOutcome::AgentRunning);
        }

        let token = self.agents_root.child_token();
        if let Err(e) = self.launcher.launch(target_id, token.clone()).await {
            self.registry.abandon(target_id);
            token.cancel();
            error!(target_id = %target_id, error = %e, "Failed to start agent");
            return Err(e.into());
        }

        if self.registry.register(AgentHandle::from_token(target_id, token)) {
            info!(target_id = %target_id, "Started agent");
            Ok(ReconcileOutcome::AgentStarted)
        } else {
            Ok(ReconcileOutcome::AgentDiscarded)
        }
    }
}
