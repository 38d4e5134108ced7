//! Registry of running agents.
//!
//! The registry is the single source of truth for whether an agent is
//! running for a target. It holds at most one slot per target:
//!
//! ```text
//!            try_acquire              register
//! (absent) ─────────────► Reserved ─────────────► Running(handle)
//!     ▲                      │                        │
//!     └──── abandon/release ─┘◄──────── release ──────┘ (cancels handle)
//! ```
//!
//! A single mutex guards the whole map. Contention is low: one entry per
//! target, churn only on create and delete.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Mutex, MutexGuard, PoisonError};

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Cancellation capability for one running agent.
///
/// The registry can only invoke the capability; it has no other control over
/// the agent.
pub struct AgentHandle {
    target_id: String,
    cancel: Option<Box<dyn FnOnce() + Send>>,
}

impl AgentHandle {
    pub fn new(target_id: impl Into<String>, cancel: impl FnOnce() + Send + 'static) -> Self {
        Self {
            target_id: target_id.into(),
            cancel: Some(Box::new(cancel)),
        }
    }

    /// Handle that cancels `token` when invoked.
    pub fn from_token(target_id: impl Into<String>, token: CancellationToken) -> Self {
        Self::new(target_id, move || token.cancel())
    }

    pub fn target_id(&self) -> &str {
        &self.target_id
    }

    /// Signal the agent to stop. Consumes the handle.
    pub fn cancel(mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

impl fmt::Debug for AgentHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AgentHandle")
            .field("target_id", &self.target_id)
            .finish_non_exhaustive()
    }
}

#[derive(Debug)]
enum Slot {
    /// Claimed by a reconcile pass that is starting the agent.
    Reserved,
    Running(AgentHandle),
}

/// Map from target identity to its running agent.
#[derive(Debug, Default)]
pub struct AgentRegistry {
    slots: Mutex<HashMap<String, Slot>>,
}

impl AgentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Slot>> {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Reserve the slot for `target_id`.
    ///
    /// Returns false if the slot is already reserved or running. On true the
    /// caller must follow up with [`register`](Self::register) or
    /// [`abandon`](Self::abandon).
    pub fn try_acquire(&self, target_id: &str) -> bool {
        let mut slots = self.lock();
        if slots.contains_key(target_id) {
            return false;
        }
        slots.insert(target_id.to_string(), Slot::Reserved);
        debug!(target_id = %target_id, "Reserved agent slot");
        true
    }

    /// Store the handle for a reserved slot.
    ///
    /// If the slot was released while the agent was starting, the handle is
    /// cancelled immediately and false is returned.
    pub fn register(&self, handle: AgentHandle) -> bool {
        let mut slots = self.lock();
        match slots.get(handle.target_id()) {
            Some(Slot::Reserved) => {
                info!(target_id = %handle.target_id(), "Registered agent");
                slots.insert(handle.target_id().to_string(), Slot::Running(handle));
                true
            }
            Some(Slot::Running(_)) | None => {
                drop(slots);
                warn!(
                    target_id = %handle.target_id(),
                    "Agent slot not reserved, cancelling new agent"
                );
                handle.cancel();
                false
            }
        }
    }

    /// Drop a reservation that never got a handle.
    ///
    /// A running slot is left untouched.
    pub fn abandon(&self, target_id: &str) {
        let mut slots = self.lock();
        if matches!(slots.get(target_id), Some(Slot::Reserved)) {
            slots.remove(target_id);
            debug!(target_id = %target_id, "Abandoned agent slot");
        }
    }

    /// Cancel and remove the agent for `target_id`.
    ///
    /// Returns true if a running agent was cancelled. No-op for absent
    /// targets.
    pub fn release(&self, target_id: &str) -> bool {
        let slot = self.lock().remove(target_id);
        match slot {
            Some(Slot::Running(handle)) => {
                info!(target_id = %target_id, "Cancelling agent");
                handle.cancel();
                true
            }
            Some(Slot::Reserved) => {
                debug!(target_id = %target_id, "Released reservation before agent started");
                false
            }
            None => false,
        }
    }

    /// Cancel and remove every agent. Returns how many were cancelled.
    pub fn release_all(&self) -> usize {
        let slots: Vec<_> = self.lock().drain().collect();

        let mut cancelled = 0;
        for (target_id, slot) in slots {
            if let Slot::Running(handle) = slot {
                debug!(target_id = %target_id, "Cancelling agent on shutdown");
                handle.cancel();
                cancelled += 1;
            }
        }
        cancelled
    }

    /// Returns true if an agent is registered (not merely reserved).
    pub fn is_running(&self, target_id: &str) -> bool {
        matches!(self.lock().get(target_id), Some(Slot::Running(_)))
    }

    /// Returns true if the slot is reserved or running.
    pub fn contains(&self, target_id: &str) -> bool {
        self.lock().contains_key(target_id)
    }

    /// Targets with a registered agent, sorted.
    pub fn running_targets(&self) -> Vec<String> {
        let mut targets: Vec<_> = self
            .lock()
            .iter()
            .filter(|(_, slot)| matches!(slot, Slot::Running(_)))
            .map(|(target, _)| target.clone())
            .collect();
        targets.sort();
        targets
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
