//! Reconcile error taxonomy.
//!
//! Every variant is retryable by redelivering the same target. Not-found is
//! not an error and never reaches this type.

use thiserror::Error;

use crate::agent::AgentError;
use crate::provision::ProvisionError;
use crate::store::StoreError;

/// Errors aborting a reconcile pass.
#[derive(Debug, Error)]
pub enum ReconcileError {
    /// Fetch or update of the addon resource failed.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Remote prerequisites could not be provisioned.
    #[error(transparent)]
    Provision(#[from] ProvisionError),

    /// The agent could not be started.
    #[error(transparent)]
    Agent(#[from] AgentError),
}

pub type ReconcileResult<T> = Result<T, ReconcileError>;
