//! Resource store interface.
//!
//! The store holds the authoritative addon resources. Two implementations
//! are provided:
//!
//! - `InMemoryStore`: API-server-like semantics with change notifications,
//!   used in tests and local development.
//! - `HttpResourceStore`: REST client for the hub's addon API. It has no
//!   watch endpoint; `spawn_change_poller` derives notifications by listing.

mod http;
mod memory;
mod poll;

use async_trait::async_trait;
use thiserror::Error;

use crate::resource::AddonResource;

pub use http::HttpResourceStore;
pub use memory::InMemoryStore;
pub use poll::{spawn_change_poller, ChangeTracker};

/// Resource store errors.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The named resource does not exist.
    #[error("addon resource not found: {0}")]
    NotFound(String),

    /// Optimistic update lost against a concurrent writer.
    #[error("conflict updating addon resource {0}")]
    Conflict(String),

    /// Transport-level failure talking to the store.
    #[error("store request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// Store answered with a body that is not a valid resource.
    #[error("failed to decode addon resource {name}: {source}")]
    Decode {
        name: String,
        #[source]
        source: serde_json::Error,
    },

    /// Store answered with an unexpected status.
    #[error("store returned {status}: {body}")]
    Status { status: u16, body: String },

    /// Any other backend failure.
    #[error("store backend error: {0}")]
    Backend(String),
}

impl StoreError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict(_))
    }
}

/// Authoritative state of addon resources.
#[async_trait]
pub trait ResourceStore: Send + Sync {
    /// Fetch a resource by name.
    async fn get(&self, name: &str) -> Result<AddonResource, StoreError>;

    /// Persist a modified resource.
    ///
    /// Fails with [`StoreError::Conflict`] if `resource_version` is stale.
    async fn update(&self, resource: &AddonResource) -> Result<AddonResource, StoreError>;

    /// List every resource.
    async fn list(&self) -> Result<Vec<AddonResource>, StoreError>;
}
