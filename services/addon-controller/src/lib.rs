//! Syncer addon controller library.
//!
//! The controller watches addon resources named `syncer-<target>`. For each
//! one it provisions the target's remote prerequisites and runs exactly one
//! syncer agent; when the resource is deleted it stops the agent before
//! releasing the resource's cleanup finalizer.
//!
//! ## Architecture
//!
//! ```text
//! AddonController  (work queue, workers, resync)
//! └── AddonReconciler  (finalizer protocol, one pass per target)
//!     ├── ResourceStore      (addon resources)
//!     ├── Provisioner        (TemplateRenderer + RemoteClientFactory)
//!     ├── AgentRegistry      (target -> cancellation handle)
//!     └── AgentLauncher      (starts syncer agents)
//! ```
//!
//! ## Modules
//!
//! - `controller`: queue-driven worker pool and trigger sources
//! - `reconciler`: the per-target state machine
//! - `registry`: running agents keyed by target
//! - `provision`: remote prerequisite provisioning
//! - `remote`: server-side apply client
//! - `template`: embedded manifest templates
//! - `store`: addon resource storage
//! - `agent`: syncer agent launcher

pub mod agent;
pub mod config;
pub mod controller;
pub mod error;
pub mod provision;
pub mod reconciler;
pub mod registry;
pub mod remote;
pub mod resource;
pub mod store;
pub mod template;

// Re-export commonly used types
pub use controller::{AddonController, ControllerConfig};
pub use error::ReconcileError;
pub use reconciler::{AddonReconciler, ReconcileOutcome};
pub use registry::{AgentHandle, AgentRegistry};
pub use resource::AddonResource;
