//! Addon resource model and naming convention.
//!
//! An addon resource named `syncer-<target>` requests one syncer agent for
//! `<target>`. The controller only ever mutates the resource to add or remove
//! its own cleanup finalizer.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Name prefix selecting the addon resources this controller manages.
pub const ADDON_NAME_PREFIX: &str = "syncer-";

/// Finalizer marker that blocks deletion until the agent has been stopped.
pub const CLEANUP_FINALIZER: &str = "addon.open-cluster-management.io/cleanup";

/// Build the resource name for a target.
pub fn addon_name(target_id: &str) -> String {
    format!("{ADDON_NAME_PREFIX}{target_id}")
}

/// Derive the target identity from a resource name.
///
/// Returns `None` for names outside the `syncer-` convention or with an
/// empty target.
pub fn target_id_from_name(name: &str) -> Option<&str> {
    name.strip_prefix(ADDON_NAME_PREFIX)
        .filter(|target| !target.is_empty())
}

/// Declarative request for one managed target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddonResource {
    pub name: String,

    /// Finalizer markers. Treated as a set; order is preserved.
    #[serde(default)]
    pub finalizers: Vec<String>,

    /// Set once deletion has been requested.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deletion_timestamp: Option<DateTime<Utc>>,

    /// Opaque version used for optimistic updates.
    #[serde(default)]
    pub resource_version: String,
}

impl AddonResource {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            finalizers: Vec::new(),
            deletion_timestamp: None,
            resource_version: String::new(),
        }
    }

    /// Resource requesting an agent for `target_id`.
    pub fn for_target(target_id: &str) -> Self {
        Self::new(addon_name(target_id))
    }

    pub fn is_deleting(&self) -> bool {
        self.deletion_timestamp.is_some()
    }

    pub fn target_id(&self) -> Option<&str> {
        target_id_from_name(&self.name)
    }

    pub fn has_finalizer(&self, finalizer: &str) -> bool {
        self.finalizers.iter().any(|f| f == finalizer)
    }

    /// Add a finalizer. Returns false if it was already present.
    pub fn add_finalizer(&mut self, finalizer: &str) -> bool {
        if self.has_finalizer(finalizer) {
            return false;
        }
        self.finalizers.push(finalizer.to_string());
        true
    }

    /// Remove every occurrence of a finalizer. Returns false if none was present.
    pub fn remove_finalizer(&mut self, finalizer: &str) -> bool {
        let before = self.finalizers.len();
        self.finalizers.retain(|f| f != finalizer);
        self.finalizers.len() != before
    }
}
