//! Remote provisioning of a target's prerequisites.
//!
//! Every target owns a disjoint namespace on the remote system, reachable at
//! `{base}/clusters/{target}`. Provisioning renders the fixed manifest set for
//! the target and applies it there in declaration order. It is all-or-nothing
//! per pass: the first failure aborts the remaining manifests and the whole
//! set is applied again on the next pass.

use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, info, instrument};

use crate::remote::{ApplyError, ClientError, RemoteClientFactory};
use crate::template::{cluster_params, RenderError, TemplateRenderer, PROVISIONING_MANIFESTS};

/// Provisioning errors.
#[derive(Debug, Error)]
pub enum ProvisionError {
    /// The remote client could not be constructed. Retrying with the same
    /// configuration fails the same way.
    #[error("failed to construct remote client for {target_id}: {source}")]
    ClientBuild {
        target_id: String,
        #[source]
        source: ClientError,
    },

    #[error("failed to render {manifest}: {source}")]
    Render {
        manifest: String,
        #[source]
        source: RenderError,
    },

    #[error("failed to apply {manifest} for {target_id}: {source}")]
    Apply {
        target_id: String,
        manifest: String,
        #[source]
        source: ApplyError,
    },
}

/// Remote endpoint for a target.
pub fn target_endpoint(base: &str, target_id: &str) -> String {
    format!("{}/clusters/{}", base.trim_end_matches('/'), target_id)
}

/// Applies the prerequisite manifests for a target.
pub struct Provisioner {
    base_endpoint: String,
    clients: Arc<dyn RemoteClientFactory>,
    renderer: Arc<dyn TemplateRenderer>,
    manifests: Vec<&'static str>,
}

impl Provisioner {
    /// Provisioner applying the standard manifest set.
    pub fn new(
        base_endpoint: impl Into<String>,
        clients: Arc<dyn RemoteClientFactory>,
        renderer: Arc<dyn TemplateRenderer>,
    ) -> Self {
        Self::with_manifests(base_endpoint, clients, renderer, PROVISIONING_MANIFESTS.to_vec())
    }

    pub fn with_manifests(
        base_endpoint: impl Into<String>,
        clients: Arc<dyn RemoteClientFactory>,
        renderer: Arc<dyn TemplateRenderer>,
        manifests: Vec<&'static str>,
    ) -> Self {
        Self {
            base_endpoint: base_endpoint.into(),
            clients,
            renderer,
            manifests,
        }
    }

    pub fn manifests(&self) -> &[&'static str] {
        &self.manifests
    }

    /// Ensure every prerequisite exists for `target_id`.
    #[instrument(skip(self), fields(manifests = self.manifests.len()))]
    pub async fn provision(&self, target_id: &str) -> Result<(), ProvisionError> {
        let endpoint = target_endpoint(&self.base_endpoint, target_id);
        let applier =
            self.clients
                .connect(&endpoint)
                .map_err(|source| ProvisionError::ClientBuild {
                    target_id: target_id.to_string(),
                    source,
                })?;

        let params = cluster_params(target_id);
        for manifest in &self.manifests {
            let rendered =
                self.renderer
                    .render(manifest, &params)
                    .map_err(|source| ProvisionError::Render {
                        manifest: manifest.to_string(),
                        source,
                    })?;

            let outcome = applier
                .apply(&rendered)
                .await
                .map_err(|source| ProvisionError::Apply {
                    target_id: target_id.to_string(),
                    manifest: manifest.to_string(),
                    source,
                })?;

            debug!(target_id = %target_id, manifest = %manifest, %outcome, "Manifest applied");
        }

        info!(target_id = %target_id, endpoint = %endpoint, "Remote prerequisites provisioned");
        Ok(())
    }
}
