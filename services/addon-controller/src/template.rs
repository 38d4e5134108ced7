//! Manifest templates shipped with the binary.
//!
//! Templates use `{{ .Name }}` placeholders that are substituted from a
//! parameter map. Nothing else of the template language is supported.

use std::collections::{BTreeMap, HashMap};

use thiserror::Error;

/// CRD for the `clusters.cluster.example.dev` schema.
pub const CLUSTER_CRD_MANIFEST: &str = "manifests/cluster.example.dev_clusters.yaml";

/// Cluster role granting the syncer access to the cluster schema.
pub const SYNCER_CLUSTER_ROLE_MANIFEST: &str = "manifests/kcp_clusterrole.yaml";

/// CRD for `deployments.apps`, required before the syncer deploys workloads.
pub const DEPLOYMENTS_CRD_MANIFEST: &str = "manifests/apps_deployments.yaml";

/// Manifests applied for every target, in order. Later manifests reference
/// names defined by earlier ones.
pub const PROVISIONING_MANIFESTS: [&str; 3] = [
    CLUSTER_CRD_MANIFEST,
    SYNCER_CLUSTER_ROLE_MANIFEST,
    DEPLOYMENTS_CRD_MANIFEST,
];

/// Template parameter set.
pub type TemplateParams = BTreeMap<String, String>;

/// Parameters for rendering a target's manifests.
pub fn cluster_params(target_id: &str) -> TemplateParams {
    BTreeMap::from([("Cluster".to_string(), target_id.to_string())])
}

/// Template rendering errors.
#[derive(Debug, Error)]
pub enum RenderError {
    #[error("unknown template: {0}")]
    UnknownTemplate(String),

    #[error("template {template} references missing parameter {param}")]
    MissingParam { template: String, param: String },

    #[error("template {template} has a malformed placeholder at byte {offset}")]
    Malformed { template: String, offset: usize },
}

/// Renders a named manifest template against a parameter set.
pub trait TemplateRenderer: Send + Sync {
    fn render(&self, name: &str, params: &TemplateParams) -> Result<Vec<u8>, RenderError>;
}

/// Templates compiled into the binary.
#[derive(Debug, Clone)]
pub struct EmbeddedTemplates {
    templates: HashMap<&'static str, &'static str>,
}

impl EmbeddedTemplates {
    pub fn new() -> Self {
        Self::from_sources([
            (
                CLUSTER_CRD_MANIFEST,
                include_str!("../manifests/cluster.example.dev_clusters.yaml"),
            ),
            (
                SYNCER_CLUSTER_ROLE_MANIFEST,
                include_str!("../manifests/kcp_clusterrole.yaml"),
            ),
            (
                DEPLOYMENTS_CRD_MANIFEST,
                include_str!("../manifests/apps_deployments.yaml"),
            ),
        ])
    }

    /// Build a renderer over an arbitrary set of `(name, source)` pairs.
    pub fn from_sources(
        sources: impl IntoIterator<Item = (&'static str, &'static str)>,
    ) -> Self {
        Self {
            templates: sources.into_iter().collect(),
        }
    }

    /// Sorted template names.
    pub fn names(&self) -> Vec<&'static str> {
        let mut names: Vec<_> = self.templates.keys().copied().collect();
        names.sort_unstable();
        names
    }
}

impl Default for EmbeddedTemplates {
    fn default() -> Self {
        Self::new()
    }
}

impl TemplateRenderer for EmbeddedTemplates {
    fn render(&self, name: &str, params: &TemplateParams) -> Result<Vec<u8>, RenderError> {
        let source = self
            .templates
            .get(name)
            .ok_or_else(|| RenderError::UnknownTemplate(name.to_string()))?;

        render_template(name, source, params).map(String::into_bytes)
    }
}

fn render_template(name: &str, source: &str, params: &TemplateParams) -> Result<String, RenderError> {
    let mut out = String::with_capacity(source.len());
    let mut rest = source;
    let mut consumed = 0;

    while let Some(start) = rest.find("{{") {
        out.push_str(&rest[..start]);

        let malformed = || RenderError::Malformed {
            template: name.to_string(),
            offset: consumed + start,
        };

        let after_open = &rest[start + 2..];
        let end = after_open.find("}}").ok_or_else(malformed)?;
        let expr = after_open[..end].trim();

        let param = expr
            .strip_prefix('.')
            .filter(|p| !p.is_empty() && p.chars().all(|c| c.is_ascii_alphanumeric() || c == '_'))
            .ok_or_else(malformed)?;

        let value = params.get(param).ok_or_else(|| RenderError::MissingParam {
            template: name.to_string(),
            param: param.to_string(),
        })?;
        out.push_str(value);

        let advance = start + 2 + end + 2;
        consumed += advance;
        rest = &rest[advance..];
    }

    out.push_str(rest);
    Ok(out)
}
