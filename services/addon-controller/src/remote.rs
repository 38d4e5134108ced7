//! Remote applier: create-or-update of rendered manifests.
//!
//! The HTTP implementation speaks the Kubernetes server-side apply protocol:
//! one `PATCH` per manifest with `application/apply-patch+yaml`, which
//! creates the object when missing and updates it otherwise.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use reqwest::{StatusCode, Url};
use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, error, info};

/// Field manager recorded on every applied object.
pub const FIELD_MANAGER: &str = "syncer-addon-controller";

const APPLY_PATCH_CONTENT_TYPE: &str = "application/apply-patch+yaml";

/// Errors applying a single manifest.
#[derive(Debug, Error)]
pub enum ApplyError {
    #[error("failed to parse manifest: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("invalid manifest: {0}")]
    InvalidManifest(String),

    #[error("apply request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("apply of {kind}/{name} returned {status}: {body}")]
    Status {
        kind: String,
        name: String,
        status: u16,
        body: String,
    },
}

/// Errors constructing a remote client.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("invalid remote endpoint {endpoint}: {reason}")]
    InvalidEndpoint { endpoint: String, reason: String },

    #[error("invalid bearer token")]
    InvalidToken,

    #[error("failed to build remote client: {0}")]
    Build(#[from] reqwest::Error),
}

/// What an apply did to the remote object.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    Created,
    Updated,
}

impl ApplyOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Updated => "updated",
        }
    }
}

impl std::fmt::Display for ApplyOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Creates or updates the object described by a rendered manifest.
#[async_trait]
pub trait RemoteApplier: Send + Sync {
    async fn apply(&self, manifest: &[u8]) -> Result<ApplyOutcome, ApplyError>;
}

/// Builds appliers bound to a remote endpoint.
pub trait RemoteClientFactory: Send + Sync {
    fn connect(&self, endpoint: &str) -> Result<Arc<dyn RemoteApplier>, ClientError>;
}

/// Settings shared by every remote client.
#[derive(Debug, Clone)]
pub struct RemoteClientConfig {
    /// Bearer token sent with every request.
    pub bearer_token: Option<String>,

    /// Skip TLS certificate verification.
    pub insecure_skip_tls_verify: bool,

    /// Per-request timeout.
    pub timeout: Duration,
}

impl Default for RemoteClientConfig {
    fn default() -> Self {
        Self {
            bearer_token: None,
            insecure_skip_tls_verify: false,
            timeout: Duration::from_secs(30),
        }
    }
}

/// Factory for [`HttpApplier`]s.
#[derive(Debug, Clone, Default)]
pub struct HttpClientFactory {
    config: RemoteClientConfig,
}

impl HttpClientFactory {
    pub fn new(config: RemoteClientConfig) -> Self {
        Self { config }
    }
}

impl RemoteClientFactory for HttpClientFactory {
    fn connect(&self, endpoint: &str) -> Result<Arc<dyn RemoteApplier>, ClientError> {
        let url = Url::parse(endpoint).map_err(|e| ClientError::InvalidEndpoint {
            endpoint: endpoint.to_string(),
            reason: e.to_string(),
        })?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(ClientError::InvalidEndpoint {
                endpoint: endpoint.to_string(),
                reason: format!("unsupported scheme {}", url.scheme()),
            });
        }

        let mut headers = HeaderMap::new();
        if let Some(token) = &self.config.bearer_token {
            let mut value = HeaderValue::from_str(&format!("Bearer {token}"))
                .map_err(|_| ClientError::InvalidToken)?;
            value.set_sensitive(true);
            headers.insert(AUTHORIZATION, value);
        }

        let client = reqwest::Client::builder()
            .timeout(self.config.timeout)
            .default_headers(headers)
            .danger_accept_invalid_certs(self.config.insecure_skip_tls_verify)
            .build()?;

        Ok(Arc::new(HttpApplier {
            client,
            endpoint: endpoint.trim_end_matches('/').to_string(),
        }))
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ManifestHeader {
    api_version: String,
    kind: String,
    metadata: ManifestMetadata,
}

#[derive(Debug, Deserialize)]
struct ManifestMetadata {
    name: String,
    #[serde(default)]
    namespace: Option<String>,
}

impl ManifestHeader {
    fn parse(manifest: &[u8]) -> Result<Self, ApplyError> {
        let header: ManifestHeader = serde_yaml::from_slice(manifest)?;
        if header.api_version.is_empty() || header.kind.is_empty() || header.metadata.name.is_empty()
        {
            return Err(ApplyError::InvalidManifest(
                "apiVersion, kind and metadata.name are required".to_string(),
            ));
        }
        Ok(header)
    }

    /// REST path of the object, relative to the endpoint.
    fn object_path(&self) -> String {
        let group_version = if self.api_version.contains('/') {
            format!("/apis/{}", self.api_version)
        } else {
            format!("/api/{}", self.api_version)
        };

        let namespace = self
            .metadata
            .namespace
            .as_deref()
            .map(|ns| format!("/namespaces/{ns}"))
            .unwrap_or_default();

        format!(
            "{group_version}{namespace}/{}/{}",
            plural(&self.kind),
            self.metadata.name
        )
    }
}

/// Lower-case plural resource name for a kind.
fn plural(kind: &str) -> String {
    let lower = kind.to_ascii_lowercase();
    if lower.ends_with('s') || lower.ends_with('x') || lower.ends_with("ch") || lower.ends_with("sh") {
        format!("{lower}es")
    } else if let Some(stem) = lower.strip_suffix('y') {
        if stem.ends_with(['a', 'e', 'i', 'o', 'u']) {
            format!("{lower}s")
        } else {
            format!("{stem}ies")
        }
    } else {
        format!("{lower}s")
    }
}

/// Server-side-apply client bound to one endpoint.
pub struct HttpApplier {
    client: reqwest::Client,
    endpoint: String,
}

#[async_trait]
impl RemoteApplier for HttpApplier {
    async fn apply(&self, manifest: &[u8]) -> Result<ApplyOutcome, ApplyError> {
        let header = ManifestHeader::parse(manifest)?;
        let url = format!("{}{}", self.endpoint, header.object_path());
        debug!(url = %url, kind = %header.kind, name = %header.metadata.name, "Applying manifest");

        let response = self
            .client
            .patch(&url)
            .query(&[("fieldManager", FIELD_MANAGER), ("force", "true")])
            .header(CONTENT_TYPE, APPLY_PATCH_CONTENT_TYPE)
            .body(manifest.to_vec())
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            error!(
                status = %status,
                kind = %header.kind,
                name = %header.metadata.name,
                "Failed to apply manifest"
            );
            return Err(ApplyError::Status {
                kind: header.kind,
                name: header.metadata.name,
                status: status.as_u16(),
                body,
            });
        }

        let outcome = if response.status() == StatusCode::CREATED {
            ApplyOutcome::Created
        } else {
            ApplyOutcome::Updated
        };
        info!(
            endpoint = %self.endpoint,
            kind = %header.kind,
            name = %header.metadata.name,
            outcome = outcome.as_str(),
            "Applied manifest"
        );
        Ok(outcome)
    }
}
