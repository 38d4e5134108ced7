//! REST client for the hub's addon API.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tracing::{debug, error};

use super::{ResourceStore, StoreError};
use crate::resource::AddonResource;

#[derive(Debug, Deserialize)]
struct AddonList {
    #[serde(default)]
    items: Vec<AddonResource>,
}

/// Resource store backed by the hub's addon API.
///
/// Routes:
/// - `GET  {base}/v1/addons`
/// - `GET  {base}/v1/addons/{name}`
/// - `PUT  {base}/v1/addons/{name}`
pub struct HttpResourceStore {
    client: reqwest::Client,
    base_url: String,
}

impl HttpResourceStore {
    /// Create a new store client.
    pub fn new(base_url: impl Into<String>) -> Result<Self, StoreError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    fn addon_url(&self, name: &str) -> String {
        format!("{}/v1/addons/{}", self.base_url, name)
    }

    async fn decode<T: DeserializeOwned>(
        name: &str,
        response: reqwest::Response,
    ) -> Result<T, StoreError> {
        let body = response.bytes().await?;
        serde_json::from_slice(&body).map_err(|source| StoreError::Decode {
            name: name.to_string(),
            source,
        })
    }

    async fn error_for(name: &str, response: reqwest::Response) -> StoreError {
        let status = response.status();
        match status {
            StatusCode::NOT_FOUND => StoreError::NotFound(name.to_string()),
            StatusCode::CONFLICT => StoreError::Conflict(name.to_string()),
            _ => {
                let body = response.text().await.unwrap_or_default();
                error!(status = %status, body = %body, name = %name, "Addon store request failed");
                StoreError::Status {
                    status: status.as_u16(),
                    body,
                }
            }
        }
    }
}

#[async_trait]
impl ResourceStore for HttpResourceStore {
    async fn get(&self, name: &str) -> Result<AddonResource, StoreError> {
        let url = self.addon_url(name);
        debug!(url = %url, "Fetching addon resource");

        let response = self.client.get(&url).send().await?;
        if !response.status().is_success() {
            return Err(Self::error_for(name, response).await);
        }

        Self::decode(name, response).await
    }

    async fn update(&self, resource: &AddonResource) -> Result<AddonResource, StoreError> {
        let url = self.addon_url(&resource.name);
        debug!(
            url = %url,
            resource_version = %resource.resource_version,
            "Updating addon resource"
        );

        let response = self.client.put(&url).json(resource).send().await?;
        if !response.status().is_success() {
            return Err(Self::error_for(&resource.name, response).await);
        }

        Self::decode(&resource.name, response).await
    }

    async fn list(&self) -> Result<Vec<AddonResource>, StoreError> {
        let url = format!("{}/v1/addons", self.base_url);
        debug!(url = %url, "Listing addon resources");

        let response = self.client.get(&url).send().await?;
        if !response.status().is_success() {
            return Err(Self::error_for("*", response).await);
        }

        let list: AddonList = Self::decode("*", response).await?;
        Ok(list.items)
    }
}
