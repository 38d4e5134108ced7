//! In-memory resource store.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::{broadcast, RwLock};
use tracing::debug;

use super::{ResourceStore, StoreError};
use crate::resource::AddonResource;

/// In-memory store mirroring API-server semantics:
///
/// - every write bumps `resource_version`
/// - updates with a stale version fail with a conflict
/// - deleting a resource with finalizers only sets `deletion_timestamp`
/// - a deleting resource is removed once its last finalizer is cleared
///
/// Every change publishes the resource name to subscribers.
pub struct InMemoryStore {
    resources: RwLock<HashMap<String, AddonResource>>,
    version: AtomicU64,
    events: broadcast::Sender<String>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(256);
        Self {
            resources: RwLock::new(HashMap::new()),
            version: AtomicU64::new(0),
            events,
        }
    }

    /// Subscribe to change notifications (resource names).
    pub fn subscribe(&self) -> broadcast::Receiver<String> {
        self.events.subscribe()
    }

    fn next_version(&self) -> String {
        (self.version.fetch_add(1, Ordering::SeqCst) + 1).to_string()
    }

    fn publish(&self, name: &str) {
        // No subscribers is fine.
        let _ = self.events.send(name.to_string());
    }

    /// Create a resource.
    pub async fn create(&self, resource: AddonResource) -> Result<AddonResource, StoreError> {
        let mut resources = self.resources.write().await;
        if resources.contains_key(&resource.name) {
            return Err(StoreError::Conflict(resource.name));
        }

        let mut created = resource;
        created.resource_version = self.next_version();
        resources.insert(created.name.clone(), created.clone());
        drop(resources);

        debug!(name = %created.name, "Created addon resource");
        self.publish(&created.name);
        Ok(created)
    }

    /// Request deletion of a resource.
    ///
    /// Resources without finalizers are removed immediately; otherwise the
    /// deletion timestamp is set and removal waits for the finalizers.
    pub async fn delete(&self, name: &str) -> Result<(), StoreError> {
        let mut resources = self.resources.write().await;
        let Some(resource) = resources.get_mut(name) else {
            return Err(StoreError::NotFound(name.to_string()));
        };

        if resource.finalizers.is_empty() {
            resources.remove(name);
            debug!(name = %name, "Removed addon resource");
        } else if resource.deletion_timestamp.is_none() {
            resource.deletion_timestamp = Some(Utc::now());
            resource.resource_version = self.next_version();
            debug!(name = %name, "Marked addon resource for deletion");
        } else {
            return Ok(());
        }
        drop(resources);

        self.publish(name);
        Ok(())
    }

    /// Returns true if the resource exists.
    pub async fn contains(&self, name: &str) -> bool {
        self.resources.read().await.contains_key(name)
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ResourceStore for InMemoryStore {
    async fn get(&self, name: &str) -> Result<AddonResource, StoreError> {
        self.resources
            .read()
            .await
            .get(name)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(name.to_string()))
    }

    async fn update(&self, resource: &AddonResource) -> Result<AddonResource, StoreError> {
        let mut resources = self.resources.write().await;
        let Some(current) = resources.get(&resource.name) else {
            return Err(StoreError::NotFound(resource.name.clone()));
        };

        if current.resource_version != resource.resource_version {
            return Err(StoreError::Conflict(resource.name.clone()));
        }

        let mut updated = resource.clone();
        // Deletion is only requested through `delete`.
        updated.deletion_timestamp = current.deletion_timestamp;
        updated.resource_version = self.next_version();

        if updated.is_deleting() && updated.finalizers.is_empty() {
            resources.remove(&updated.name);
            debug!(name = %updated.name, "Finalizers cleared, removed addon resource");
        } else {
            resources.insert(updated.name.clone(), updated.clone());
        }
        drop(resources);

        self.publish(&updated.name);
        Ok(updated)
    }

    async fn list(&self) -> Result<Vec<AddonResource>, StoreError> {
        let mut items: Vec<_> = self.resources.read().await.values().cloned().collect();
        items.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(items)
    }
}
