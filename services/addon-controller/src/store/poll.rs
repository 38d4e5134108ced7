//! Change notifications for stores without a watch API.
//!
//! Lists the store on an interval and publishes the name of every resource
//! that appeared, changed `resource_version`, or disappeared since the
//! previous listing.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, watch};
use tokio::time::MissedTickBehavior;
use tracing::{debug, warn};

use super::ResourceStore;
use crate::resource::AddonResource;

const CHANNEL_CAPACITY: usize = 256;

/// Last observed `resource_version` per resource name.
#[derive(Debug, Default)]
pub struct ChangeTracker {
    versions: HashMap<String, String>,
}

impl ChangeTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a full listing. Returns the names that changed, sorted.
    pub fn observe(&mut self, resources: &[AddonResource]) -> Vec<String> {
        let mut changed = Vec::new();
        let mut current = HashMap::with_capacity(resources.len());

        for resource in resources {
            if self.versions.get(&resource.name) != Some(&resource.resource_version) {
                changed.push(resource.name.clone());
            }
            current.insert(resource.name.clone(), resource.resource_version.clone());
        }

        changed.extend(
            self.versions
                .keys()
                .filter(|name| !current.contains_key(*name))
                .cloned(),
        );

        self.versions = current;
        changed.sort();
        changed
    }
}

/// Poll `store` every `interval` and publish changed names.
///
/// The first listing reports every resource. Listing failures are logged and
/// retried on the next tick. The task ends on shutdown.
pub fn spawn_change_poller(
    store: Arc<dyn ResourceStore>,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) -> broadcast::Receiver<String> {
    let (events, receiver) = broadcast::channel(CHANNEL_CAPACITY);

    tokio::spawn(async move {
        let mut tracker = ChangeTracker::new();
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let resources = match store.list().await {
                        Ok(resources) => resources,
                        Err(e) => {
                            warn!(error = %e, "Polling addon resources failed");
                            continue;
                        }
                    };
                    for name in tracker.observe(&resources) {
                        // No subscribers left means nobody is listening anymore.
                        if events.send(name).is_err() {
                            return;
                        }
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        debug!("Change poller stopped");
    });

    receiver
}
