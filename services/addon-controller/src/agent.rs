//! Syncer agents.
//!
//! An agent is a long-lived task bound to one target. Its synchronization
//! work is outside this crate; the controller only starts it and later
//! signals it to stop through the cancellation token it was started with.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Url;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument};

use crate::provision::target_endpoint;
use crate::resource::addon_name;

/// Agent start errors.
#[derive(Debug, Error)]
pub enum AgentError {
    #[error("invalid management endpoint {endpoint}: {reason}")]
    InvalidEndpoint { endpoint: String, reason: String },

    #[error("agent credential {0} is empty")]
    MissingCredential(&'static str),
}

/// Starts agents.
#[async_trait]
pub trait AgentLauncher: Send + Sync {
    /// Construct and start the agent for `target_id`.
    ///
    /// Returns once the agent is running. The agent must unwind when
    /// `cancel` fires.
    async fn launch(&self, target_id: &str, cancel: CancellationToken) -> Result<(), AgentError>;
}

/// Credential pair handed to every agent.
#[derive(Clone, Default)]
pub struct AgentCredentials {
    pub ca: Vec<u8>,
    pub key: Vec<u8>,
}

impl fmt::Debug for AgentCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AgentCredentials")
            .field("ca_len", &self.ca.len())
            .field("key", &"<redacted>")
            .finish()
    }
}

/// Settings for syncer agents.
#[derive(Debug, Clone)]
pub struct SyncerAgentConfig {
    /// Base management endpoint agents register with.
    pub management_url: String,

    /// Base remote endpoint; each agent gets its target's namespace.
    pub remote_url: String,

    pub credentials: AgentCredentials,

    /// Interval between liveness ticks.
    pub heartbeat_interval: Duration,
}

/// Launches one syncer agent task per target.
pub struct SyncerAgentLauncher {
    config: SyncerAgentConfig,
}

impl SyncerAgentLauncher {
    pub fn new(config: SyncerAgentConfig) -> Self {
        Self { config }
    }

    fn build_agent(&self, target_id: &str) -> Result<SyncerAgent, AgentError> {
        let management_url =
            Url::parse(&self.config.management_url).map_err(|e| AgentError::InvalidEndpoint {
                endpoint: self.config.management_url.clone(),
                reason: e.to_string(),
            })?;

        if self.config.credentials.ca.is_empty() {
            return Err(AgentError::MissingCredential("ca"));
        }
        if self.config.credentials.key.is_empty() {
            return Err(AgentError::MissingCredential("key"));
        }

        Ok(SyncerAgent {
            target_id: target_id.to_string(),
            addon_name: addon_name(target_id),
            management_url,
            remote_endpoint: target_endpoint(&self.config.remote_url, target_id),
            heartbeat_interval: self.config.heartbeat_interval,
        })
    }
}

#[async_trait]
impl AgentLauncher for SyncerAgentLauncher {
    async fn launch(&self, target_id: &str, cancel: CancellationToken) -> Result<(), AgentError> {
        let agent = self.build_agent(target_id)?;
        tokio::spawn(agent.run(cancel));
        Ok(())
    }
}

/// A running syncer agent.
#[derive(Debug)]
struct SyncerAgent {
    target_id: String,
    addon_name: String,
    management_url: Url,
    remote_endpoint: String,
    heartbeat_interval: Duration,
}

impl SyncerAgent {
    #[instrument(skip_all, fields(target_id = %self.target_id, addon = %self.addon_name))]
    async fn run(self, cancel: CancellationToken) {
        info!(
            management_url = %self.management_url,
            remote_endpoint = %self.remote_endpoint,
            "Syncer agent started"
        );

        let mut heartbeat = tokio::time::interval(self.heartbeat_interval);
        let mut ticks: u64 = 0;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = heartbeat.tick() => {
                    ticks += 1;
                    debug!(ticks, "Syncer agent alive");
                }
            }
        }

        info!(ticks, "Syncer agent stopped");
    }
}
