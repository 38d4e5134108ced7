//! Configuration for the addon controller.

use std::time::Duration;

use anyhow::{bail, Context, Result};

use crate::agent::{AgentCredentials, SyncerAgentConfig};
use crate::controller::ControllerConfig;
use crate::remote::RemoteClientConfig;

/// Default interval between change polls.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(5);

/// Addon controller configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Base URL of the addon resource API.
    pub store_url: String,

    /// Base remote endpoint; targets live under `/clusters/<target>`.
    pub remote_url: String,

    /// Bearer token for remote clients.
    pub remote_token: Option<String>,

    /// Skip TLS verification for remote clients.
    pub remote_insecure: bool,

    /// Base management endpoint used to start agents.
    pub management_url: String,

    /// Credential pair handed to each agent.
    pub credentials: AgentCredentials,

    /// Number of reconcile workers.
    pub workers: usize,

    /// Interval between full resyncs.
    pub resync_interval: Duration,

    /// Interval between change polls of the addon store.
    pub poll_interval: Duration,

    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration from an arbitrary key lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let store_url =
            lookup("ADDON_STORE_URL").unwrap_or_else(|| "http://127.0.0.1:8080".to_string());

        let remote_url =
            lookup("ADDON_REMOTE_URL").unwrap_or_else(|| "https://127.0.0.1:6443".to_string());

        let remote_token = lookup("ADDON_REMOTE_TOKEN").filter(|t| !t.is_empty());

        let remote_insecure = lookup("ADDON_REMOTE_INSECURE")
            .map(|v| v == "1" || v.to_lowercase() == "true")
            .unwrap_or(false);

        let management_url = lookup("ADDON_MANAGEMENT_URL")
            .unwrap_or_else(|| "https://127.0.0.1:6443".to_string());

        let ca_file = lookup("ADDON_CA_FILE").context("ADDON_CA_FILE is required")?;
        let key_file = lookup("ADDON_KEY_FILE").context("ADDON_KEY_FILE is required")?;
        let credentials = AgentCredentials {
            ca: std::fs::read(&ca_file).with_context(|| format!("reading CA file {ca_file}"))?,
            key: std::fs::read(&key_file)
                .with_context(|| format!("reading key file {key_file}"))?,
        };

        let workers = match lookup("ADDON_WORKERS") {
            Some(v) => v
                .parse()
                .with_context(|| format!("invalid ADDON_WORKERS: {v}"))?,
            None => syncer_reconcile::DEFAULT_WORKERS,
        };
        if workers == 0 {
            bail!("ADDON_WORKERS must be at least 1");
        }

        let resync_interval = match lookup("ADDON_RESYNC_INTERVAL") {
            Some(v) => Duration::from_secs(
                v.parse()
                    .with_context(|| format!("invalid ADDON_RESYNC_INTERVAL: {v}"))?,
            ),
            None => syncer_reconcile::DEFAULT_RESYNC_INTERVAL,
        };
        if resync_interval.is_zero() {
            bail!("ADDON_RESYNC_INTERVAL must be at least 1 second");
        }

        let poll_interval = match lookup("ADDON_POLL_INTERVAL") {
            Some(v) => Duration::from_secs(
                v.parse()
                    .with_context(|| format!("invalid ADDON_POLL_INTERVAL: {v}"))?,
            ),
            None => DEFAULT_POLL_INTERVAL,
        };
        if poll_interval.is_zero() {
            bail!("ADDON_POLL_INTERVAL must be at least 1 second");
        }

        let log_level = lookup("ADDON_LOG_LEVEL").unwrap_or_else(|| "info".to_string());

        Ok(Self {
            store_url,
            remote_url,
            remote_token,
            remote_insecure,
            management_url,
            credentials,
            workers,
            resync_interval,
            poll_interval,
            log_level,
        })
    }

    pub fn remote_client(&self) -> RemoteClientConfig {
        RemoteClientConfig {
            bearer_token: self.remote_token.clone(),
            insecure_skip_tls_verify: self.remote_insecure,
            ..Default::default()
        }
    }

    pub fn agent(&self) -> SyncerAgentConfig {
        SyncerAgentConfig {
            management_url: self.management_url.clone(),
            remote_url: self.remote_url.clone(),
            credentials: self.credentials.clone(),
            heartbeat_interval: Duration::from_secs(30),
        }
    }

    pub fn controller(&self) -> ControllerConfig {
        ControllerConfig {
            workers: self.workers,
            resync_interval: self.resync_interval,
            ..Default::default()
        }
    }
}
