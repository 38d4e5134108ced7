//! Syncer addon controller
//!
//! Runs one syncer agent per `syncer-<target>` addon resource:
//!
//! - **Controller**: resyncs addon resources into a work queue drained by workers
//! - **Reconciler**: finalizer protocol, remote provisioning, agent lifecycle
//! - **Registry**: in-memory map of running agents, rebuilt by the startup resync

use std::sync::Arc;

use anyhow::Result;
use syncer_addon_controller::{
    agent::SyncerAgentLauncher,
    config::Config,
    provision::Provisioner,
    remote::HttpClientFactory,
    store::{spawn_change_poller, HttpResourceStore, ResourceStore},
    template::EmbeddedTemplates,
    AddonController, AddonReconciler, AgentRegistry,
};
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration
    let config = Config::from_env()?;

    // Initialize tracing (prefer RUST_LOG, fallback to ADDON_LOG_LEVEL)
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| config.log_level.clone().into()))
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    info!("Starting syncer addon controller");
    info!(
        store_url = %config.store_url,
        remote_url = %config.remote_url,
        management_url = %config.management_url,
        workers = config.workers,
        poll_interval_secs = config.poll_interval.as_secs(),
        "Configuration loaded"
    );

    let store: Arc<dyn ResourceStore> = Arc::new(HttpResourceStore::new(&config.store_url)?);

    let provisioner = Provisioner::new(
        config.remote_url.clone(),
        Arc::new(HttpClientFactory::new(config.remote_client())),
        Arc::new(EmbeddedTemplates::new()),
    );

    let reconciler = Arc::new(AddonReconciler::new(
        Arc::clone(&store),
        Arc::new(AgentRegistry::new()),
        provisioner,
        Arc::new(SyncerAgentLauncher::new(config.agent())),
    ));

    let controller = Arc::new(AddonController::new(
        reconciler,
        Arc::clone(&store),
        config.controller(),
    ));

    // Create shutdown channel
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // The addon API has no watch; poll it for changes
    let changes = spawn_change_poller(store, config.poll_interval, shutdown_rx.clone());
    controller.spawn_notification_forwarder(changes, shutdown_rx.clone());

    let mut controller_handle = tokio::spawn({
        let controller = Arc::clone(&controller);
        async move { controller.run(shutdown_rx).await }
    });

    // Wait for shutdown signal
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Received shutdown signal");
        }
        result = &mut controller_handle => {
            if let Err(e) = result {
                error!(error = %e, "Controller task panicked");
            }
            return Ok(());
        }
    }

    // Signal shutdown; the controller stops its workers and agents
    let _ = shutdown_tx.send(true);

    let shutdown_timeout = std::time::Duration::from_secs(15);
    if tokio::time::timeout(shutdown_timeout, controller_handle)
        .await
        .is_err()
    {
        warn!("Controller did not shut down in time");
    }

    info!("Syncer addon controller shutdown complete");
    Ok(())
}
