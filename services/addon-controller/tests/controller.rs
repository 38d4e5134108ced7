//! Integration tests for the controller loop.
//!
//! These run the full queue + worker pool against an in-memory store, driven
//! by its change notifications, by polling, or by resync alone.

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{eventually, Harness};
use syncer_addon_controller::resource::CLEANUP_FINALIZER;
use syncer_addon_controller::store::{spawn_change_poller, ResourceStore};
use syncer_addon_controller::{AddonController, ControllerConfig};
use syncer_reconcile::BackoffPolicy;
use tokio::sync::watch;

const WAIT: Duration = Duration::from_secs(5);

fn test_config() -> ControllerConfig {
    ControllerConfig {
        workers: 2,
        resync_interval: Duration::from_secs(60),
        backoff: BackoffPolicy {
            base: Duration::from_millis(10),
            max: Duration::from_millis(100),
            jitter: 0.0,
        },
        retry_window: Duration::from_secs(60),
        shutdown_timeout: Duration::from_secs(2),
    }
}

fn controller(h: &Harness) -> Arc<AddonController> {
    Arc::new(AddonController::new(
        Arc::clone(&h.reconciler),
        Arc::clone(&h.store) as Arc<dyn ResourceStore>,
        test_config(),
    ))
}

#[tokio::test]
async fn test_enqueue_filters_by_prefix() {
    let h = Harness::new();
    let controller = controller(&h);

    assert!(controller.enqueue_name("syncer-ws1"));
    assert!(controller.enqueue_name("syncer-ws1"));
    assert!(!controller.enqueue_name("other-ws2"));
    assert!(!controller.enqueue_name("syncer-"));

    assert_eq!(controller.queue().len(), 1);
}

#[tokio::test]
async fn test_resync_enqueues_matching_resources() {
    let h = Harness::new();
    h.create("ws1").await;
    h.create("ws2").await;
    h.store
        .inner
        .create(syncer_addon_controller::AddonResource::new("unrelated"))
        .await
        .unwrap();

    let controller = controller(&h);
    assert_eq!(controller.resync().await.unwrap(), 2);
    assert_eq!(controller.queue().len(), 2);
}

#[tokio::test]
async fn test_process_next_requeues_failures() {
    let h = Harness::new();
    h.create_finalized("ws1").await;
    h.remote.fail_object("deployments.apps", 1);

    let controller = controller(&h);
    controller.enqueue_name("syncer-ws1");

    assert!(controller.process_next().await);
    assert!(h.registry.is_empty());

    // Requeued after backoff; the retry succeeds.
    assert!(
        eventually(WAIT, || async { controller.queue().len() == 1 }).await,
        "failed key was not requeued"
    );
    assert!(controller.process_next().await);
    assert!(h.registry.is_running("ws1"));
}

#[tokio::test]
async fn test_lifecycle_driven_by_notifications() {
    let h = Harness::new();
    let controller = controller(&h);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let forwarder =
        controller.spawn_notification_forwarder(h.store.inner.subscribe(), shutdown_rx.clone());
    let run = tokio::spawn(Arc::clone(&controller).run(shutdown_rx));

    // Create: finalizer pass, then provisioning + agent pass.
    h.create("ws1").await;
    assert!(
        eventually(WAIT, || async { h.registry.is_running("ws1") }).await,
        "agent never started"
    );
    assert_eq!(h.launcher.launches(), 1);

    // Delete: agent cancelled, finalizer released, resource gone.
    h.delete("ws1").await;
    assert!(
        eventually(WAIT, || async { !h.store.inner.contains("syncer-ws1").await }).await,
        "resource never finalized"
    );
    assert!(h.registry.is_empty());
    assert_eq!(h.launcher.cancelled(), 1);

    shutdown_tx.send(true).unwrap();
    run.await.unwrap();
    forwarder.await.unwrap();
}

#[tokio::test]
async fn test_startup_resync_rebuilds_registry() {
    let h = Harness::new();
    h.create_finalized("ws1").await;
    h.create_finalized("ws2").await;

    let controller = controller(&h);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let run = tokio::spawn(Arc::clone(&controller).run(shutdown_rx));

    assert!(
        eventually(WAIT, || async { h.registry.running_targets() == ["ws1", "ws2"] }).await,
        "registry not rebuilt"
    );

    shutdown_tx.send(true).unwrap();
    run.await.unwrap();
}

#[tokio::test]
async fn test_failed_pass_retried_until_success() {
    let h = Harness::new();
    h.create_finalized("ws1").await;
    h.remote.fail_object("syncer-ws1", 3);

    let controller = controller(&h);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let run = tokio::spawn(Arc::clone(&controller).run(shutdown_rx));

    assert!(
        eventually(WAIT, || async { h.registry.is_running("ws1") }).await,
        "agent never started after retries"
    );
    assert_eq!(h.launcher.launches(), 1);

    shutdown_tx.send(true).unwrap();
    run.await.unwrap();
}

#[tokio::test]
async fn test_shutdown_cancels_all_agents() {
    let h = Harness::new();
    h.create_finalized("ws1").await;
    h.create_finalized("ws2").await;

    let controller = controller(&h);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let run = tokio::spawn(Arc::clone(&controller).run(shutdown_rx));

    assert!(eventually(WAIT, || async { h.registry.running_targets().len() == 2 }).await);

    shutdown_tx.send(true).unwrap();
    run.await.unwrap();

    assert!(controller.reconciler().registry().is_empty());
    assert_eq!(h.launcher.cancelled(), 2);
    assert!(controller.queue().is_shutting_down());
}

#[tokio::test]
async fn test_agent_starts_after_finalizer_without_notifications() {
    let h = Harness::new();
    h.create("ws1").await;

    // No forwarder and a resync far away: only the startup resync fires.
    let controller = controller(&h);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let run = tokio::spawn(Arc::clone(&controller).run(shutdown_rx));

    assert!(
        eventually(Duration::from_secs(2), || async { h.registry.is_running("ws1") }).await,
        "agent did not start after the finalizer pass"
    );
    let updates = h.store.updates();
    assert_eq!(updates.len(), 1);
    assert_eq!(updates[0].finalizers, [CLEANUP_FINALIZER]);

    shutdown_tx.send(true).unwrap();
    run.await.unwrap();
}

#[tokio::test]
async fn test_polled_changes_drive_deletion() {
    let h = Harness::new();
    let controller = controller(&h);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let changes = spawn_change_poller(
        Arc::clone(&h.store) as Arc<dyn ResourceStore>,
        Duration::from_millis(20),
        shutdown_rx.clone(),
    );
    let forwarder = controller.spawn_notification_forwarder(changes, shutdown_rx.clone());
    let run = tokio::spawn(Arc::clone(&controller).run(shutdown_rx));

    h.create("ws1").await;
    assert!(
        eventually(WAIT, || async { h.registry.is_running("ws1") }).await,
        "created resource not picked up by polling"
    );

    h.delete("ws1").await;
    assert!(
        eventually(WAIT, || async { !h.store.inner.contains("syncer-ws1").await }).await,
        "deleted resource not picked up by polling"
    );
    assert!(h.registry.is_empty());
    assert_eq!(h.launcher.cancelled(), 1);

    shutdown_tx.send(true).unwrap();
    run.await.unwrap();
    forwarder.await.unwrap();
}
