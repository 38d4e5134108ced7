//! Test doubles shared by the integration tests.

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use syncer_addon_controller::agent::{AgentError, AgentLauncher};
use syncer_addon_controller::provision::Provisioner;
use syncer_addon_controller::remote::{
    ApplyError, ApplyOutcome, ClientError, RemoteApplier, RemoteClientFactory,
};
use syncer_addon_controller::resource::{AddonResource, CLEANUP_FINALIZER};
use syncer_addon_controller::store::{InMemoryStore, ResourceStore, StoreError};
use syncer_addon_controller::template::EmbeddedTemplates;
use syncer_addon_controller::{AddonReconciler, AgentRegistry};
use tokio_util::sync::CancellationToken;

pub const REMOTE_URL: &str = "https://kcp.test:6443";

// =============================================================================
// Store
// =============================================================================

/// Snapshot of one successful update.
#[derive(Debug, Clone)]
pub struct UpdateRecord {
    pub name: String,
    pub finalizers: Vec<String>,
    pub deleting: bool,
    /// Agents whose token was already cancelled when the update happened.
    pub cancelled_agents: usize,
}

/// In-memory store that records updates and can inject failures.
pub struct RecordingStore {
    pub inner: InMemoryStore,
    updates: Mutex<Vec<UpdateRecord>>,
    failing_gets: AtomicUsize,
    launcher: Mutex<Option<Arc<FakeLauncher>>>,
}

impl RecordingStore {
    pub fn new() -> Self {
        Self {
            inner: InMemoryStore::new(),
            updates: Mutex::new(Vec::new()),
            failing_gets: AtomicUsize::new(0),
            launcher: Mutex::new(None),
        }
    }

    /// Observe the launcher's agents when recording updates.
    pub fn observe(&self, launcher: &Arc<FakeLauncher>) {
        *self.launcher.lock().unwrap() = Some(Arc::clone(launcher));
    }

    /// Fail the next `n` gets with a backend error.
    pub fn fail_gets(&self, n: usize) {
        self.failing_gets.store(n, Ordering::SeqCst);
    }

    pub fn updates(&self) -> Vec<UpdateRecord> {
        self.updates.lock().unwrap().clone()
    }
}

#[async_trait]
impl ResourceStore for RecordingStore {
    async fn get(&self, name: &str) -> Result<AddonResource, StoreError> {
        let remaining = self.failing_gets.load(Ordering::SeqCst);
        if remaining > 0 {
            self.failing_gets.store(remaining - 1, Ordering::SeqCst);
            return Err(StoreError::Backend("store unavailable".to_string()));
        }
        self.inner.get(name).await
    }

    async fn update(&self, resource: &AddonResource) -> Result<AddonResource, StoreError> {
        let updated = self.inner.update(resource).await?;
        let cancelled_agents = self
            .launcher
            .lock()
            .unwrap()
            .as_ref()
            .map(|launcher| launcher.cancelled())
            .unwrap_or(0);

        self.updates.lock().unwrap().push(UpdateRecord {
            name: resource.name.clone(),
            finalizers: resource.finalizers.clone(),
            deleting: resource.is_deleting(),
            cancelled_agents,
        });
        Ok(updated)
    }

    async fn list(&self) -> Result<Vec<AddonResource>, StoreError> {
        self.inner.list().await
    }
}

// =============================================================================
// Remote
// =============================================================================

/// One manifest handed to a fake applier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Applied {
    pub endpoint: String,
    pub kind: String,
    pub name: String,
}

#[derive(Default)]
struct RemoteState {
    applied: Vec<Applied>,
    /// (object name, failures left)
    fail_object: Option<(String, usize)>,
    fail_connect: bool,
}

/// Client factory whose appliers record instead of calling out.
#[derive(Clone, Default)]
pub struct FakeRemote {
    state: Arc<Mutex<RemoteState>>,
}

impl FakeRemote {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail applies of the object named `name`, `times` times.
    pub fn fail_object(&self, name: &str, times: usize) {
        self.state.lock().unwrap().fail_object = Some((name.to_string(), times));
    }

    pub fn fail_connect(&self) {
        self.state.lock().unwrap().fail_connect = true;
    }

    /// Every apply attempt, including failed ones.
    pub fn applied(&self) -> Vec<Applied> {
        self.state.lock().unwrap().applied.clone()
    }
}

impl RemoteClientFactory for FakeRemote {
    fn connect(&self, endpoint: &str) -> Result<Arc<dyn RemoteApplier>, ClientError> {
        if self.state.lock().unwrap().fail_connect {
            return Err(ClientError::InvalidEndpoint {
                endpoint: endpoint.to_string(),
                reason: "injected".to_string(),
            });
        }
        Ok(Arc::new(FakeApplier {
            endpoint: endpoint.to_string(),
            state: Arc::clone(&self.state),
        }))
    }
}

struct FakeApplier {
    endpoint: String,
    state: Arc<Mutex<RemoteState>>,
}

#[async_trait]
impl RemoteApplier for FakeApplier {
    async fn apply(&self, manifest: &[u8]) -> Result<ApplyOutcome, ApplyError> {
        let doc: serde_yaml::Value = serde_yaml::from_slice(manifest)?;
        let kind = doc["kind"].as_str().unwrap_or_default().to_string();
        let name = doc["metadata"]["name"].as_str().unwrap_or_default().to_string();

        let mut state = self.state.lock().unwrap();
        state.applied.push(Applied {
            endpoint: self.endpoint.clone(),
            kind: kind.clone(),
            name: name.clone(),
        });

        if let Some((fail_name, remaining)) = state.fail_object.as_mut() {
            if *fail_name == name && *remaining > 0 {
                *remaining -= 1;
                return Err(ApplyError::Status {
                    kind,
                    name,
                    status: 500,
                    body: "injected".to_string(),
                });
            }
        }
        Ok(ApplyOutcome::Updated)
    }
}

// =============================================================================
// Agents
// =============================================================================

/// Launcher that records launches and keeps the agents' tokens.
#[derive(Default)]
pub struct FakeLauncher {
    agents: Mutex<Vec<(String, CancellationToken)>>,
    launches: AtomicUsize,
    failures_left: AtomicUsize,
    delay: Mutex<Option<Duration>>,
}

impl FakeLauncher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the next `n` launches.
    pub fn fail_launches(&self, n: usize) {
        self.failures_left.store(n, Ordering::SeqCst);
    }

    /// Hold each launch for `delay` before returning.
    pub fn with_delay(self, delay: Duration) -> Self {
        *self.delay.lock().unwrap() = Some(delay);
        self
    }

    /// Launch attempts, including failed ones.
    pub fn launches(&self) -> usize {
        self.launches.load(Ordering::SeqCst)
    }

    /// Tokens of successfully launched agents.
    pub fn tokens(&self) -> Vec<(String, CancellationToken)> {
        self.agents.lock().unwrap().clone()
    }

    pub fn cancelled(&self) -> usize {
        self.agents
            .lock()
            .unwrap()
            .iter()
            .filter(|(_, token)| token.is_cancelled())
            .count()
    }
}

#[async_trait]
impl AgentLauncher for FakeLauncher {
    async fn launch(&self, target_id: &str, cancel: CancellationToken) -> Result<(), AgentError> {
        self.launches.fetch_add(1, Ordering::SeqCst);

        let delay = *self.delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let failures = self.failures_left.load(Ordering::SeqCst);
        if failures > 0 {
            self.failures_left.store(failures - 1, Ordering::SeqCst);
            return Err(AgentError::MissingCredential("key"));
        }

        self.agents
            .lock()
            .unwrap()
            .push((target_id.to_string(), cancel));
        Ok(())
    }
}

// =============================================================================
// Harness
// =============================================================================

pub struct Harness {
    pub store: Arc<RecordingStore>,
    pub remote: FakeRemote,
    pub launcher: Arc<FakeLauncher>,
    pub registry: Arc<AgentRegistry>,
    pub reconciler: Arc<AddonReconciler>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_launcher(FakeLauncher::new())
    }

    pub fn with_launcher(launcher: FakeLauncher) -> Self {
        let store = Arc::new(RecordingStore::new());
        let remote = FakeRemote::new();
        let launcher = Arc::new(launcher);
        let registry = Arc::new(AgentRegistry::new());
        store.observe(&launcher);

        let provisioner = Provisioner::new(
            REMOTE_URL,
            Arc::new(remote.clone()),
            Arc::new(EmbeddedTemplates::new()),
        );
        let reconciler = Arc::new(AddonReconciler::new(
            Arc::clone(&store) as Arc<dyn ResourceStore>,
            Arc::clone(&registry),
            provisioner,
            Arc::clone(&launcher) as Arc<dyn AgentLauncher>,
        ));

        Self {
            store,
            remote,
            launcher,
            registry,
            reconciler,
        }
    }

    /// Create `syncer-<target>` without any finalizer.
    pub async fn create(&self, target_id: &str) {
        self.store
            .inner
            .create(AddonResource::for_target(target_id))
            .await
            .unwrap();
    }

    /// Create `syncer-<target>` already carrying the cleanup finalizer.
    pub async fn create_finalized(&self, target_id: &str) {
        let mut resource = AddonResource::for_target(target_id);
        resource.add_finalizer(CLEANUP_FINALIZER);
        self.store.inner.create(resource).await.unwrap();
    }

    pub async fn delete(&self, target_id: &str) {
        self.store
            .inner
            .delete(&format!("syncer-{target_id}"))
            .await
            .unwrap();
    }
}

/// Poll `condition` until it holds or `timeout` elapses.
pub async fn eventually<F, Fut>(timeout: Duration, mut condition: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if condition().await {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
