//! Shared test utilities for imagetest integration tests.
//!
//! Provides [`FakeEngine`], an in-memory [`ContainerEngine`] that records
//! every call, tracks which volumes and containers exist, and can be told
//! to fail or stall at a given point.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use anyhow::{Result, bail};
use async_trait::async_trait;

use imagetest_core::engine::ContainerEngine;
use imagetest_core::harness::HarnessHandle;
use imagetest_core::options::LaunchPlan;

/// One recorded engine or handle call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineCall {
    CreateVolume {
        name: String,
        labels: BTreeMap<String, String>,
    },
    VolumeExists(String),
    RemoveVolume(String),
    CreateContainer {
        id: String,
        plan: LaunchPlan,
    },
    RemoveContainer(String),
    Setup(String),
    Teardown(String),
}

/// Where a failure or delay can be injected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailPoint {
    CreateVolume,
    VolumeExists,
    RemoveVolume,
    CreateContainer,
    RemoveContainer,
    Setup,
    Teardown,
}

#[derive(Default)]
struct EngineState {
    calls: Vec<EngineCall>,
    volumes: BTreeSet<String>,
    /// Containers by harness id; `true` once setup has run.
    containers: BTreeMap<String, bool>,
    failures: HashMap<FailPoint, String>,
    delays: HashMap<FailPoint, Duration>,
}

/// In-memory container engine.
///
/// Clones share state, so a test can keep one clone for assertions and hand
/// another to the controller.
#[derive(Clone, Default)]
pub struct FakeEngine {
    state: Arc<Mutex<EngineState>>,
}

impl FakeEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every call at `point` fail with `message`.
    pub fn fail_at(&self, point: FailPoint, message: impl Into<String>) {
        self.lock().failures.insert(point, message.into());
    }

    /// Stop failing at `point`.
    pub fn heal(&self, point: FailPoint) {
        self.lock().failures.remove(&point);
    }

    /// Sleep for `delay` before every call at `point`.
    pub fn delay_at(&self, point: FailPoint, delay: Duration) {
        self.lock().delays.insert(point, delay);
    }

    pub fn clear_delay(&self, point: FailPoint) {
        self.lock().delays.remove(&point);
    }

    /// All calls so far, in order.
    pub fn calls(&self) -> Vec<EngineCall> {
        self.lock().calls.clone()
    }

    /// Plans passed to `create_container`, in order.
    pub fn created_plans(&self) -> Vec<(String, LaunchPlan)> {
        self.lock()
            .calls
            .iter()
            .filter_map(|call| match call {
                EngineCall::CreateContainer { id, plan } => Some((id.clone(), plan.clone())),
                _ => None,
            })
            .collect()
    }

    pub fn volumes(&self) -> BTreeSet<String> {
        self.lock().volumes.clone()
    }

    pub fn has_volume(&self, name: &str) -> bool {
        self.lock().volumes.contains(name)
    }

    /// Whether a container for `id` exists and has been set up.
    pub fn is_running(&self, id: &str) -> bool {
        self.lock().containers.get(id).copied().unwrap_or(false)
    }

    pub fn has_container(&self, id: &str) -> bool {
        self.lock().containers.contains_key(id)
    }

    /// Forget recorded calls, keeping volumes and containers.
    pub fn reset_calls(&self) {
        self.lock().calls.clear();
    }

    fn lock(&self) -> MutexGuard<'_, EngineState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Record `call`, then apply any configured delay and failure for `point`.
    async fn enter(&self, point: FailPoint, call: EngineCall) -> Result<()> {
        let delay = {
            let mut state = self.lock();
            state.calls.push(call);
            state.delays.get(&point).copied()
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(message) = self.lock().failures.get(&point).cloned() {
            bail!("{message}");
        }
        Ok(())
    }
}

#[async_trait]
impl ContainerEngine for FakeEngine {
    async fn create_volume(&self, name: &str, labels: &BTreeMap<String, String>) -> Result<String> {
        self.enter(
            FailPoint::CreateVolume,
            EngineCall::CreateVolume {
                name: name.to_string(),
                labels: labels.clone(),
            },
        )
        .await?;
        self.lock().volumes.insert(name.to_string());
        Ok(name.to_string())
    }

    async fn volume_exists(&self, name: &str) -> Result<bool> {
        self.enter(FailPoint::VolumeExists, EngineCall::VolumeExists(name.to_string()))
            .await?;
        Ok(self.has_volume(name))
    }

    async fn remove_volume(&self, name: &str) -> Result<()> {
        self.enter(FailPoint::RemoveVolume, EngineCall::RemoveVolume(name.to_string()))
            .await?;
        self.lock().volumes.remove(name);
        Ok(())
    }

    async fn create_container(&self, id: &str, plan: LaunchPlan) -> Result<Arc<dyn HarnessHandle>> {
        self.enter(
            FailPoint::CreateContainer,
            EngineCall::CreateContainer {
                id: id.to_string(),
                plan,
            },
        )
        .await?;
        self.lock().containers.entry(id.to_string()).or_insert(false);
        Ok(Arc::new(FakeHandle {
            id: id.to_string(),
            engine: self.clone(),
        }))
    }

    async fn remove_container(&self, id: &str) -> Result<()> {
        self.enter(FailPoint::RemoveContainer, EngineCall::RemoveContainer(id.to_string()))
            .await?;
        self.lock().containers.remove(id);
        Ok(())
    }
}

/// Handle returned by [`FakeEngine::create_container`].
pub struct FakeHandle {
    id: String,
    engine: FakeEngine,
}

#[async_trait]
impl HarnessHandle for FakeHandle {
    fn id(&self) -> &str {
        &self.id
    }

    async fn setup(&self) -> Result<()> {
        self.engine
            .enter(FailPoint::Setup, EngineCall::Setup(self.id.clone()))
            .await?;
        self.engine.lock().containers.insert(self.id.clone(), true);
        Ok(())
    }

    async fn teardown(&self) -> Result<()> {
        self.engine
            .enter(FailPoint::Teardown, EngineCall::Teardown(self.id.clone()))
            .await?;
        self.engine.lock().containers.remove(&self.id);
        Ok(())
    }
}
