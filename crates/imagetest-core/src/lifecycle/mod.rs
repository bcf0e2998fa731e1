//! Harness lifecycle controller: Create, Read, Update and Delete for Docker
//! harnesses.
//!
//! Per identifier the controller moves a harness through
//!
//! ```text
//! Uninitialized -> Skipped
//!               -> Creating -> Ready -> (Reading | Updating)* -> Deleting -> Destroyed
//! ```
//!
//! Create and Update share one path: validate and build the launch plan,
//! create the `<id>-config` volume, build the handle, publish it in the
//! registry, run setup. A failure or timeout part-way leaves whatever was
//! already provisioned; Delete reclaims it.
//!
//! Callers serialize operations for the same identifier. Operations on
//! different identifiers may run concurrently.

use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::Instrument;

use crate::engine::{ContainerEngine, managed_labels};
use crate::error::{HarnessError, Stage};
use crate::harness::HarnessRegistry;
use crate::merge::build_options;
use crate::options::{ContainerOption, LaunchPlan};
use crate::skip::{NeverSkip, SkipPolicy};
use crate::spec::{HarnessSpec, ProviderDefaults};

/// Timeout applied when a harness does not set one for an operation.
pub const DEFAULT_OPERATION_TIMEOUT: Duration = Duration::from_secs(5 * 60);

/// What the controller hands back for persistence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HarnessState {
    #[serde(flatten)]
    pub spec: HarnessSpec,
    /// `true` when the skip policy chose not to provision this harness.
    #[serde(default)]
    pub skipped: bool,
}

impl HarnessState {
    pub fn id(&self) -> &str {
        &self.spec.id
    }
}

/// Drives harness lifecycles against a [`ContainerEngine`].
pub struct HarnessController {
    engine: Arc<dyn ContainerEngine>,
    registry: Arc<HarnessRegistry>,
    defaults: Option<ProviderDefaults>,
    skip: Arc<dyn SkipPolicy>,
    default_timeout: Duration,
}

impl HarnessController {
    /// A controller with its own empty registry, no provider defaults, no
    /// skipping, and [`DEFAULT_OPERATION_TIMEOUT`].
    pub fn new(engine: Arc<dyn ContainerEngine>) -> Self {
        Self {
            engine,
            registry: Arc::new(HarnessRegistry::new()),
            defaults: None,
            skip: Arc::new(NeverSkip),
            default_timeout: DEFAULT_OPERATION_TIMEOUT,
        }
    }

    /// Share an existing registry.
    pub fn with_registry(mut self, registry: Arc<HarnessRegistry>) -> Self {
        self.registry = registry;
        self
    }

    pub fn with_defaults(mut self, defaults: Option<ProviderDefaults>) -> Self {
        self.defaults = defaults;
        self
    }

    pub fn with_skip_policy(mut self, skip: Arc<dyn SkipPolicy>) -> Self {
        self.skip = skip;
        self
    }

    pub fn with_default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = timeout;
        self
    }

    pub fn registry(&self) -> &Arc<HarnessRegistry> {
        &self.registry
    }

    /// The full option list for `spec`, config volume included.
    ///
    /// Pure: no engine calls.
    pub fn options(&self, spec: &HarnessSpec) -> Result<Vec<ContainerOption>, HarnessError> {
        let mut opts = build_options(self.defaults.as_ref(), spec)
            .map_err(|e| HarnessError::validation(&spec.id, e))?;
        opts.push(ContainerOption::ConfigVolume(spec.config_volume_name()));
        Ok(opts)
    }

    /// The launch plan `spec` resolves to. Pure: no engine calls.
    pub fn plan(&self, spec: &HarnessSpec) -> Result<LaunchPlan, HarnessError> {
        let opts = self.options(spec)?;
        LaunchPlan::from_options(&opts).map_err(|e| HarnessError::validation(&spec.id, e))
    }

    /// Provision a harness, or record it as skipped.
    pub async fn create(&self, spec: HarnessSpec) -> Result<HarnessState, HarnessError> {
        let span = harness_span("create", &spec);
        let limit = spec.timeouts.create.unwrap_or(self.default_timeout);
        self.provision(spec, limit).instrument(span).await
    }

    /// Re-apply `spec` to an existing harness.
    ///
    /// Runs the same path as [`Self::create`]; an unchanged spec re-submits
    /// an identical plan.
    pub async fn update(&self, spec: HarnessSpec) -> Result<HarnessState, HarnessError> {
        let span = harness_span("update", &spec);
        let limit = spec.timeouts.update.unwrap_or(self.default_timeout);
        self.provision(spec, limit).instrument(span).await
    }

    /// Reconcile persisted state with the engine.
    ///
    /// Returns `None` when the harness no longer exists. Skipped states are
    /// returned unchanged.
    pub async fn read(&self, state: HarnessState) -> Result<Option<HarnessState>, HarnessError> {
        if state.skipped {
            return Ok(Some(state));
        }

        let span = harness_span("read", &state.spec);
        let id = state.spec.id.clone();
        let volume = state.spec.config_volume_name();
        let progress = Progress::new(Stage::Read);

        let exists = with_timeout(&id, &progress, self.default_timeout, async {
            self.engine
                .volume_exists(&volume)
                .await
                .map_err(|e| HarnessError::dependency(&id, Stage::Read, e))
        })
        .instrument(span)
        .await?;

        if exists {
            Ok(Some(state))
        } else {
            tracing::info!(harness_id = %id, volume = %volume, "config volume gone, harness no longer exists");
            Ok(None)
        }
    }

    /// Tear down the harness and release its config volume.
    ///
    /// Succeeds when nothing is left to remove.
    pub async fn delete(&self, state: &HarnessState) -> Result<(), HarnessError> {
        if state.skipped {
            tracing::debug!(harness_id = %state.spec.id, "harness was skipped, nothing to delete");
            return Ok(());
        }

        let span = harness_span("delete", &state.spec);
        let limit = state.spec.timeouts.delete.unwrap_or(self.default_timeout);
        let progress = Progress::new(Stage::Teardown);
        with_timeout(&state.spec.id, &progress, limit, self.destroy(&state.spec, &progress))
            .instrument(span)
            .await
    }

    async fn provision(&self, spec: HarnessSpec, limit: Duration) -> Result<HarnessState, HarnessError> {
        let skipped = self
            .skip
            .should_skip(&spec)
            .map_err(|e| HarnessError::dependency(&spec.id, Stage::Skip, e))?;
        if skipped {
            tracing::info!(harness_id = %spec.id, "skipping harness");
            return Ok(HarnessState {
                spec,
                skipped: true,
            });
        }

        let opts = self.options(&spec)?;
        for (index, opt) in opts.iter().enumerate() {
            tracing::debug!(harness_id = %spec.id, index, option = %opt, "container option");
        }
        let plan =
            LaunchPlan::from_options(&opts).map_err(|e| HarnessError::validation(&spec.id, e))?;

        let progress = Progress::new(Stage::ConfigVolume);
        with_timeout(&spec.id, &progress, limit, self.apply(&spec, plan, &progress)).await?;

        tracing::info!(harness_id = %spec.id, "harness ready");
        Ok(HarnessState {
            spec,
            skipped: false,
        })
    }

    async fn apply(
        &self,
        spec: &HarnessSpec,
        plan: LaunchPlan,
        progress: &Progress,
    ) -> Result<(), HarnessError> {
        let id = spec.id.as_str();

        progress.enter(Stage::ConfigVolume);
        let volume = self
            .engine
            .create_volume(&spec.config_volume_name(), &managed_labels(id))
            .await
            .map_err(|e| HarnessError::dependency(id, Stage::ConfigVolume, e))?;
        tracing::info!(harness_id = %id, volume = %volume, "config volume ready");

        progress.enter(Stage::CreateContainer);
        let handle = self
            .engine
            .create_container(id, plan)
            .await
            .map_err(|e| HarnessError::dependency(id, Stage::CreateContainer, e))?;
        if self.registry.set(id, Arc::clone(&handle)).is_some() {
            tracing::debug!(harness_id = %id, "replaced stale harness handle");
        }

        progress.enter(Stage::Setup);
        handle
            .setup()
            .await
            .map_err(|e| HarnessError::dependency(id, Stage::Setup, e))?;

        Ok(())
    }

    async fn destroy(&self, spec: &HarnessSpec, progress: &Progress) -> Result<(), HarnessError> {
        let id = spec.id.as_str();

        progress.enter(Stage::Teardown);
        match self.registry.get(id) {
            Some(handle) => handle.teardown().await,
            None => self.engine.remove_container(id).await,
        }
        .map_err(|e| HarnessError::dependency(id, Stage::Teardown, e))?;
        self.registry.remove(id);

        progress.enter(Stage::ReleaseVolume);
        let volume = spec.config_volume_name();
        self.engine
            .remove_volume(&volume)
            .await
            .map_err(|e| HarnessError::dependency(id, Stage::ReleaseVolume, e))?;

        tracing::info!(harness_id = %id, volume = %volume, "harness deleted");
        Ok(())
    }
}

impl std::fmt::Debug for HarnessController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HarnessController")
            .field("registry", &self.registry)
            .field("defaults", &self.defaults)
            .field("default_timeout", &self.default_timeout)
            .finish_non_exhaustive()
    }
}

fn harness_span(operation: &'static str, spec: &HarnessSpec) -> tracing::Span {
    tracing::info_span!(
        "harness",
        operation,
        harness_id = %spec.id,
        harness_name = %spec.name,
        inventory = %spec.inventory.seed,
    )
}

/// The stage an operation is currently in, read back on timeout.
struct Progress(Mutex<Stage>);

impl Progress {
    fn new(stage: Stage) -> Self {
        Self(Mutex::new(stage))
    }

    fn enter(&self, stage: Stage) {
        *self.0.lock().unwrap_or_else(PoisonError::into_inner) = stage;
    }

    fn current(&self) -> Stage {
        *self.0.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Run `fut` under `limit`. On expiry the future is dropped and the stage it
/// was in is reported.
async fn with_timeout<T>(
    id: &str,
    progress: &Progress,
    limit: Duration,
    fut: impl Future<Output = Result<T, HarnessError>>,
) -> Result<T, HarnessError> {
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result,
        Err(_elapsed) => {
            let stage = progress.current();
            tracing::warn!(harness_id = %id, %stage, after = ?limit, "harness operation timed out");
            Err(HarnessError::Timeout {
                id: id.to_string(),
                stage,
                after: limit,
            })
        }
    }
}
