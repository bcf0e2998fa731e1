//! Container engine abstraction.
//!
//! The lifecycle controller only talks to the engine through
//! [`ContainerEngine`]; [`DockerEngine`] is the implementation that drives
//! the `docker` CLI.

pub mod docker;

use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;

use crate::harness::HarnessHandle;
use crate::options::LaunchPlan;

pub use docker::{DockerEngine, DockerHarness};

/// Label marking every volume and container this tool manages.
pub const MANAGED_BY_LABEL: &str = "dev.imagetest.managed-by";
/// Value of [`MANAGED_BY_LABEL`].
pub const MANAGED_BY_VALUE: &str = "imagetest";
/// Label carrying the owning harness identifier.
pub const HARNESS_ID_LABEL: &str = "dev.imagetest.harness-id";

/// Labels attached to every engine object created for harness `id`.
pub fn managed_labels(id: &str) -> BTreeMap<String, String> {
    BTreeMap::from([
        (MANAGED_BY_LABEL.to_string(), MANAGED_BY_VALUE.to_string()),
        (HARNESS_ID_LABEL.to_string(), id.to_string()),
    ])
}

/// Operations the lifecycle controller needs from a container runtime.
///
/// Removal methods succeed when the target is already gone.
#[async_trait]
pub trait ContainerEngine: Send + Sync {
    /// Create a named volume and return its name as reported by the engine.
    async fn create_volume(&self, name: &str, labels: &BTreeMap<String, String>) -> Result<String>;

    async fn volume_exists(&self, name: &str) -> Result<bool>;

    async fn remove_volume(&self, name: &str) -> Result<()>;

    /// Build a handle for harness `id`. Nothing runs until
    /// [`HarnessHandle::setup`] is called.
    async fn create_container(&self, id: &str, plan: LaunchPlan) -> Result<Arc<dyn HarnessHandle>>;

    /// Remove whatever container is left for harness `id`.
    async fn remove_container(&self, id: &str) -> Result<()>;
}

const _: () = {
    fn _assert_object_safe(_: &dyn ContainerEngine) {}
};
