//! On-disk format of harness definition files.
//!
//! These types map directly to the TOML a user writes and are deserialized
//! with `serde` + the `toml` crate. Defaults and duration strings are
//! resolved by [`super::parser`].
//!
//! ```toml
//! id = "h1"
//! name = "docker-harness"
//! image = "cgr.dev/chainguard/docker-cli:latest-dev"
//!
//! [inventory]
//! seed = "abc123"
//!
//! [[mounts]]
//! source = "./testdata"
//! destination = "/data"
//!
//! [networks.build]
//! name = "build-net"
//!
//! [registries."cgr.dev".auth]
//! username = "bot"
//! password = "secret"
//!
//! [resources.memory]
//! request = "512Mi"
//! limit = "1Gi"
//!
//! [timeouts]
//! create = "10m"
//! ```

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::{InventoryRef, MountSpec, NetworkSpec, RegistrySpec, VolumeMountSpec};
use crate::resources::ResourceSpec;

/// Top-level structure of a harness definition file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HarnessToml {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub inventory: InventoryRef,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    /// Falls back to [`super::DEFAULT_HARNESS_IMAGE`].
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub privileged: Option<bool>,
    #[serde(default)]
    pub envs: BTreeMap<String, String>,
    #[serde(default)]
    pub mounts: Vec<MountSpec>,
    #[serde(default)]
    pub networks: BTreeMap<String, NetworkSpec>,
    #[serde(default)]
    pub registries: BTreeMap<String, RegistrySpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resources: Option<ResourceSpec>,
    #[serde(default)]
    pub volumes: Vec<VolumeMountSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeouts: Option<TimeoutsToml>,
}

/// `[timeouts]` table: humantime duration strings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeoutsToml {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub create: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub update: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delete: Option<String>,
}
