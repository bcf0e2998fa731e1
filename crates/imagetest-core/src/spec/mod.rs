//! Typed harness definitions.
//!
//! [`HarnessSpec`] is the validated, per-harness input; [`ProviderDefaults`]
//! is the optional provider-wide configuration applied to every harness.
//! Raw file formats live in [`toml_format`] and are turned into these types
//! by [`parser::parse_harness_toml`].

pub mod parser;
pub mod toml_format;

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::resources::ResourceSpec;

pub use parser::parse_harness_toml;

/// Image used when a harness does not name one.
pub const DEFAULT_HARNESS_IMAGE: &str = "cgr.dev/chainguard/docker-cli:latest-dev";

/// Inventory the harness belongs to.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InventoryRef {
    pub seed: String,
}

/// A host path bind-mounted into the harness.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MountSpec {
    /// Relative or absolute host path.
    pub source: String,
    /// Absolute path inside the container.
    pub destination: String,
}

/// An existing network the harness is attached to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkSpec {
    pub name: String,
}

/// Credentials for one registry. All fields unset means "use the keychain".
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistryAuthSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    /// Pre-encoded `base64(username:password)`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth: Option<String>,
}

impl fmt::Debug for RegistryAuthSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegistryAuthSpec")
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("auth", &self.auth.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

/// Per-registry configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistrySpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth: Option<RegistryAuthSpec>,
}

/// The managed volume a [`VolumeMountSpec`] refers to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VolumeSource {
    pub id: String,
    pub name: String,
    pub inventory: InventoryRef,
}

/// A managed volume mounted into the harness.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VolumeMountSpec {
    pub source: VolumeSource,
    pub destination: String,
}

/// Per-operation deadlines. Unset entries fall back to the controller's
/// default timeout.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeoutPolicy {
    #[serde(default, with = "humantime_opt", skip_serializing_if = "Option::is_none")]
    pub create: Option<Duration>,
    #[serde(default, with = "humantime_opt", skip_serializing_if = "Option::is_none")]
    pub update: Option<Duration>,
    #[serde(default, with = "humantime_opt", skip_serializing_if = "Option::is_none")]
    pub delete: Option<Duration>,
}

/// A validated harness definition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HarnessSpec {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub inventory: InventoryRef,
    /// Labels evaluated by the skip policy.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
    /// Unparsed image reference; resolved when options are built.
    pub image: String,
    #[serde(default)]
    pub privileged: bool,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub envs: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub mounts: Vec<MountSpec>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub networks: BTreeMap<String, NetworkSpec>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub registries: BTreeMap<String, RegistrySpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resources: Option<ResourceSpec>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub volumes: Vec<VolumeMountSpec>,
    #[serde(default)]
    pub timeouts: TimeoutPolicy,
}

impl HarnessSpec {
    /// A minimal spec with the default image and no overrides.
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            inventory: InventoryRef::default(),
            labels: BTreeMap::new(),
            image: DEFAULT_HARNESS_IMAGE.to_string(),
            privileged: false,
            envs: BTreeMap::new(),
            mounts: Vec::new(),
            networks: BTreeMap::new(),
            registries: BTreeMap::new(),
            resources: None,
            volumes: Vec::new(),
            timeouts: TimeoutPolicy::default(),
        }
    }

    /// Name of the config volume backing this harness.
    pub fn config_volume_name(&self) -> String {
        config_volume_name(&self.id)
    }
}

/// Name of the config volume for a harness identifier: `<id>-config`.
///
/// Existing volumes are found by this name, so it must stay stable.
pub fn config_volume_name(id: &str) -> String {
    format!("{id}-config")
}

/// Provider-wide defaults for Docker harnesses.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderDefaults {
    /// Host Docker socket to expose inside every harness.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host_socket_path: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub mounts: Vec<MountSpec>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub networks: BTreeMap<String, NetworkSpec>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub registries: BTreeMap<String, RegistrySpec>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub envs: BTreeMap<String, String>,
}

/// `Option<Duration>` as a humantime string (`"5m"`, `"1h 30m"`).
mod humantime_opt {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Option<Duration>, s: S) -> Result<S::Ok, S::Error> {
        match value {
            Some(d) => s.serialize_str(&humantime::format_duration(*d).to_string()),
            None => s.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Duration>, D::Error> {
        Option::<String>::deserialize(d)?
            .map(|s| humantime::parse_duration(&s).map_err(serde::de::Error::custom))
            .transpose()
    }
}
