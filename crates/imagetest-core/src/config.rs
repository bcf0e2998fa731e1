//! Provider configuration file.
//!
//! ```toml
//! [harnesses.docker]
//! host_socket_path = "/var/run/docker.sock"
//! envs = { CI = "true" }
//!
//! [harnesses.docker.networks.default]
//! name = "bridge"
//!
//! [test_execution]
//! skip_all = false
//! exclude_by_label = { slow = "true" }
//!
//! [timeouts]
//! create = "10m"
//! ```
//!
//! Locating the file is left to the caller; this module only parses and
//! validates it.

use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::error::ValidationError;
use crate::skip::TestSelection;
use crate::spec::ProviderDefaults;

/// Top-level provider config file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderConfig {
    #[serde(default)]
    pub harnesses: HarnessesSection,
    #[serde(default)]
    pub test_execution: TestSelection,
    #[serde(default)]
    pub timeouts: TimeoutsSection,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HarnessesSection {
    /// Defaults applied to every Docker harness. Absent means "no defaults",
    /// which is not the same as an empty table.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub docker: Option<ProviderDefaults>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeoutsSection {
    /// Default operation timeout as a humantime string (`"5m"`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub create: Option<String>,
}

impl ProviderConfig {
    /// Parse and validate a config document.
    pub fn parse(contents: &str) -> Result<Self, ValidationError> {
        let config: Self = toml::from_str(contents)?;
        config.default_timeout()?;
        Ok(config)
    }

    /// Read and parse the config file at `path`.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file at {}", path.display()))?;
        Self::parse(&contents)
            .with_context(|| format!("failed to parse config file at {}", path.display()))
    }

    /// Provider defaults for Docker harnesses, if configured.
    pub fn docker_defaults(&self) -> Option<&ProviderDefaults> {
        self.harnesses.docker.as_ref()
    }

    /// The configured default operation timeout.
    pub fn default_timeout(&self) -> Result<Option<Duration>, ValidationError> {
        let Some(raw) = &self.timeouts.create else {
            return Ok(None);
        };
        let invalid = |reason: String| ValidationError::InvalidTimeout {
            field: "timeouts.create",
            value: raw.clone(),
            reason,
        };
        let parsed = humantime::parse_duration(raw).map_err(|e| invalid(e.to_string()))?;
        if parsed.is_zero() {
            return Err(invalid("must be greater than zero".into()));
        }
        Ok(Some(parsed))
    }
}
