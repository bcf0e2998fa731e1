//! Error taxonomy for harness configuration and lifecycle operations.
//!
//! - [`ValidationError`]: malformed input, surfaced before any engine call.
//! - [`HarnessError::Dependency`]: the container engine (or credential
//!   lookup during setup) rejected a request.
//! - [`HarnessError::Timeout`]: the engine did not answer before the
//!   operation's deadline.

use std::fmt;
use std::time::Duration;

use thiserror::Error;

use crate::reference::ReferenceError;
use crate::resources::ResourceParseError;

/// Malformed harness input.
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("harness {0} must not be empty")]
    MissingField(&'static str),

    #[error("invalid image reference {value:?}: {source}")]
    InvalidReference {
        value: String,
        #[source]
        source: ReferenceError,
    },

    #[error("failed to parse resources: {0}")]
    Resources(#[from] ResourceParseError),

    #[error("invalid mount {field} {value:?}: {reason}")]
    InvalidMount {
        field: &'static str,
        value: String,
        reason: String,
    },

    #[error("invalid volume mount for volume {volume:?}: {reason}")]
    InvalidVolume { volume: String, reason: String },

    #[error("invalid {field} timeout {value:?}: {reason}")]
    InvalidTimeout {
        field: &'static str,
        value: String,
        reason: String,
    },

    #[error("no image was configured for the harness")]
    MissingImage,

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
}

/// The lifecycle step an error originated from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Skip,
    Validate,
    ConfigVolume,
    CreateContainer,
    Setup,
    Read,
    Teardown,
    ReleaseVolume,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Skip => "skip evaluation",
            Self::Validate => "validation",
            Self::ConfigVolume => "config volume creation",
            Self::CreateContainer => "container creation",
            Self::Setup => "harness setup",
            Self::Read => "state reconciliation",
            Self::Teardown => "harness teardown",
            Self::ReleaseVolume => "config volume release",
        };
        f.write_str(s)
    }
}

/// An error from a lifecycle operation on one harness.
#[derive(Debug, Error)]
pub enum HarnessError {
    #[error("harness {id}: invalid resource input: {source}")]
    Validation {
        id: String,
        #[source]
        source: ValidationError,
    },

    #[error("harness {id}: {stage} failed: {source:#}")]
    Dependency {
        id: String,
        stage: Stage,
        #[source]
        source: anyhow::Error,
    },

    #[error("harness {id}: {stage} timed out after {after:?}")]
    Timeout {
        id: String,
        stage: Stage,
        after: Duration,
    },
}

impl HarnessError {
    pub fn validation(id: impl Into<String>, source: ValidationError) -> Self {
        Self::Validation {
            id: id.into(),
            source,
        }
    }

    pub fn dependency(id: impl Into<String>, stage: Stage, source: anyhow::Error) -> Self {
        Self::Dependency {
            id: id.into(),
            stage,
            source,
        }
    }

    /// The harness identifier the error refers to.
    pub fn id(&self) -> &str {
        match self {
            Self::Validation { id, .. } | Self::Dependency { id, .. } | Self::Timeout { id, .. } => {
                id
            }
        }
    }

    /// The failing stage, when the error came from an engine interaction.
    pub fn stage(&self) -> Stage {
        match self {
            Self::Validation { .. } => Stage::Validate,
            Self::Dependency { stage, .. } | Self::Timeout { stage, .. } => *stage,
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }
}
