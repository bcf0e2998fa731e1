//! Registry authentication for harness containers.
//!
//! Each registry with an `auth` block resolves to a [`RegistryAuth`]:
//! - all of username, password, and auth unset: [`RegistryAuth::Keychain`],
//!   looked up from the host [`CredentialStore`] at setup time;
//! - anything set: [`RegistryAuth::Static`], passed through verbatim.
//!
//! No credentials are checked here. Bad static credentials surface as a
//! setup failure when the engine uses them.

pub mod keychain;

use std::collections::BTreeMap;
use std::fmt;

use async_trait::async_trait;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::spec::RegistryAuthSpec;

pub use keychain::DockerKeychain;

/// Errors from credential lookup. Raised during harness setup.
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("no credentials found for registry {0}")]
    NotFound(String),

    #[error("credential helper docker-credential-{helper} failed for {registry}: {message}")]
    Helper {
        helper: String,
        registry: String,
        message: String,
    },

    #[error("failed to read docker config at {path}: {source}")]
    ReadConfig {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse credentials: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Explicit credentials for one registry.
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StaticCredentials {
    pub username: String,
    pub password: String,
    /// Pre-encoded `base64(username:password)`; wins over the pair when set.
    pub auth: String,
}

impl StaticCredentials {
    /// The `auth` value for a Docker client `config.json` entry.
    pub fn encoded(&self) -> String {
        if self.auth.is_empty() {
            STANDARD.encode(format!("{}:{}", self.username, self.password))
        } else {
            self.auth.clone()
        }
    }
}

impl fmt::Debug for StaticCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StaticCredentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("auth", &"<redacted>")
            .finish()
    }
}

/// How a harness authenticates to one registry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RegistryAuth {
    /// Resolve from the host credential store at setup time.
    Keychain,
    /// Use the given credentials as-is.
    Static(StaticCredentials),
}

impl RegistryAuth {
    pub fn is_keychain(&self) -> bool {
        matches!(self, Self::Keychain)
    }
}

/// Decide between keychain and static auth for a declared auth block.
pub fn resolve_registry_auth(spec: &RegistryAuthSpec) -> RegistryAuth {
    if spec.username.is_none() && spec.password.is_none() && spec.auth.is_none() {
        return RegistryAuth::Keychain;
    }
    RegistryAuth::Static(StaticCredentials {
        username: spec.username.clone().unwrap_or_default(),
        password: spec.password.clone().unwrap_or_default(),
        auth: spec.auth.clone().unwrap_or_default(),
    })
}

/// Host-side credential lookup used for [`RegistryAuth::Keychain`].
#[async_trait]
pub trait CredentialStore: Send + Sync {
    async fn lookup(&self, registry: &str) -> Result<StaticCredentials, AuthError>;
}

/// Render a Docker client `config.json` with one `auths` entry per registry.
///
/// Keychain entries are resolved through `store`; any lookup failure aborts.
pub async fn render_docker_config(
    auths: &BTreeMap<String, RegistryAuth>,
    store: &dyn CredentialStore,
) -> Result<String, AuthError> {
    let mut entries = serde_json::Map::new();
    for (registry, auth) in auths {
        let creds = match auth {
            RegistryAuth::Keychain => store.lookup(registry).await?,
            RegistryAuth::Static(creds) => creds.clone(),
        };
        entries.insert(
            registry.clone(),
            serde_json::json!({ "auth": creds.encoded() }),
        );
    }
    let config = serde_json::json!({ "auths": entries });
    Ok(serde_json::to_string_pretty(&config)?)
}
