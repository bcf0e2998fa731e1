//! Host keychain lookup backed by the Docker client configuration.
//!
//! Lookup order for a registry:
//! 1. a matching `credHelpers` entry,
//! 2. the global `credsStore`,
//! 3. an inline `auths` entry.
//!
//! Helpers are invoked as `docker-credential-<helper> get` with the registry
//! on stdin, per the Docker credential helper protocol.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::process::Stdio;

use async_trait::async_trait;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use serde::Deserialize;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

use super::{AuthError, CredentialStore, StaticCredentials};

/// Subset of `~/.docker/config.json` used for credential lookup.
#[derive(Debug, Default, Deserialize)]
struct DockerConfigFile {
    #[serde(default)]
    auths: BTreeMap<String, AuthEntry>,
    #[serde(default, rename = "credsStore")]
    creds_store: Option<String>,
    #[serde(default, rename = "credHelpers")]
    cred_helpers: BTreeMap<String, String>,
}

#[derive(Debug, Default, Deserialize)]
struct AuthEntry {
    #[serde(default)]
    auth: Option<String>,
    #[serde(default)]
    username: Option<String>,
    #[serde(default)]
    password: Option<String>,
}

/// Output of `docker-credential-<helper> get`.
#[derive(Debug, Deserialize)]
struct HelperOutput {
    #[serde(rename = "Username")]
    username: String,
    #[serde(rename = "Secret")]
    secret: String,
}

/// [`CredentialStore`] reading the host's Docker client config.
#[derive(Debug, Clone)]
pub struct DockerKeychain {
    config_dir: PathBuf,
}

impl DockerKeychain {
    /// Use the config under `config_dir` (the directory holding `config.json`).
    pub fn new(config_dir: impl Into<PathBuf>) -> Self {
        Self {
            config_dir: config_dir.into(),
        }
    }

    /// Locate the config directory: `$DOCKER_CONFIG`, else `~/.docker`.
    pub fn from_env() -> Self {
        let dir = std::env::var_os("DOCKER_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|| {
                dirs::home_dir()
                    .unwrap_or_else(|| PathBuf::from("."))
                    .join(".docker")
            });
        Self::new(dir)
    }

    pub fn config_path(&self) -> PathBuf {
        self.config_dir.join("config.json")
    }

    async fn load(&self) -> Result<DockerConfigFile, AuthError> {
        let path = self.config_path();
        match tokio::fs::read_to_string(&path).await {
            Ok(contents) => Ok(serde_json::from_str(&contents)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(DockerConfigFile::default()),
            Err(source) => Err(AuthError::ReadConfig {
                path: path.display().to_string(),
                source,
            }),
        }
    }
}

#[async_trait]
impl CredentialStore for DockerKeychain {
    async fn lookup(&self, registry: &str) -> Result<StaticCredentials, AuthError> {
        let config = self.load().await?;
        let wanted = normalize_registry(registry);

        let helper = config
            .cred_helpers
            .iter()
            .find(|(key, _)| normalize_registry(key) == wanted)
            .map(|(_, helper)| helper.clone())
            .or_else(|| config.creds_store.clone());

        if let Some(helper) = helper {
            tracing::debug!(registry, helper = %helper, "resolving credentials via helper");
            return run_helper(&helper, registry).await;
        }

        let entry = config
            .auths
            .iter()
            .find(|(key, _)| normalize_registry(key) == wanted)
            .map(|(_, entry)| entry)
            .ok_or_else(|| AuthError::NotFound(registry.to_string()))?;

        entry_credentials(registry, entry)
    }
}

fn entry_credentials(registry: &str, entry: &AuthEntry) -> Result<StaticCredentials, AuthError> {
    if let Some(auth) = entry.auth.as_deref().filter(|a| !a.is_empty()) {
        let decoded = STANDARD
            .decode(auth)
            .ok()
            .and_then(|bytes| String::from_utf8(bytes).ok())
            .ok_or_else(|| AuthError::NotFound(registry.to_string()))?;
        let (username, password) = decoded
            .split_once(':')
            .ok_or_else(|| AuthError::NotFound(registry.to_string()))?;
        return Ok(StaticCredentials {
            username: username.to_string(),
            password: password.to_string(),
            auth: auth.to_string(),
        });
    }
    match (&entry.username, &entry.password) {
        (Some(username), Some(password)) => Ok(StaticCredentials {
            username: username.clone(),
            password: password.clone(),
            auth: String::new(),
        }),
        _ => Err(AuthError::NotFound(registry.to_string())),
    }
}

async fn run_helper(helper: &str, registry: &str) -> Result<StaticCredentials, AuthError> {
    let program = format!("docker-credential-{helper}");
    let helper_err = |message: String| AuthError::Helper {
        helper: helper.to_string(),
        registry: registry.to_string(),
        message,
    };

    let mut child = Command::new(&program)
        .arg("get")
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|e| helper_err(format!("failed to run {program}: {e}")))?;

    if let Some(mut stdin) = child.stdin.take() {
        stdin
            .write_all(registry.as_bytes())
            .await
            .map_err(|e| helper_err(e.to_string()))?;
    }

    let output = child
        .wait_with_output()
        .await
        .map_err(|e| helper_err(e.to_string()))?;

    if !output.status.success() {
        let stdout = String::from_utf8_lossy(&output.stdout);
        if stdout.contains("credentials not found") {
            return Err(AuthError::NotFound(registry.to_string()));
        }
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(helper_err(format!("{}{}", stdout.trim(), stderr.trim())));
    }

    let parsed: HelperOutput = serde_json::from_slice(&output.stdout)?;
    Ok(StaticCredentials {
        username: parsed.username,
        password: parsed.secret,
        auth: String::new(),
    })
}

/// Reduce a registry key (`https://index.docker.io/v1/`, `docker.io`, ...)
/// to a bare host for comparison.
fn normalize_registry(key: &str) -> String {
    let trimmed = key
        .strip_prefix("https://")
        .or_else(|| key.strip_prefix("http://"))
        .unwrap_or(key);
    let host = trimmed.split('/').next().unwrap_or(trimmed);
    match host {
        "docker.io" | "registry-1.docker.io" => crate::reference::DEFAULT_REGISTRY.to_string(),
        other => other.to_string(),
    }
}
