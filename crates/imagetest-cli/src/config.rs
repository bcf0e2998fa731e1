//! Configuration file management for imagetest.
//!
//! Provides a TOML-based provider config at `~/.config/imagetest/config.toml`
//! and a resolution chain: CLI flag > env var > config file > default.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, bail};

use imagetest_core::config::ProviderConfig;
use imagetest_core::lifecycle::DEFAULT_OPERATION_TIMEOUT;
use imagetest_core::skip::TestSelection;
use imagetest_core::spec::ProviderDefaults;

/// Environment variable naming an explicit config file.
pub const CONFIG_ENV: &str = "IMAGETEST_CONFIG";

/// Environment variable naming an explicit state directory.
pub const STATE_DIR_ENV: &str = "IMAGETEST_STATE_DIR";

/// Starter config written by `imagetest init`.
pub const STARTER_CONFIG: &str = r#"# imagetest provider configuration.

# Defaults applied to every Docker harness.
[harnesses.docker]
host_socket_path = "/var/run/docker.sock"

# [harnesses.docker.envs]
# CI = "true"

# [[harnesses.docker.mounts]]
# source = "./testdata"
# destination = "/testdata"

# [harnesses.docker.networks.default]
# name = "bridge"

# Registries with an empty auth table use the host Docker keychain.
# [harnesses.docker.registries."cgr.dev".auth]

[test_execution]
skip_all = false
# include_by_label = { team = "infra" }
# exclude_by_label = { slow = "true" }

[timeouts]
create = "5m"
"#;

// -----------------------------------------------------------------------
// Paths
// -----------------------------------------------------------------------

/// Return the imagetest config directory.
///
/// Always uses XDG layout: `$XDG_CONFIG_HOME/imagetest` or
/// `~/.config/imagetest`.
pub fn config_dir() -> PathBuf {
    if let Ok(xdg) = std::env::var("XDG_CONFIG_HOME") {
        return PathBuf::from(xdg).join("imagetest");
    }
    home().join(".config").join("imagetest")
}

/// Return the path to the default config file.
pub fn config_path() -> PathBuf {
    config_dir().join("config.toml")
}

/// Return the directory holding per-harness state files.
///
/// `$XDG_STATE_HOME/imagetest/harnesses` or
/// `~/.local/state/imagetest/harnesses`.
pub fn default_state_dir() -> PathBuf {
    let base = match std::env::var("XDG_STATE_HOME") {
        Ok(xdg) => PathBuf::from(xdg),
        Err(_) => home().join(".local").join("state"),
    };
    base.join("imagetest").join("harnesses")
}

fn home() -> PathBuf {
    dirs::home_dir().unwrap_or_else(|| PathBuf::from("."))
}

// -----------------------------------------------------------------------
// Write
// -----------------------------------------------------------------------

/// Write the starter config to `path`, creating parent dirs as needed.
pub fn write_starter_config(path: &Path, force: bool) -> Result<()> {
    if path.exists() && !force {
        bail!(
            "config file already exists at {}\nUse --force to overwrite.",
            path.display()
        );
    }
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("failed to create config directory {}", dir.display()))?;
    }
    std::fs::write(path, STARTER_CONFIG)
        .with_context(|| format!("failed to write config file at {}", path.display()))?;
    Ok(())
}

// -----------------------------------------------------------------------
// Resolved config
// -----------------------------------------------------------------------

/// Fully resolved configuration, ready for use.
#[derive(Debug)]
pub struct ResolvedConfig {
    /// The file the provider config came from, if any.
    pub source: Option<PathBuf>,
    pub defaults: Option<ProviderDefaults>,
    pub selection: TestSelection,
    pub default_timeout: Duration,
    pub state_dir: PathBuf,
}

impl ResolvedConfig {
    /// Resolve configuration using the chain: CLI flag > env var > config file > default.
    ///
    /// - Config file: `cli_config` > `IMAGETEST_CONFIG` > `config_path()` if
    ///   it exists > none. An explicitly named file must exist.
    /// - Selection: config file `[test_execution]`, then
    ///   `IMAGETEST_SKIP_ALL` / `IMAGETEST_INCLUDE_BY_LABEL` /
    ///   `IMAGETEST_EXCLUDE_BY_LABEL` on top.
    /// - State dir: `cli_state_dir` > `IMAGETEST_STATE_DIR` > XDG state dir.
    pub fn resolve(cli_config: Option<&Path>, cli_state_dir: Option<&Path>) -> Result<Self> {
        let explicit = cli_config
            .map(Path::to_path_buf)
            .or_else(|| std::env::var_os(CONFIG_ENV).map(PathBuf::from));

        let (source, file) = match explicit {
            Some(path) => {
                let file = ProviderConfig::load(&path)?;
                (Some(path), file)
            }
            None => {
                let path = config_path();
                if path.exists() {
                    let file = ProviderConfig::load(&path)?;
                    (Some(path), file)
                } else {
                    (None, ProviderConfig::default())
                }
            }
        };

        let default_timeout = file
            .default_timeout()
            .context("invalid [timeouts] section")?
            .unwrap_or(DEFAULT_OPERATION_TIMEOUT);
        let selection = file
            .test_execution
            .clone()
            .with_env_overrides()
            .context("invalid test selection override")?;

        let state_dir = cli_state_dir
            .map(Path::to_path_buf)
            .or_else(|| std::env::var_os(STATE_DIR_ENV).map(PathBuf::from))
            .unwrap_or_else(default_state_dir);

        Ok(Self {
            source,
            defaults: file.harnesses.docker,
            selection,
            default_timeout,
            state_dir,
        })
    }
}

// -----------------------------------------------------------------------
// Tests
// -----------------------------------------------------------------------
