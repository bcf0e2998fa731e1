//! Docker engine backend.
//!
//! Drives the `docker` CLI through `tokio::process::Command`. Volumes and
//! containers are labelled with [`managed_labels`] and containers are named
//! `imagetest-<id>`.
//!
//! Setup is idempotent: the [`LaunchPlan`] fingerprint is stored as a
//! container label, and a running container whose label matches the current
//! plan is left alone. Anything else is replaced.

use std::collections::BTreeMap;
use std::process::{Output, Stdio};
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

use super::{ContainerEngine, managed_labels};
use crate::auth::{CredentialStore, DockerKeychain, render_docker_config};
use crate::harness::HarnessHandle;
use crate::options::{CONTAINER_SOCKET_PATH, LaunchPlan};

/// Label holding the plan fingerprint of a harness container.
pub const PLAN_HASH_LABEL: &str = "dev.imagetest.plan-hash";

/// Where the config volume is mounted inside the harness.
pub const CONFIG_MOUNT_PATH: &str = "/root/.docker";

/// Engine backed by the local `docker` CLI.
#[derive(Clone)]
pub struct DockerEngine {
    binary: String,
    credentials: Arc<dyn CredentialStore>,
}

impl DockerEngine {
    /// Use `docker` from `PATH` and the host Docker keychain.
    pub fn new() -> Self {
        Self {
            binary: "docker".to_string(),
            credentials: Arc::new(DockerKeychain::from_env()),
        }
    }

    /// Use a different CLI binary (e.g. a full path, or `podman`).
    pub fn with_binary(mut self, binary: impl Into<String>) -> Self {
        self.binary = binary.into();
        self
    }

    /// Resolve keychain registry auth through `store`.
    pub fn with_credentials(mut self, store: Arc<dyn CredentialStore>) -> Self {
        self.credentials = store;
        self
    }

    /// Container name for harness `id`.
    pub fn container_name(id: &str) -> String {
        // Docker names allow alphanumerics, '-', '_' and '.'.
        let sanitized: String = id
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') {
                    c
                } else {
                    '-'
                }
            })
            .collect();
        format!("imagetest-{sanitized}")
    }
}

impl Default for DockerEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for DockerEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DockerEngine")
            .field("binary", &self.binary)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl ContainerEngine for DockerEngine {
    async fn create_volume(&self, name: &str, labels: &BTreeMap<String, String>) -> Result<String> {
        let mut args = vec!["volume".to_string(), "create".to_string()];
        args.extend(label_args(labels));
        args.push(name.to_string());

        let output = run(&self.binary, &args).await?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            bail!("docker volume create {name} failed: {stderr}");
        }

        let created = String::from_utf8_lossy(&output.stdout).trim().to_string();
        tracing::debug!(volume = %created, "created volume");
        Ok(created)
    }

    async fn volume_exists(&self, name: &str) -> Result<bool> {
        let output = run(&self.binary, &["volume", "inspect", name]).await?;
        if output.status.success() {
            return Ok(true);
        }
        let stderr = String::from_utf8_lossy(&output.stderr);
        if is_missing(&stderr) {
            return Ok(false);
        }
        bail!("docker volume inspect {name} failed: {stderr}");
    }

    async fn remove_volume(&self, name: &str) -> Result<()> {
        let output = run(&self.binary, &["volume", "rm", "--force", name]).await?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            // Don't fail if the volume is already gone.
            if !is_missing(&stderr) {
                bail!("docker volume rm {name} failed: {stderr}");
            }
        }
        Ok(())
    }

    async fn create_container(&self, id: &str, plan: LaunchPlan) -> Result<Arc<dyn HarnessHandle>> {
        Ok(Arc::new(DockerHarness {
            id: id.to_string(),
            name: Self::container_name(id),
            binary: self.binary.clone(),
            credentials: Arc::clone(&self.credentials),
            plan,
        }))
    }

    async fn remove_container(&self, id: &str) -> Result<()> {
        remove_container_named(&self.binary, &Self::container_name(id)).await
    }
}

/// Live handle for one Docker harness container.
pub struct DockerHarness {
    id: String,
    name: String,
    binary: String,
    credentials: Arc<dyn CredentialStore>,
    plan: LaunchPlan,
}

impl DockerHarness {
    pub fn container_name(&self) -> &str {
        &self.name
    }

    pub fn plan(&self) -> &LaunchPlan {
        &self.plan
    }

    /// `(running, plan hash)` of the existing container, if there is one.
    async fn inspect(&self) -> Result<Option<(bool, String)>> {
        let format = format!("{{{{.State.Running}}}} {{{{index .Config.Labels \"{PLAN_HASH_LABEL}\"}}}}");
        let output = run(
            &self.binary,
            &["container", "inspect", "--format", &format, &self.name],
        )
        .await?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            if is_missing(&stderr) {
                return Ok(None);
            }
            bail!("docker inspect {} failed: {stderr}", self.name);
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let mut fields = stdout.split_whitespace();
        let running = fields.next() == Some("true");
        let hash = fields.next().unwrap_or_default().to_string();
        Ok(Some((running, hash)))
    }

    async fn write_registry_config(&self, config: &str) -> Result<()> {
        let target = format!("{CONFIG_MOUNT_PATH}/config.json");
        let script = format!("mkdir -p {CONFIG_MOUNT_PATH} && cat > {target}");

        let mut child = Command::new(&self.binary)
            .args(["exec", "-i", &self.name, "sh", "-c", &script])
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .context("failed to run docker exec")?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin
                .write_all(config.as_bytes())
                .await
                .context("failed to write registry config")?;
        }

        let output = child
            .wait_with_output()
            .await
            .context("failed to wait for docker exec")?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            bail!("writing {target} in {} failed: {stderr}", self.name);
        }
        Ok(())
    }
}

#[async_trait]
impl HarnessHandle for DockerHarness {
    fn id(&self) -> &str {
        &self.id
    }

    async fn setup(&self) -> Result<()> {
        let fingerprint = self.plan.fingerprint();

        if let Some((running, hash)) = self.inspect().await? {
            if running && hash == fingerprint {
                tracing::info!(container = %self.name, "harness container already up to date");
                return Ok(());
            }
            tracing::info!(container = %self.name, running, "replacing harness container");
            remove_container_named(&self.binary, &self.name).await?;
        }

        // Resolve credentials before anything is created so auth failures
        // leave no container behind.
        let registry_config = if self.plan.registries.is_empty() {
            None
        } else {
            let rendered = render_docker_config(&self.plan.registries, self.credentials.as_ref())
                .await
                .context("failed to resolve registry credentials")?;
            Some(rendered)
        };

        let args = create_args(&self.id, &self.name, &self.plan, &fingerprint);
        let output = run(&self.binary, &args).await?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            bail!("docker create failed: {stderr}");
        }

        for network in self.plan.networks.iter().skip(1) {
            let output = run(&self.binary, &["network", "connect", network, &self.name]).await?;
            if !output.status.success() {
                let stderr = String::from_utf8_lossy(&output.stderr);
                bail!("docker network connect {network} failed: {stderr}");
            }
        }

        let start_output = run(&self.binary, &["start", &self.name]).await?;
        if !start_output.status.success() {
            let stderr = String::from_utf8_lossy(&start_output.stderr);
            // Clean up the created container.
            let _ = run(&self.binary, &["rm", "-f", &self.name]).await;
            bail!("docker start failed: {stderr}");
        }

        if let Some(config) = registry_config {
            self.write_registry_config(&config).await?;
        }

        tracing::info!(
            container = %self.name,
            image = %self.plan.image,
            "harness container started"
        );
        Ok(())
    }

    async fn teardown(&self) -> Result<()> {
        remove_container_named(&self.binary, &self.name).await
    }
}

impl std::fmt::Debug for DockerHarness {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DockerHarness")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("image", &self.plan.image.to_string())
            .finish_non_exhaustive()
    }
}

/// Arguments for `docker create`.
fn create_args(id: &str, name: &str, plan: &LaunchPlan, fingerprint: &str) -> Vec<String> {
    let mut args = vec!["create".to_string(), "--name".to_string(), name.to_string()];

    let mut labels = managed_labels(id);
    labels.insert(PLAN_HASH_LABEL.to_string(), fingerprint.to_string());
    args.extend(label_args(&labels));

    if plan.privileged {
        args.push("--privileged".to_string());
    }

    if let Some(socket) = &plan.host_socket_path {
        args.push("-v".to_string());
        args.push(format!("{}:{CONTAINER_SOCKET_PATH}", socket.display()));
    }

    if let Some(resources) = &plan.resources {
        // The CPU limit is not enforced; only the request reaches docker.
        if let Some(request) = resources.cpu_request {
            args.push("--cpus".to_string());
            args.push(cpus(request.milli_value()));
        }
        if let Some(limit) = resources.memory_limit {
            args.push("--memory".to_string());
            args.push(format!("{}b", limit.value()));
        }
        if let Some(request) = resources.memory_request {
            args.push("--memory-reservation".to_string());
            args.push(format!("{}b", request.value()));
        }
    }

    for (key, value) in &plan.envs {
        args.push("-e".to_string());
        args.push(format!("{key}={value}"));
    }

    for mount in &plan.mounts {
        args.push("-v".to_string());
        args.push(format!("{}:{}", mount.source.display(), mount.destination));
    }

    for volume in &plan.volumes {
        args.push("-v".to_string());
        args.push(format!("{}:{}", volume.volume, volume.destination));
    }

    if let Some(config_volume) = &plan.config_volume {
        args.push("-v".to_string());
        args.push(format!("{config_volume}:{CONFIG_MOUNT_PATH}"));
        args.push("-e".to_string());
        args.push(format!("DOCKER_CONFIG={CONFIG_MOUNT_PATH}"));
    }

    if let Some(network) = plan.networks.first() {
        args.push("--network".to_string());
        args.push(network.clone());
    }

    args.push("--entrypoint".to_string());
    args.push("sh".to_string());
    args.push(plan.image.to_string());
    args.push("-c".to_string());
    args.push("tail -f /dev/null".to_string());

    args
}

fn label_args(labels: &BTreeMap<String, String>) -> Vec<String> {
    labels
        .iter()
        .flat_map(|(k, v)| ["--label".to_string(), format!("{k}={v}")])
        .collect()
}

/// Format millicores as a `--cpus` value.
fn cpus(millis: u64) -> String {
    let whole = millis / 1000;
    let frac = millis % 1000;
    if frac == 0 {
        whole.to_string()
    } else {
        format!("{whole}.{frac:03}")
            .trim_end_matches('0')
            .to_string()
    }
}

fn is_missing(stderr: &str) -> bool {
    let lower = stderr.to_ascii_lowercase();
    lower.contains("no such container")
        || lower.contains("no such volume")
        || lower.contains("no such object")
}

async fn run<S: AsRef<std::ffi::OsStr>>(binary: &str, args: &[S]) -> Result<Output> {
    let verb = args
        .first()
        .map(|a| a.as_ref().to_string_lossy().into_owned())
        .unwrap_or_default();
    Command::new(binary)
        .args(args)
        .output()
        .await
        .with_context(|| format!("failed to run {binary} {verb}"))
}

async fn remove_container_named(binary: &str, name: &str) -> Result<()> {
    let output = run(binary, &["rm", "-f", name]).await?;
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        // Don't fail if the container is already gone.
        if !is_missing(&stderr) {
            bail!("docker rm -f {name} failed: {stderr}");
        }
    }
    tracing::debug!(container = %name, "removed container");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::options::{BindMount, ContainerOption, VolumeMount};
    use crate::reference::ImageRef;
    use crate::resources::{Quantity, ResourceRequest};
    use std::path::PathBuf;

    fn plan(extra: Vec<ContainerOption>) -> LaunchPlan {
        let mut opts = vec![ContainerOption::Image(
            ImageRef::parse("cgr.dev/chainguard/docker-cli:latest-dev").unwrap(),
        )];
        opts.extend(extra);
        LaunchPlan::from_options(&opts).unwrap()
    }

    fn pair_present(args: &[String], flag: &str, value: &str) -> bool {
        args.windows(2).any(|w| w[0] == flag && w[1] == value)
    }

    #[test]
    fn container_name_sanitizes() {
        assert_eq!(DockerEngine::container_name("h1"), "imagetest-h1");
        assert_eq!(
            DockerEngine::container_name("my harness/one"),
            "imagetest-my-harness-one"
        );
    }

    #[test]
    fn minimal_create_args() {
        let args = create_args("h1", "imagetest-h1", &plan(vec![]), "abc");
        assert_eq!(&args[..3], ["create", "--name", "imagetest-h1"]);
        assert!(pair_present(&args, "--label", "dev.imagetest.managed-by=imagetest"));
        assert!(pair_present(&args, "--label", "dev.imagetest.harness-id=h1"));
        assert!(pair_present(&args, "--label", "dev.imagetest.plan-hash=abc"));
        assert!(!args.contains(&"--privileged".to_string()));
        assert!(!args.contains(&"--network".to_string()));

        let tail = &args[args.len() - 4..];
        assert_eq!(
            tail,
            [
                "sh",
                "cgr.dev/chainguard/docker-cli:latest-dev",
                "-c",
                "tail -f /dev/null"
            ]
        );
    }

    #[test]
    fn full_create_args() {
        let plan = plan(vec![
            ContainerOption::Privileged(true),
            ContainerOption::HostSocketPath(PathBuf::from("/run/docker.sock")),
            ContainerOption::Resources(ResourceRequest {
                cpu_request: Some(Quantity::from_millis(500)),
                cpu_limit: Some(Quantity::from_millis(1500)),
                memory_request: Some(Quantity::from_millis(1024 * 1000)),
                memory_limit: Some(Quantity::from_millis(2048 * 1000)),
            }),
            ContainerOption::Envs(BTreeMap::from([("FOO".to_string(), "bar".to_string())])),
            ContainerOption::Mount(BindMount {
                source: PathBuf::from("/a"),
                destination: "/b".into(),
            }),
            ContainerOption::ManagedVolume(VolumeMount {
                volume: "data".into(),
                destination: "/data".into(),
            }),
            ContainerOption::Network("netA".into()),
            ContainerOption::Network("netB".into()),
            ContainerOption::ConfigVolume("h1-config".into()),
        ]);
        let args = create_args("h1", "imagetest-h1", &plan, "abc");

        assert!(args.contains(&"--privileged".to_string()));
        assert!(pair_present(&args, "-v", "/run/docker.sock:/var/run/docker.sock"));
        assert!(pair_present(&args, "--cpus", "0.5"));
        assert!(!args.contains(&"1.5".to_string()));
        assert!(!args.contains(&"--cpu-shares".to_string()));
        assert!(pair_present(&args, "--memory", "2048b"));
        assert!(pair_present(&args, "--memory-reservation", "1024b"));
        assert!(pair_present(&args, "-e", "FOO=bar"));
        assert!(pair_present(&args, "-v", "/a:/b"));
        assert!(pair_present(&args, "-v", "data:/data"));
        assert!(pair_present(&args, "-v", "h1-config:/root/.docker"));
        assert!(pair_present(&args, "-e", "DOCKER_CONFIG=/root/.docker"));
        assert!(pair_present(&args, "--network", "netA"));
        assert!(!args.contains(&"netB".to_string()));
    }

    #[test]
    fn cpu_limit_alone_emits_no_cpu_flag() {
        let plan = plan(vec![ContainerOption::Resources(ResourceRequest {
            cpu_limit: Some("1500m".parse().unwrap()),
            ..Default::default()
        })]);
        let args = create_args("h1", "imagetest-h1", &plan, "abc");
        assert!(!args.contains(&"--cpus".to_string()));
        assert!(!args.contains(&"--cpu-shares".to_string()));
    }

    #[test]
    fn huge_cpu_request_formats_without_overflow() {
        let plan = plan(vec![ContainerOption::Resources(ResourceRequest {
            cpu_request: Some("10P".parse().unwrap()),
            ..Default::default()
        })]);
        let args = create_args("h1", "imagetest-h1", &plan, "abc");
        assert!(pair_present(&args, "--cpus", "10000000000000000"));
    }

    #[test]
    fn cpus_formatting() {
        assert_eq!(cpus(1000), "1");
        assert_eq!(cpus(1500), "1.5");
        assert_eq!(cpus(250), "0.25");
        assert_eq!(cpus(1), "0.001");
    }

    #[test]
    fn missing_object_detection() {
        assert!(is_missing("Error: No such container: imagetest-h1"));
        assert!(is_missing("Error response from daemon: get h1-config: no such volume"));
        assert!(!is_missing("permission denied"));
    }

    #[test]
    fn label_args_pairs() {
        let args = label_args(&managed_labels("x"));
        assert_eq!(
            args,
            vec![
                "--label",
                "dev.imagetest.harness-id=x",
                "--label",
                "dev.imagetest.managed-by=imagetest"
            ]
        );
    }

    #[tokio::test]
    async fn create_container_builds_handle_without_running_docker() {
        let engine = DockerEngine::new().with_binary("/nonexistent/docker");
        let handle = engine.create_container("h1", plan(vec![])).await.unwrap();
        assert_eq!(handle.id(), "h1");
    }
}
