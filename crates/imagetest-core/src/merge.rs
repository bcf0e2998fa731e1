//! Merging provider defaults with per-harness overrides.
//!
//! Precedence rules:
//! - mounts: harness mounts first, provider mounts appended;
//! - networks and registries: key-wise union, the harness entry wins when
//!   both define a key;
//! - envs: provider envs are emitted before harness envs and envs apply with
//!   insert-overwrite semantics, so the harness value wins on collision.
//!
//! All maps are ordered, so identical inputs always yield the same option
//! sequence.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::auth::resolve_registry_auth;
use crate::error::ValidationError;
use crate::options::{BindMount, ContainerOption, VolumeMount};
use crate::reference::ImageRef;
use crate::resources::parse_resources;
use crate::spec::{HarnessSpec, MountSpec, NetworkSpec, ProviderDefaults, RegistrySpec};

/// Harness and provider configuration combined field by field.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MergedConfig {
    pub host_socket_path: Option<PathBuf>,
    pub mounts: Vec<MountSpec>,
    pub networks: BTreeMap<String, NetworkSpec>,
    pub registries: BTreeMap<String, RegistrySpec>,
    pub provider_envs: BTreeMap<String, String>,
    pub harness_envs: BTreeMap<String, String>,
}

/// Combine optional provider defaults with a harness spec.
pub fn merge_config(defaults: Option<&ProviderDefaults>, spec: &HarnessSpec) -> MergedConfig {
    let mut merged = MergedConfig {
        host_socket_path: None,
        mounts: spec.mounts.clone(),
        networks: spec.networks.clone(),
        registries: spec.registries.clone(),
        provider_envs: BTreeMap::new(),
        harness_envs: spec.envs.clone(),
    };

    let Some(defaults) = defaults else {
        return merged;
    };

    merged.host_socket_path = defaults.host_socket_path.clone();
    merged.mounts.extend(defaults.mounts.iter().cloned());
    for (key, network) in &defaults.networks {
        merged
            .networks
            .entry(key.clone())
            .or_insert_with(|| network.clone());
    }
    for (key, registry) in &defaults.registries {
        merged
            .registries
            .entry(key.clone())
            .or_insert_with(|| registry.clone());
    }
    merged.provider_envs = defaults.envs.clone();

    merged
}

/// Build the ordered option list for a harness.
///
/// The config volume option is not included; the lifecycle controller
/// appends it once the volume exists.
pub fn build_options(
    defaults: Option<&ProviderDefaults>,
    spec: &HarnessSpec,
) -> Result<Vec<ContainerOption>, ValidationError> {
    let image =
        ImageRef::parse(&spec.image).map_err(|source| ValidationError::InvalidReference {
            value: spec.image.clone(),
            source,
        })?;

    let merged = merge_config(defaults, spec);
    let mut opts = vec![ContainerOption::Image(image)];

    if let Some(path) = &merged.host_socket_path {
        opts.push(ContainerOption::HostSocketPath(path.clone()));
    }

    opts.push(ContainerOption::Privileged(spec.privileged));

    if let Some(resources) = &spec.resources {
        let request = parse_resources(resources)?;
        tracing::info!(
            harness_id = %spec.id,
            cpu_request = ?request.cpu_request.map(|q| q.to_string()),
            cpu_limit = ?request.cpu_limit.map(|q| q.to_string()),
            memory_request = ?request.memory_request.map(|q| q.to_string()),
            memory_limit = ?request.memory_limit.map(|q| q.to_string()),
            "setting resources for docker harness"
        );
        opts.push(ContainerOption::Resources(request));
    }

    if defaults.is_some() {
        opts.push(ContainerOption::Envs(merged.provider_envs.clone()));
    }

    for (registry, info) in &merged.registries {
        if let Some(auth) = &info.auth {
            opts.push(ContainerOption::RegistryAuth {
                registry: registry.clone(),
                auth: resolve_registry_auth(auth),
            });
        }
    }

    for mount in &merged.mounts {
        opts.push(ContainerOption::Mount(resolve_mount(mount)?));
    }

    for network in merged.networks.values() {
        opts.push(ContainerOption::Network(network.name.clone()));
    }

    for vol in &spec.volumes {
        opts.push(ContainerOption::ManagedVolume(VolumeMount {
            volume: vol.source.id.clone(),
            destination: vol.destination.clone(),
        }));
    }

    opts.push(ContainerOption::Envs(merged.harness_envs));

    Ok(opts)
}

/// Make a mount source absolute against the current directory and check
/// the destination.
fn resolve_mount(mount: &MountSpec) -> Result<BindMount, ValidationError> {
    let invalid = |field: &'static str, value: &str, reason: String| ValidationError::InvalidMount {
        field,
        value: value.to_string(),
        reason,
    };

    if mount.source.trim().is_empty() {
        return Err(invalid("source", &mount.source, "must not be empty".into()));
    }
    let source = std::path::absolute(&mount.source)
        .map_err(|e| invalid("source", &mount.source, e.to_string()))?;

    if !Path::new(&mount.destination).is_absolute() {
        return Err(invalid(
            "destination",
            &mount.destination,
            "must be an absolute path".into(),
        ));
    }

    Ok(BindMount {
        source,
        destination: mount.destination.clone(),
    })
}
