//! Container launch directives.
//!
//! A harness is described by an ordered list of [`ContainerOption`]s which
//! [`LaunchPlan::from_options`] folds into one plan. Field semantics:
//!
//! | option                     | semantics                      |
//! |----------------------------|--------------------------------|
//! | image, privileged, socket  | last write wins                |
//! | resources                  | last write wins                |
//! | envs                       | key-wise insert, later wins    |
//! | registry auth              | key-wise insert, later wins    |
//! | mounts, volumes            | appended in order              |
//! | networks                   | appended, duplicates dropped   |

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::auth::RegistryAuth;
use crate::error::ValidationError;
use crate::reference::ImageRef;
use crate::resources::ResourceRequest;

/// Where the host Docker socket appears inside a harness.
pub const CONTAINER_SOCKET_PATH: &str = "/var/run/docker.sock";

/// A host path bind-mounted into the container.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BindMount {
    pub source: PathBuf,
    pub destination: String,
}

/// A named engine volume mounted into the container.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VolumeMount {
    pub volume: String,
    pub destination: String,
}

/// One launch directive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum ContainerOption {
    Image(ImageRef),
    HostSocketPath(PathBuf),
    Privileged(bool),
    Resources(ResourceRequest),
    Envs(BTreeMap<String, String>),
    RegistryAuth { registry: String, auth: RegistryAuth },
    Mount(BindMount),
    Network(String),
    ManagedVolume(VolumeMount),
    ConfigVolume(String),
}

impl fmt::Display for ContainerOption {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Image(image) => write!(f, "image {image}"),
            Self::HostSocketPath(path) => {
                write!(f, "host socket {} -> {CONTAINER_SOCKET_PATH}", path.display())
            }
            Self::Privileged(p) => write!(f, "privileged {p}"),
            Self::Resources(r) => {
                write!(f, "resources")?;
                let fields = [
                    ("cpu_request", r.cpu_request),
                    ("cpu_limit", r.cpu_limit),
                    ("memory_request", r.memory_request),
                    ("memory_limit", r.memory_limit),
                ];
                for (name, value) in fields {
                    if let Some(q) = value {
                        write!(f, " {name}={q}")?;
                    }
                }
                Ok(())
            }
            Self::Envs(envs) => {
                let keys: Vec<&str> = envs.keys().map(String::as_str).collect();
                write!(f, "envs [{}]", keys.join(", "))
            }
            Self::RegistryAuth { registry, auth } => match auth {
                RegistryAuth::Keychain => write!(f, "registry {registry} auth keychain"),
                RegistryAuth::Static(creds) => {
                    write!(f, "registry {registry} auth static (user {:?})", creds.username)
                }
            },
            Self::Mount(m) => write!(f, "bind {} -> {}", m.source.display(), m.destination),
            Self::Network(name) => write!(f, "network {name}"),
            Self::ManagedVolume(v) => write!(f, "volume {} -> {}", v.volume, v.destination),
            Self::ConfigVolume(name) => write!(f, "config volume {name}"),
        }
    }
}

/// The resolved container configuration for one harness.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LaunchPlan {
    pub image: ImageRef,
    pub privileged: bool,
    pub host_socket_path: Option<PathBuf>,
    pub resources: Option<ResourceRequest>,
    pub envs: BTreeMap<String, String>,
    pub registries: BTreeMap<String, RegistryAuth>,
    pub mounts: Vec<BindMount>,
    pub volumes: Vec<VolumeMount>,
    pub networks: Vec<String>,
    pub config_volume: Option<String>,
}

impl LaunchPlan {
    /// Fold an ordered option list into a plan.
    ///
    /// Fails with [`ValidationError::MissingImage`] when no image option is
    /// present.
    pub fn from_options(options: &[ContainerOption]) -> Result<Self, ValidationError> {
        let mut image = None;
        let mut plan = PartialPlan::default();

        for option in options {
            match option {
                ContainerOption::Image(r) => image = Some(r.clone()),
                ContainerOption::HostSocketPath(p) => plan.host_socket_path = Some(p.clone()),
                ContainerOption::Privileged(p) => plan.privileged = *p,
                ContainerOption::Resources(r) => plan.resources = Some(*r),
                ContainerOption::Envs(envs) => {
                    plan.envs
                        .extend(envs.iter().map(|(k, v)| (k.clone(), v.clone())));
                }
                ContainerOption::RegistryAuth { registry, auth } => {
                    plan.registries.insert(registry.clone(), auth.clone());
                }
                ContainerOption::Mount(m) => plan.mounts.push(m.clone()),
                ContainerOption::Network(n) => {
                    if !plan.networks.contains(n) {
                        plan.networks.push(n.clone());
                    }
                }
                ContainerOption::ManagedVolume(v) => plan.volumes.push(v.clone()),
                ContainerOption::ConfigVolume(name) => plan.config_volume = Some(name.clone()),
            }
        }

        let image = image.ok_or(ValidationError::MissingImage)?;
        Ok(Self {
            image,
            privileged: plan.privileged,
            host_socket_path: plan.host_socket_path,
            resources: plan.resources,
            envs: plan.envs,
            registries: plan.registries,
            mounts: plan.mounts,
            volumes: plan.volumes,
            networks: plan.networks,
            config_volume: plan.config_volume,
        })
    }

    /// SHA-256 over the serialized plan, hex-encoded.
    ///
    /// Identical plans hash identically, which lets an engine recognize a
    /// re-submitted plan.
    pub fn fingerprint(&self) -> String {
        // Serializing plain data with string keys cannot fail.
        let bytes = serde_json::to_vec(self).unwrap_or_default();
        hex::encode(Sha256::digest(&bytes))
    }
}

#[derive(Default)]
struct PartialPlan {
    privileged: bool,
    host_socket_path: Option<PathBuf>,
    resources: Option<ResourceRequest>,
    envs: BTreeMap<String, String>,
    registries: BTreeMap<String, RegistryAuth>,
    mounts: Vec<BindMount>,
    volumes: Vec<VolumeMount>,
    networks: Vec<String>,
    config_volume: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::StaticCredentials;

    fn image(s: &str) -> ContainerOption {
        ContainerOption::Image(ImageRef::parse(s).unwrap())
    }

    fn envs(pairs: &[(&str, &str)]) -> ContainerOption {
        ContainerOption::Envs(
            pairs
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        )
    }

    #[test]
    fn image_is_required() {
        let err = LaunchPlan::from_options(&[ContainerOption::Privileged(true)]).unwrap_err();
        assert!(matches!(err, ValidationError::MissingImage));
    }

    #[test]
    fn last_image_wins() {
        let plan = LaunchPlan::from_options(&[image("a/b:1"), image("a/b:2")]).unwrap();
        assert_eq!(plan.image.tag(), Some("2"));
    }

    #[test]
    fn later_envs_override_earlier() {
        let plan = LaunchPlan::from_options(&[
            image("a/b"),
            envs(&[("A", "provider"), ("B", "provider")]),
            envs(&[("A", "resource")]),
        ])
        .unwrap();
        assert_eq!(plan.envs["A"], "resource");
        assert_eq!(plan.envs["B"], "provider");
    }

    #[test]
    fn mounts_append_and_networks_dedupe() {
        let mount = |s: &str, d: &str| {
            ContainerOption::Mount(BindMount {
                source: PathBuf::from(s),
                destination: d.to_string(),
            })
        };
        let plan = LaunchPlan::from_options(&[
            image("a/b"),
            mount("/x", "/y"),
            ContainerOption::Network("net".into()),
            mount("/x", "/y"),
            ContainerOption::Network("net".into()),
            ContainerOption::Network("other".into()),
        ])
        .unwrap();
        assert_eq!(plan.mounts.len(), 2);
        assert_eq!(plan.networks, vec!["net".to_string(), "other".to_string()]);
    }

    #[test]
    fn display_hides_static_secrets() {
        let opt = ContainerOption::RegistryAuth {
            registry: "cgr.dev".into(),
            auth: RegistryAuth::Static(StaticCredentials {
                username: "bot".into(),
                password: "hunter2".into(),
                auth: String::new(),
            }),
        };
        let shown = opt.to_string();
        assert!(shown.contains("bot"));
        assert!(!shown.contains("hunter2"));
    }

    #[test]
    fn fingerprint_tracks_content() {
        let a = LaunchPlan::from_options(&[image("a/b:1")]).unwrap();
        let b = LaunchPlan::from_options(&[image("a/b:1")]).unwrap();
        let c = LaunchPlan::from_options(&[image("a/b:1"), ContainerOption::Privileged(true)])
            .unwrap();
        assert_eq!(a.fingerprint(), b.fingerprint());
        assert_ne!(a.fingerprint(), c.fingerprint());
        assert_eq!(a.fingerprint().len(), 64);
    }
}
