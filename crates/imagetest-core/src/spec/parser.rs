//! Harness definition parser with validation.
//!
//! Parses a harness TOML string into a [`HarnessToml`] and validates:
//! - `id` and `name` are present.
//! - Timeouts are well-formed, non-zero durations.
//! - Volume mounts name a source volume and an absolute destination.
//!
//! Image references, resource quantities, and mount paths are resolved
//! later, when the option set is built.

use std::path::Path;
use std::time::Duration;

use super::toml_format::{HarnessToml, TimeoutsToml};
use super::{DEFAULT_HARNESS_IMAGE, HarnessSpec, TimeoutPolicy};
use crate::error::ValidationError;

/// Parse and validate a harness definition string.
pub fn parse_harness_toml(content: &str) -> Result<HarnessSpec, ValidationError> {
    let raw: HarnessToml = toml::from_str(content)?;
    raw.into_spec()
}

impl HarnessToml {
    /// Validate the raw definition and apply defaults.
    pub fn into_spec(self) -> Result<HarnessSpec, ValidationError> {
        if self.id.trim().is_empty() {
            return Err(ValidationError::MissingField("id"));
        }
        if self.name.trim().is_empty() {
            return Err(ValidationError::MissingField("name"));
        }

        for vol in &self.volumes {
            if vol.source.id.trim().is_empty() {
                return Err(ValidationError::InvalidVolume {
                    volume: vol.source.name.clone(),
                    reason: "source id must not be empty".to_string(),
                });
            }
            if !Path::new(&vol.destination).is_absolute() {
                return Err(ValidationError::InvalidVolume {
                    volume: vol.source.name.clone(),
                    reason: format!("destination {:?} must be absolute", vol.destination),
                });
            }
        }

        let timeouts = parse_timeouts(self.timeouts.unwrap_or_default())?;

        Ok(HarnessSpec {
            id: self.id,
            name: self.name,
            inventory: self.inventory,
            labels: self.labels,
            image: self
                .image
                .unwrap_or_else(|| DEFAULT_HARNESS_IMAGE.to_string()),
            privileged: self.privileged.unwrap_or(false),
            envs: self.envs,
            mounts: self.mounts,
            networks: self.networks,
            registries: self.registries,
            resources: self.resources,
            volumes: self.volumes,
            timeouts,
        })
    }
}

fn parse_timeouts(raw: TimeoutsToml) -> Result<TimeoutPolicy, ValidationError> {
    Ok(TimeoutPolicy {
        create: parse_timeout("create", raw.create)?,
        update: parse_timeout("update", raw.update)?,
        delete: parse_timeout("delete", raw.delete)?,
    })
}

fn parse_timeout(
    field: &'static str,
    value: Option<String>,
) -> Result<Option<Duration>, ValidationError> {
    let Some(value) = value else {
        return Ok(None);
    };
    let duration =
        humantime::parse_duration(&value).map_err(|e| ValidationError::InvalidTimeout {
            field,
            value: value.clone(),
            reason: e.to_string(),
        })?;
    if duration.is_zero() {
        return Err(ValidationError::InvalidTimeout {
            field,
            value,
            reason: "must be greater than zero".to_string(),
        });
    }
    Ok(Some(duration))
}

#[cfg(test)]
mod tests {
    use super::*;

    const FULL: &str = r#"
        id = "h1"
        name = "docker"
        image = "repo/img:tag"
        privileged = true

        [inventory]
        seed = "seed-1"

        [labels]
        team = "infra"

        [envs]
        FOO = "bar"

        [[mounts]]
        source = "/a"
        destination = "/b"

        [networks.n1]
        name = "netB"

        [registries."cgr.dev".auth]
        username = "bot"
        password = "pw"

        [registries."ghcr.io"]

        [resources.memory]
        request = "512Mi"
        limit = "1Gi"

        [resources.cpu]
        request = "1"

        [[volumes]]
        destination = "/cache"
        [volumes.source]
        id = "vol-1"
        name = "cache"
        inventory = { seed = "seed-1" }

        [timeouts]
        create = "10m"
    "#;

    #[test]
    fn parse_full_definition() {
        let spec = parse_harness_toml(FULL).expect("should parse");
        assert_eq!(spec.id, "h1");
        assert_eq!(spec.name, "docker");
        assert_eq!(spec.inventory.seed, "seed-1");
        assert_eq!(spec.image, "repo/img:tag");
        assert!(spec.privileged);
        assert_eq!(spec.labels.get("team").map(String::as_str), Some("infra"));
        assert_eq!(spec.envs.get("FOO").map(String::as_str), Some("bar"));
        assert_eq!(spec.mounts.len(), 1);
        assert_eq!(spec.networks["n1"].name, "netB");
        assert!(spec.registries["cgr.dev"].auth.is_some());
        assert!(spec.registries["ghcr.io"].auth.is_none());
        let resources = spec.resources.as_ref().unwrap();
        assert_eq!(
            resources.memory.as_ref().unwrap().limit.as_deref(),
            Some("1Gi")
        );
        assert_eq!(spec.volumes[0].source.id, "vol-1");
        assert_eq!(spec.timeouts.create, Some(Duration::from_secs(600)));
        assert_eq!(spec.timeouts.update, None);
    }

    #[test]
    fn defaults_applied() {
        let spec = parse_harness_toml("id = \"h1\"\nname = \"n\"\n").unwrap();
        assert_eq!(spec.image, DEFAULT_HARNESS_IMAGE);
        assert!(!spec.privileged);
        assert!(spec.mounts.is_empty());
        assert_eq!(spec.timeouts, TimeoutPolicy::default());
    }

    #[test]
    fn missing_identity_rejected() {
        let err = parse_harness_toml("name = \"n\"\n").unwrap_err();
        assert!(matches!(err, ValidationError::MissingField("id")));

        let err = parse_harness_toml("id = \"h1\"\n").unwrap_err();
        assert!(matches!(err, ValidationError::MissingField("name")));
    }

    #[test]
    fn bad_timeout_rejected() {
        let err = parse_harness_toml(
            "id = \"h1\"\nname = \"n\"\n[timeouts]\ncreate = \"soon\"\n",
        )
        .unwrap_err();
        assert!(matches!(
            err,
            ValidationError::InvalidTimeout { field: "create", .. }
        ));

        let err =
            parse_harness_toml("id = \"h1\"\nname = \"n\"\n[timeouts]\ndelete = \"0s\"\n")
                .unwrap_err();
        assert!(matches!(
            err,
            ValidationError::InvalidTimeout { field: "delete", .. }
        ));
    }

    #[test]
    fn relative_volume_destination_rejected() {
        let input = r#"
            id = "h1"
            name = "n"
            [[volumes]]
            destination = "cache"
            [volumes.source]
            id = "vol-1"
            name = "cache"
            inventory = { seed = "s" }
        "#;
        let err = parse_harness_toml(input).unwrap_err();
        assert!(matches!(err, ValidationError::InvalidVolume { .. }));
    }

    #[test]
    fn malformed_toml_rejected() {
        let err = parse_harness_toml("id = ").unwrap_err();
        assert!(matches!(err, ValidationError::Toml(_)));
    }
}
