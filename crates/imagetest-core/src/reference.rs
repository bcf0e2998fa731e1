//! OCI image reference parsing.
//!
//! Accepts `[registry[:port]/]repository[:tag][@algorithm:digest]`. Bare
//! Docker Hub names get the `index.docker.io` registry and `library/`
//! namespace; references with neither tag nor digest default to `latest`.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Registry used when a reference does not name one.
pub const DEFAULT_REGISTRY: &str = "index.docker.io";

/// Tag used when a reference has neither tag nor digest.
pub const DEFAULT_TAG: &str = "latest";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ReferenceError {
    #[error("reference is empty")]
    Empty,

    #[error("invalid registry {0:?}")]
    InvalidRegistry(String),

    #[error("invalid repository {0:?} (must be lowercase alphanumerics separated by '.', '_', '-' or '/')")]
    InvalidRepository(String),

    #[error("invalid tag {0:?}")]
    InvalidTag(String),

    #[error("invalid digest {0:?} (expected <algorithm>:<hex>)")]
    InvalidDigest(String),
}

/// A parsed, normalized image reference.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ImageRef {
    registry: String,
    repository: String,
    tag: Option<String>,
    digest: Option<String>,
}

impl ImageRef {
    /// Parse and validate a reference string.
    pub fn parse(input: &str) -> Result<Self, ReferenceError> {
        let input = input.trim();
        if input.is_empty() {
            return Err(ReferenceError::Empty);
        }

        let (name, digest) = match input.split_once('@') {
            Some((name, digest)) => {
                validate_digest(digest)?;
                (name, Some(digest.to_string()))
            }
            None => (input, None),
        };

        // A ':' after the last '/' separates the tag; earlier ones belong to
        // a registry port.
        let last_slash = name.rfind('/').map_or(0, |i| i + 1);
        let (name, tag) = match name[last_slash..].rfind(':') {
            Some(i) => {
                let tag = &name[last_slash + i + 1..];
                validate_tag(tag)?;
                (&name[..last_slash + i], Some(tag.to_string()))
            }
            None => (name, None),
        };

        let (registry, repository) = match name.split_once('/') {
            Some((head, rest)) if looks_like_registry(head) => {
                validate_registry(head)?;
                (head.to_string(), rest.to_string())
            }
            _ => (DEFAULT_REGISTRY.to_string(), name.to_string()),
        };

        validate_repository(&repository)?;

        let repository = if registry == DEFAULT_REGISTRY && !repository.contains('/') {
            format!("library/{repository}")
        } else {
            repository
        };

        let tag = match (&tag, &digest) {
            (None, None) => Some(DEFAULT_TAG.to_string()),
            _ => tag,
        };

        Ok(Self {
            registry,
            repository,
            tag,
            digest,
        })
    }

    pub fn registry(&self) -> &str {
        &self.registry
    }

    pub fn repository(&self) -> &str {
        &self.repository
    }

    pub fn tag(&self) -> Option<&str> {
        self.tag.as_deref()
    }

    pub fn digest(&self) -> Option<&str> {
        self.digest.as_deref()
    }
}

impl fmt::Display for ImageRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.registry, self.repository)?;
        if let Some(tag) = &self.tag {
            write!(f, ":{tag}")?;
        }
        if let Some(digest) = &self.digest {
            write!(f, "@{digest}")?;
        }
        Ok(())
    }
}

impl FromStr for ImageRef {
    type Err = ReferenceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

fn looks_like_registry(component: &str) -> bool {
    component.contains('.') || component.contains(':') || component == "localhost"
}

fn validate_registry(registry: &str) -> Result<(), ReferenceError> {
    let (host, port) = match registry.rsplit_once(':') {
        Some((host, port)) => (host, Some(port)),
        None => (registry, None),
    };
    let host_ok = !host.is_empty()
        && host
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '.' || c == '-')
        && !host.starts_with(['.', '-'])
        && !host.ends_with(['.', '-']);
    let port_ok = port.is_none_or(|p| !p.is_empty() && p.chars().all(|c| c.is_ascii_digit()));
    if host_ok && port_ok {
        Ok(())
    } else {
        Err(ReferenceError::InvalidRegistry(registry.to_string()))
    }
}

fn validate_repository(repository: &str) -> Result<(), ReferenceError> {
    let component_ok = |c: &str| {
        !c.is_empty()
            && c.chars()
                .all(|ch| ch.is_ascii_lowercase() || ch.is_ascii_digit() || "._-".contains(ch))
            && c.starts_with(|ch: char| ch.is_ascii_alphanumeric())
            && c.ends_with(|ch: char| ch.is_ascii_alphanumeric())
    };
    if repository.split('/').all(component_ok) {
        Ok(())
    } else {
        Err(ReferenceError::InvalidRepository(repository.to_string()))
    }
}

fn validate_tag(tag: &str) -> Result<(), ReferenceError> {
    let ok = !tag.is_empty()
        && tag.len() <= 128
        && tag.starts_with(|c: char| c.is_ascii_alphanumeric() || c == '_')
        && tag
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "_.-".contains(c));
    if ok {
        Ok(())
    } else {
        Err(ReferenceError::InvalidTag(tag.to_string()))
    }
}

fn validate_digest(digest: &str) -> Result<(), ReferenceError> {
    let ok = match digest.split_once(':') {
        Some((algorithm, encoded)) => {
            !algorithm.is_empty()
                && algorithm
                    .chars()
                    .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || "+._-".contains(c))
                && encoded.len() >= 32
                && encoded.chars().all(|c| c.is_ascii_hexdigit())
        }
        None => false,
    };
    if ok {
        Ok(())
    } else {
        Err(ReferenceError::InvalidDigest(digest.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DIGEST: &str = "sha256:0123456789abcdef0123456789abcdef0123456789abcdef0123456789abcdef";

    #[test]
    fn fully_qualified_reference() {
        let r = ImageRef::parse("cgr.dev/chainguard/docker-cli:latest-dev").unwrap();
        assert_eq!(r.registry(), "cgr.dev");
        assert_eq!(r.repository(), "chainguard/docker-cli");
        assert_eq!(r.tag(), Some("latest-dev"));
        assert_eq!(r.digest(), None);
        assert_eq!(r.to_string(), "cgr.dev/chainguard/docker-cli:latest-dev");
    }

    #[test]
    fn docker_hub_defaults() {
        let r = ImageRef::parse("alpine").unwrap();
        assert_eq!(r.registry(), DEFAULT_REGISTRY);
        assert_eq!(r.repository(), "library/alpine");
        assert_eq!(r.tag(), Some("latest"));

        let r = ImageRef::parse("repo/img:tag").unwrap();
        assert_eq!(r.to_string(), "index.docker.io/repo/img:tag");
    }

    #[test]
    fn registry_with_port_and_digest() {
        let input = format!("localhost:5000/team/app@{DIGEST}");
        let r = ImageRef::parse(&input).unwrap();
        assert_eq!(r.registry(), "localhost:5000");
        assert_eq!(r.repository(), "team/app");
        assert_eq!(r.tag(), None);
        assert_eq!(r.digest(), Some(DIGEST));
    }

    #[test]
    fn tag_and_digest_together() {
        let r = ImageRef::parse(&format!("cgr.dev/x/y:1.0@{DIGEST}")).unwrap();
        assert_eq!(r.tag(), Some("1.0"));
        assert_eq!(r.digest(), Some(DIGEST));
    }

    #[test]
    fn rejects_malformed_references() {
        assert_eq!(ImageRef::parse("  "), Err(ReferenceError::Empty));
        assert!(matches!(
            ImageRef::parse("Repo/Upper"),
            Err(ReferenceError::InvalidRepository(_))
        ));
        assert!(matches!(
            ImageRef::parse("repo/img:"),
            Err(ReferenceError::InvalidTag(_))
        ));
        assert!(matches!(
            ImageRef::parse("repo/img@sha256:nothex"),
            Err(ReferenceError::InvalidDigest(_))
        ));
        assert!(matches!(
            ImageRef::parse("bad_host.io:port/img"),
            Err(ReferenceError::InvalidRegistry(_))
        ));
        assert!(matches!(
            ImageRef::parse("repo//img"),
            Err(ReferenceError::InvalidRepository(_))
        ));
    }
}
