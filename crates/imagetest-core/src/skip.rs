//! Skip decisions for harness creation.
//!
//! A skipped harness is a terminal, non-error state: nothing is provisioned
//! and the lifecycle controller records `skipped = true`.

use std::collections::BTreeMap;

use anyhow::{Result, bail};
use serde::{Deserialize, Serialize};

use crate::spec::HarnessSpec;

/// Decides whether a harness should be provisioned at all.
pub trait SkipPolicy: Send + Sync {
    fn should_skip(&self, spec: &HarnessSpec) -> Result<bool>;
}

/// Never skip.
#[derive(Debug, Clone, Copy, Default)]
pub struct NeverSkip;

impl SkipPolicy for NeverSkip {
    fn should_skip(&self, _spec: &HarnessSpec) -> Result<bool> {
        Ok(false)
    }
}

/// Label-based test selection.
///
/// - `skip_all` skips everything.
/// - A harness with any label matching `exclude_by_label` is skipped.
/// - When `include_by_label` is non-empty, a harness is skipped unless one
///   of its labels matches.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestSelection {
    #[serde(default)]
    pub skip_all: bool,
    #[serde(default)]
    pub include_by_label: BTreeMap<String, String>,
    #[serde(default)]
    pub exclude_by_label: BTreeMap<String, String>,
}

impl TestSelection {
    /// Apply `IMAGETEST_SKIP_ALL`, `IMAGETEST_INCLUDE_BY_LABEL` and
    /// `IMAGETEST_EXCLUDE_BY_LABEL` on top of `self`. Label lists are
    /// `key=value` pairs separated by commas.
    pub fn with_env_overrides(mut self) -> Result<Self> {
        if let Ok(value) = std::env::var("IMAGETEST_SKIP_ALL") {
            self.skip_all = parse_bool(&value)?;
        }
        if let Ok(value) = std::env::var("IMAGETEST_INCLUDE_BY_LABEL") {
            self.include_by_label = parse_labels(&value)?;
        }
        if let Ok(value) = std::env::var("IMAGETEST_EXCLUDE_BY_LABEL") {
            self.exclude_by_label = parse_labels(&value)?;
        }
        Ok(self)
    }
}

impl SkipPolicy for TestSelection {
    fn should_skip(&self, spec: &HarnessSpec) -> Result<bool> {
        if self.skip_all {
            return Ok(true);
        }
        let matches = |selector: &BTreeMap<String, String>| {
            selector
                .iter()
                .any(|(k, v)| spec.labels.get(k).is_some_and(|actual| actual == v))
        };
        if matches(&self.exclude_by_label) {
            return Ok(true);
        }
        if !self.include_by_label.is_empty() && !matches(&self.include_by_label) {
            return Ok(true);
        }
        Ok(false)
    }
}

fn parse_bool(value: &str) -> Result<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" => Ok(true),
        "" | "0" | "false" | "no" => Ok(false),
        other => bail!("invalid boolean {other:?} in IMAGETEST_SKIP_ALL"),
    }
}

/// Parse `k=v,k2=v2` into a label map.
pub fn parse_labels(value: &str) -> Result<BTreeMap<String, String>> {
    let mut labels = BTreeMap::new();
    for pair in value.split(',').map(str::trim).filter(|p| !p.is_empty()) {
        let Some((k, v)) = pair.split_once('=') else {
            bail!("invalid label selector {pair:?} (expected key=value)");
        };
        labels.insert(k.trim().to_string(), v.trim().to_string());
    }
    Ok(labels)
}
