//! Persisted per-component state.
//!
//! A component manifest is a small JSON document with at minimum a
//! `version` field. Absence means "not installed"; an unreadable or
//! unparseable manifest is reported back to the probe, which logs it and
//! also treats the component as not installed.
//!
//! The agent additionally writes its own configuration file carrying the
//! `client` and `site` it was paired with; it is only used to enrich the
//! summary.

use crate::error::Result;
use crate::host::{Inspect, Provision};
use crate::version::SemanticVersion;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Manifest written after a successful install.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComponentManifest {
    pub version: SemanticVersion,
    /// Architecture the installed artifact was built for
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub arch: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub installed_by: Option<String>,
}

impl ComponentManifest {
    pub fn new(version: SemanticVersion, arch: &str) -> Self {
        Self {
            version,
            arch: Some(arch.to_string()),
            installed_by: Some(format!("hostprep {}", env!("CARGO_PKG_VERSION"))),
        }
    }
}

/// Only the field the probe needs; anything else in the file is ignored.
#[derive(Debug, Deserialize)]
struct RawManifest {
    version: String,
}

/// Outcome of reading a manifest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ManifestRead {
    Missing,
    Invalid(String),
    Found(SemanticVersion),
}

pub fn read_manifest(host: &dyn Inspect, path: &Path) -> ManifestRead {
    let Some(content) = host.read_to_string(path) else {
        return ManifestRead::Missing;
    };

    let raw: RawManifest = match serde_json::from_str(&content) {
        Ok(raw) => raw,
        Err(e) => return ManifestRead::Invalid(format!("{}: {}", path.display(), e)),
    };

    match SemanticVersion::parse(&raw.version) {
        Ok(version) => ManifestRead::Found(version),
        Err(e) => ManifestRead::Invalid(format!("{}: {}", path.display(), e)),
    }
}

pub fn write_manifest(
    host: &dyn Provision,
    path: &Path,
    manifest: &ComponentManifest,
) -> Result<()> {
    let content = serde_json::to_string_pretty(manifest)?;
    host.write_file(path, &content, 0o644)
}

/// Pairing details the agent records after installation.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct AgentIdentity {
    pub client: String,
    pub site: String,
}

impl std::fmt::Display for AgentIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "client: {}, site: {}", self.client, self.site)
    }
}

/// Read the agent's configuration; `None` when absent or malformed.
pub fn read_agent_identity(host: &dyn Inspect, path: &Path) -> Option<AgentIdentity> {
    let content = host.read_to_string(path)?;
    match serde_json::from_str::<AgentIdentity>(&content) {
        Ok(identity) => Some(identity),
        Err(e) => {
            tracing::debug!(path = %path.display(), error = %e, "agent configuration not usable");
            None
        }
    }
}
