//! Dotted version numbers and the upgrade decision.
//!
//! A `SemanticVersion` is an ordered tuple of non-negative integers with an
//! optional trailing build identifier (`1.40.1.8227-c0dd5a73e`). Ordering is
//! component-wise, left to right, with missing trailing components treated
//! as zero, so `5.1.5 == 5.1.5.0 < 5.1.5.39242`. The build identifier is
//! informational only and never participates in ordering.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Errors produced while parsing a version string.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum VersionParseError {
    #[error("empty version string")]
    Empty,

    #[error("invalid version component '{component}' in '{input}'")]
    InvalidComponent { input: String, component: String },
}

#[derive(Debug, Clone)]
pub struct SemanticVersion {
    parts: Vec<u64>,
    build: Option<String>,
}

impl SemanticVersion {
    /// Build a version from numeric components.
    pub fn new(parts: &[u64]) -> Self {
        let mut parts = parts.to_vec();
        if parts.is_empty() {
            parts.push(0);
        }
        Self { parts, build: None }
    }

    pub fn with_build(mut self, build: impl Into<String>) -> Self {
        self.build = Some(build.into());
        self
    }

    pub fn parts(&self) -> &[u64] {
        &self.parts
    }

    pub fn build(&self) -> Option<&str> {
        self.build.as_deref()
    }

    /// Parse a dotted version. A leading `v` is accepted; everything after
    /// the first `-` or `+` is the build identifier.
    pub fn parse(input: &str) -> Result<Self, VersionParseError> {
        let trimmed = input.trim();
        let trimmed = trimmed
            .strip_prefix('v')
            .or_else(|| trimmed.strip_prefix('V'))
            .unwrap_or(trimmed);
        if trimmed.is_empty() {
            return Err(VersionParseError::Empty);
        }

        let (numeric, build) = match trimmed.find(['-', '+']) {
            Some(idx) => {
                let build = &trimmed[idx + 1..];
                (&trimmed[..idx], (!build.is_empty()).then(|| build.to_string()))
            }
            None => (trimmed, None),
        };

        let parts = numeric
            .split('.')
            .map(|component| {
                if component.is_empty() || !component.bytes().all(|b| b.is_ascii_digit()) {
                    return Err(VersionParseError::InvalidComponent {
                        input: input.to_string(),
                        component: component.to_string(),
                    });
                }
                component
                    .parse::<u64>()
                    .map_err(|_| VersionParseError::InvalidComponent {
                        input: input.to_string(),
                        component: component.to_string(),
                    })
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self { parts, build })
    }
}

/// Compare an installed version against a candidate.
///
/// `Less` means the candidate is newer and an upgrade is warranted.
/// `Equal` and `Greater` mean the installed version is up to date; the
/// caller must never act on `Greater` (no silent downgrades).
pub fn compare(installed: &SemanticVersion, candidate: &SemanticVersion) -> Ordering {
    let len = installed.parts.len().max(candidate.parts.len());
    for idx in 0..len {
        let a = installed.parts.get(idx).copied().unwrap_or(0);
        let b = candidate.parts.get(idx).copied().unwrap_or(0);
        match a.cmp(&b) {
            Ordering::Equal => continue,
            other => return other,
        }
    }
    Ordering::Equal
}

/// What to do with a component given its installed version and a target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpgradeDecision {
    /// Nothing installed yet
    Install,
    /// Installed version is older than the target
    Upgrade { from: SemanticVersion },
    /// Installed version is equal to or newer than the target
    UpToDate { installed: SemanticVersion },
}

impl UpgradeDecision {
    pub fn decide(installed: Option<&SemanticVersion>, target: &SemanticVersion) -> Self {
        match installed {
            None => Self::Install,
            Some(current) => match compare(current, target) {
                Ordering::Less => Self::Upgrade {
                    from: current.clone(),
                },
                Ordering::Equal | Ordering::Greater => Self::UpToDate {
                    installed: current.clone(),
                },
            },
        }
    }

    pub fn is_up_to_date(&self) -> bool {
        matches!(self, Self::UpToDate { .. })
    }
}

impl PartialEq for SemanticVersion {
    fn eq(&self, other: &Self) -> bool {
        compare(self, other) == Ordering::Equal
    }
}

impl Eq for SemanticVersion {}

impl PartialOrd for SemanticVersion {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for SemanticVersion {
    fn cmp(&self, other: &Self) -> Ordering {
        compare(self, other)
    }
}

impl FromStr for SemanticVersion {
    type Err = VersionParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for SemanticVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let numeric: Vec<String> = self.parts.iter().map(u64::to_string).collect();
        write!(f, "{}", numeric.join("."))?;
        if let Some(ref build) = self.build {
            write!(f, "-{}", build)?;
        }
        Ok(())
    }
}

impl Serialize for SemanticVersion {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for SemanticVersion {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Self::parse(&raw).map_err(serde::de::Error::custom)
    }
}
