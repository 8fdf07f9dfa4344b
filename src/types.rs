//! Type-safe vocabulary for hostprep
//!
//! Closed enums instead of stringly-typed identifiers: step ids, components
//! with manifests, failure policies and the normalized CPU architecture.

use serde::{Deserialize, Serialize};
use std::fmt;
use strum::{Display, EnumIter, EnumString};

/// Normalized CPU architecture.
///
/// Raw platform strings (`uname -m`, Debian arch names) collapse into
/// exactly one of the supported variants. Anything else is carried as
/// `Unsupported` so architecture-dependent steps can fail with the raw value.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Architecture {
    Amd64,
    Arm64,
    Unsupported(String),
}

impl Architecture {
    /// Normalize a raw platform string.
    pub fn normalize(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "x86_64" | "amd64" | "x64" => Self::Amd64,
            "aarch64" | "arm64" | "armv8" | "armv8l" => Self::Arm64,
            other => Self::Unsupported(other.to_string()),
        }
    }

    /// Name used in download URLs and package file names.
    ///
    /// Returns `None` for unsupported architectures.
    pub fn dispatch_name(&self) -> Option<&'static str> {
        match self {
            Self::Amd64 => Some("amd64"),
            Self::Arm64 => Some("arm64"),
            Self::Unsupported(_) => None,
        }
    }

    pub fn is_supported(&self) -> bool {
        !matches!(self, Self::Unsupported(_))
    }
}

impl fmt::Display for Architecture {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Amd64 => write!(f, "amd64"),
            Self::Arm64 => write!(f, "arm64"),
            Self::Unsupported(raw) => write!(f, "unsupported ({})", raw),
        }
    }
}

/// Components whose installed version is tracked through a manifest file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[derive(Display, EnumString, EnumIter)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Component {
    /// Remote monitoring/management agent
    Agent,
    /// Optional media-server component
    Media,
}

/// What happens to the run when a step's action fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[derive(Display, EnumString, EnumIter)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum FailurePolicy {
    /// Abort the whole run after recording the failure
    Fatal,
    /// Record the failure and continue with the next step
    Advisory,
}

impl FailurePolicy {
    pub fn is_fatal(self) -> bool {
        matches!(self, Self::Fatal)
    }
}

/// Identifier of a provisioning step.
///
/// The declaration order of the variants is the order steps run in and
/// the order the summary prints them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[derive(Display, EnumString, EnumIter)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum StepId {
    Timezone,
    Agent,
    Media,
    UsbMonitor,
    Overlay,
}

impl StepId {
    /// Summary line label.
    pub const fn label(self) -> &'static str {
        match self {
            Self::Timezone => "Timezone",
            Self::Agent => "Agent",
            Self::Media => "Optional media component",
            Self::UsbMonitor => "USB monitor",
            Self::Overlay => "Overlay network",
        }
    }

    /// Guest-oriented steps never run on a specialized hypervisor host.
    pub const fn is_guest_only(self) -> bool {
        matches!(self, Self::Media | Self::UsbMonitor)
    }

    /// Steps that need real hardware access (udev, block devices) and are
    /// skipped inside containers.
    pub const fn needs_hardware(self) -> bool {
        matches!(self, Self::UsbMonitor)
    }
}
