//! Host environment detection
//!
//! Gathers the `Facts` every step decision is based on: containerization,
//! specialized hypervisor host, CPU architecture, current timezone,
//! installed component versions and service-manager presence.
//!
//! # Design
//!
//! - **Read-only**: the probe only holds an `&dyn Inspect`.
//! - **Never fails**: each check prefers a dedicated facility, falls back to
//!   filesystem markers, and finally to a documented default. Every fallback
//!   is recorded as a `Degradation` and logged at `warn`.
//! - **Fresh per run**: facts are captured once when the run starts and are
//!   never persisted.

use crate::config::ProvisionConfig;
use crate::host::Inspect;
use crate::manifest::{read_manifest, ManifestRead};
use crate::types::{Architecture, Component};
use crate::version::SemanticVersion;
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Timezone assumed when no detection mechanism answers.
pub const DEFAULT_TIMEZONE: &str = "UTC";

/// Marker files left by common container runtimes.
const CONTAINER_MARKERS: &[&str] = &["/.dockerenv", "/run/.containerenv"];

/// Substrings of `/proc/1/cgroup` that identify a containerized PID 1.
const CONTAINER_CGROUP_HINTS: &[&str] = &["docker", "lxc", "kubepods", "containerd", "libpod"];

/// Management command present on a specialized hypervisor host.
const HYPERVISOR_COMMAND: &str = "pveversion";

/// Cluster filesystem mount present on a specialized hypervisor host.
const HYPERVISOR_MARKER_DIR: &str = "/etc/pve";

/// A probe check that could not use its preferred mechanism.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Degradation {
    pub fact: &'static str,
    pub detail: String,
}

impl fmt::Display for Degradation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.fact, self.detail)
    }
}

/// Immutable observations about the host for the duration of one run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Facts {
    pub is_containerized: bool,
    pub is_specialized_host: bool,
    pub architecture: Architecture,
    pub current_timezone: String,
    pub installed: BTreeMap<Component, SemanticVersion>,
    pub has_service_manager: bool,
    /// Checks that fell back to a secondary mechanism or default
    pub degraded: Vec<Degradation>,
}

impl Facts {
    pub fn installed_version(&self, component: Component) -> Option<&SemanticVersion> {
        self.installed.get(&component)
    }
}

/// A bare-metal or VM guest with nothing installed: not containerized, not a
/// hypervisor host, amd64, UTC, systemd present.
impl Default for Facts {
    fn default() -> Self {
        Self {
            is_containerized: false,
            is_specialized_host: false,
            architecture: Architecture::Amd64,
            current_timezone: DEFAULT_TIMEZONE.to_string(),
            installed: BTreeMap::new(),
            has_service_manager: true,
            degraded: Vec::new(),
        }
    }
}

impl fmt::Display for Facts {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "arch={}, container={}, hypervisor_host={}, service_manager={}, timezone={}",
            self.architecture,
            self.is_containerized,
            self.is_specialized_host,
            self.has_service_manager,
            self.current_timezone
        )
    }
}

/// Detects `Facts` through an `Inspect` implementation.
pub struct EnvironmentProbe<'a> {
    host: &'a dyn Inspect,
    manifests: Vec<(Component, PathBuf)>,
}

impl<'a> EnvironmentProbe<'a> {
    pub fn new(host: &'a dyn Inspect) -> Self {
        Self {
            host,
            manifests: Vec::new(),
        }
    }

    /// Probe with the manifest locations named in the configuration.
    pub fn from_config(host: &'a dyn Inspect, config: &ProvisionConfig) -> Self {
        Self::new(host)
            .with_manifest(Component::Agent, config.agent.manifest_path.clone())
            .with_manifest(Component::Media, config.media.manifest_path.clone())
    }

    pub fn with_manifest(mut self, component: Component, path: impl Into<PathBuf>) -> Self {
        self.manifests.push((component, path.into()));
        self
    }

    /// Capture facts. Never fails.
    pub fn probe(&self) -> Facts {
        let mut degraded = Vec::new();

        let is_containerized = detect_container(self.host, &mut degraded);
        let is_specialized_host = detect_specialized_host(self.host);
        let architecture = detect_architecture(self.host, &mut degraded);
        let current_timezone = detect_timezone(self.host, &mut degraded);
        let has_service_manager = detect_service_manager(self.host);

        let mut installed = BTreeMap::new();
        for (component, path) in &self.manifests {
            if let Some(version) = detect_installed(self.host, *component, path, &mut degraded) {
                installed.insert(*component, version);
            }
        }

        for degradation in &degraded {
            warn!(fact = degradation.fact, "detection degraded: {}", degradation.detail);
        }

        let facts = Facts {
            is_containerized,
            is_specialized_host,
            architecture,
            current_timezone,
            installed,
            has_service_manager,
            degraded,
        };
        info!("Environment detection: {}", facts);
        facts
    }
}

// ============================================================================
// Detection Functions
// ============================================================================

/// Containerization: `systemd-detect-virt --container` when available,
/// otherwise runtime marker files, then PID 1's cgroup and environment.
pub fn detect_container(host: &dyn Inspect, degraded: &mut Vec<Degradation>) -> bool {
    if host.command_exists("systemd-detect-virt") {
        // Prints the container type and exits 0, or prints "none" and exits 1
        return match host.query("systemd-detect-virt", &["--container"]) {
            Some(kind) => {
                let kind = kind.trim();
                debug!(kind, "systemd-detect-virt reported container");
                !kind.is_empty() && kind != "none"
            }
            None => false,
        };
    }

    degraded.push(Degradation {
        fact: "is_containerized",
        detail: "systemd-detect-virt unavailable, using filesystem markers".to_string(),
    });

    if CONTAINER_MARKERS.iter().any(|m| host.exists(Path::new(m))) {
        return true;
    }

    if let Some(cgroup) = host.read_to_string(Path::new("/proc/1/cgroup")) {
        if CONTAINER_CGROUP_HINTS.iter().any(|hint| cgroup.contains(hint)) {
            return true;
        }
    }

    host.read_to_string(Path::new("/proc/1/environ"))
        .map(|environ| environ.split('\0').any(|var| var.starts_with("container=")))
        .unwrap_or(false)
}

/// Specialized hypervisor host: management command or marker directory.
pub fn detect_specialized_host(host: &dyn Inspect) -> bool {
    host.command_exists(HYPERVISOR_COMMAND) || host.exists(Path::new(HYPERVISOR_MARKER_DIR))
}

/// Architecture from `uname -m`, falling back to the build target.
pub fn detect_architecture(host: &dyn Inspect, degraded: &mut Vec<Degradation>) -> Architecture {
    match host.query("uname", &["-m"]) {
        Some(raw) if !raw.trim().is_empty() => Architecture::normalize(&raw),
        _ => {
            degraded.push(Degradation {
                fact: "architecture",
                detail: format!(
                    "uname unavailable, assuming build target '{}'",
                    std::env::consts::ARCH
                ),
            });
            Architecture::normalize(std::env::consts::ARCH)
        }
    }
}

/// Timezone from `timedatectl`, then `/etc/timezone`, then the
/// `/etc/localtime` symlink, then `DEFAULT_TIMEZONE`.
pub fn detect_timezone(host: &dyn Inspect, degraded: &mut Vec<Degradation>) -> String {
    if host.command_exists("timedatectl") {
        if let Some(tz) = host.query("timedatectl", &["show", "-p", "Timezone", "--value"]) {
            let tz = tz.trim();
            if !tz.is_empty() {
                return tz.to_string();
            }
        }
    }

    if let Some(content) = host.read_to_string(Path::new("/etc/timezone")) {
        if let Some(tz) = content.lines().map(str::trim).find(|l| !l.is_empty()) {
            degraded.push(Degradation {
                fact: "current_timezone",
                detail: "timedatectl unavailable, read /etc/timezone".to_string(),
            });
            return tz.to_string();
        }
    }

    if let Some(target) = host.read_link(Path::new("/etc/localtime")) {
        let target = target.to_string_lossy();
        if let Some((_, tz)) = target.split_once("zoneinfo/") {
            degraded.push(Degradation {
                fact: "current_timezone",
                detail: "timedatectl unavailable, resolved /etc/localtime".to_string(),
            });
            return tz.to_string();
        }
    }

    degraded.push(Degradation {
        fact: "current_timezone",
        detail: format!("no timezone source found, assuming {}", DEFAULT_TIMEZONE),
    });
    DEFAULT_TIMEZONE.to_string()
}

/// A usable service manager needs both `systemctl` and a booted systemd.
pub fn detect_service_manager(host: &dyn Inspect) -> bool {
    let has_systemctl = host.command_exists("systemctl");
    let booted = host.exists(Path::new("/run/systemd/system"));
    if has_systemctl && !booted {
        info!("systemctl present but systemd is not running as init");
    }
    has_systemctl && booted
}

/// Installed version from a component manifest; unreadable manifests
/// degrade to "not installed".
pub fn detect_installed(
    host: &dyn Inspect,
    component: Component,
    path: &Path,
    degraded: &mut Vec<Degradation>,
) -> Option<SemanticVersion> {
    match read_manifest(host, path) {
        ManifestRead::Found(version) => {
            debug!(%component, %version, "component installed");
            Some(version)
        }
        ManifestRead::Missing => {
            debug!(%component, "component not installed");
            None
        }
        ManifestRead::Invalid(reason) => {
            degraded.push(Degradation {
                fact: "installed_version",
                detail: format!(
                    "{} manifest unusable, treating as not installed: {}",
                    component, reason
                ),
            });
            None
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
