//! Provisioning configuration
//!
//! Everything the engine treats as external data lives here: target
//! timezone, download URL templates, service names, manifest locations and
//! prompt timeout. The configuration is loaded once from JSON; every field
//! has a built-in default, so a host without a configuration file still
//! provisions to the stock target state.

use crate::types::Architecture;
use crate::version::SemanticVersion;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use strum::{Display, EnumString};

/// Location read when `--config` is not given.
pub const DEFAULT_CONFIG_PATH: &str = "/etc/hostprep/config.json";

/// Upper bound for `prompt_timeout_secs` (one hour).
pub const MAX_PROMPT_TIMEOUT_SECS: u64 = 3600;

/// What to do with an agent that is already installed and running.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[derive(Display, EnumString)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum ReinstallPolicy {
    /// Leave an up-to-date, active agent alone
    #[default]
    SkipWhenActive,
    /// Reinstall and re-pair on every run
    AlwaysReinstall,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentSettings {
    /// Version the host should end up running
    pub version: SemanticVersion,
    /// Binary download URL; `{arch}` and `{version}` are expanded
    pub download_url: String,
    /// Where the downloaded installer binary is placed
    pub binary_path: PathBuf,
    /// Arguments passed to the installer binary
    pub install_args: Vec<String>,
    /// Environment variable carrying the enrollment key, if one was given
    pub enroll_key_env: String,
    pub service: String,
    pub manifest_path: PathBuf,
    /// Agent-written configuration with `client` and `site` fields
    pub config_path: PathBuf,
    pub reinstall: ReinstallPolicy,
}

impl Default for AgentSettings {
    fn default() -> Self {
        Self {
            version: SemanticVersion::new(&[2, 4, 1]),
            download_url: "https://downloads.hostprep.dev/agent/{version}/agent-linux-{arch}"
                .to_string(),
            binary_path: PathBuf::from("/usr/local/bin/monitoring-agent"),
            install_args: vec!["install".to_string(), "--silent".to_string()],
            enroll_key_env: "AGENT_ENROLL_KEY".to_string(),
            service: "monitoring-agent".to_string(),
            manifest_path: PathBuf::from("/etc/monitoring-agent/manifest.json"),
            config_path: PathBuf::from("/etc/monitoring-agent/agent.json"),
            reinstall: ReinstallPolicy::SkipWhenActive,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MediaSettings {
    /// Versions offered to the operator, newest first
    pub candidates: Vec<SemanticVersion>,
    /// Package download URL; `{arch}` and `{version}` are expanded
    pub download_url: String,
    pub download_dir: PathBuf,
    pub manifest_path: PathBuf,
}

impl Default for MediaSettings {
    fn default() -> Self {
        Self {
            candidates: vec![
                SemanticVersion::new(&[5, 1, 5, 39242]),
                SemanticVersion::new(&[5, 0, 2, 38953]),
            ],
            download_url:
                "https://downloads.hostprep.dev/media/{version}/media-server_{version}_{arch}.deb"
                    .to_string(),
            download_dir: PathBuf::from("/var/cache/hostprep"),
            manifest_path: PathBuf::from("/etc/hostprep/media.json"),
        }
    }
}

impl MediaSettings {
    /// Newest offered version.
    pub fn newest(&self) -> Option<&SemanticVersion> {
        self.candidates.iter().max()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct UsbMonitorSettings {
    pub service: String,
    /// URL of the monitor payload script
    pub payload_url: String,
    pub install_dir: PathBuf,
    pub script_name: String,
    pub interpreter: PathBuf,
    /// Runtime packages the payload needs
    pub packages: Vec<String>,
    pub unit_dir: PathBuf,
}

impl Default for UsbMonitorSettings {
    fn default() -> Self {
        Self {
            service: "usblogmon".to_string(),
            payload_url:
                "https://raw.githubusercontent.com/lazerusrm/usblogmon/main/usb_log_manager.py"
                    .to_string(),
            install_dir: PathBuf::from("/opt/usblogmon"),
            script_name: "usb_log_manager.py".to_string(),
            interpreter: PathBuf::from("/usr/bin/python3"),
            packages: vec![
                "python3".to_string(),
                "python3-pyudev".to_string(),
                "python3-requests".to_string(),
            ],
            unit_dir: PathBuf::from("/etc/systemd/system"),
        }
    }
}

impl UsbMonitorSettings {
    pub fn script_path(&self) -> PathBuf {
        self.install_dir.join(&self.script_name)
    }

    pub fn unit_path(&self) -> PathBuf {
        self.unit_dir.join(format!("{}.service", self.service))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OverlaySettings {
    pub package: String,
    /// Client binary whose presence means the package is installed
    pub binary: String,
    pub service: String,
    /// Shell snippet that joins the network; reads the key from `auth_key_env`
    pub join_script: String,
    pub auth_key_env: String,
    /// Read-only command that exits 0 when the node is connected
    pub status_command: Vec<String>,
}

impl Default for OverlaySettings {
    fn default() -> Self {
        Self {
            package: "tailscale".to_string(),
            binary: "tailscale".to_string(),
            service: "tailscaled".to_string(),
            join_script: "tailscale up --auth-key=\"$OVERLAY_AUTH_KEY\"".to_string(),
            auth_key_env: "OVERLAY_AUTH_KEY".to_string(),
            status_command: vec!["tailscale".to_string(), "status".to_string()],
        }
    }
}

/// Complete provisioning configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProvisionConfig {
    /// Timezone offered as the prompt default
    pub target_timezone: String,
    pub zoneinfo_dir: PathBuf,
    /// Upper bound on every operator prompt
    pub prompt_timeout_secs: u64,
    pub lock_path: PathBuf,
    /// Command prefix to install one package
    pub package_install_command: Vec<String>,
    pub agent: AgentSettings,
    pub media: MediaSettings,
    pub usb_monitor: UsbMonitorSettings,
    pub overlay: OverlaySettings,
}

impl Default for ProvisionConfig {
    fn default() -> Self {
        Self {
            target_timezone: "America/Chicago".to_string(),
            zoneinfo_dir: PathBuf::from("/usr/share/zoneinfo"),
            prompt_timeout_secs: 30,
            lock_path: PathBuf::from("/run/hostprep.lock"),
            package_install_command: vec![
                "apt-get".to_string(),
                "install".to_string(),
                "-y".to_string(),
            ],
            agent: AgentSettings::default(),
            media: MediaSettings::default(),
            usb_monitor: UsbMonitorSettings::default(),
            overlay: OverlaySettings::default(),
        }
    }
}

impl ProvisionConfig {
    /// Load configuration.
    ///
    /// An explicit path must exist. Without one, `DEFAULT_CONFIG_PATH` is
    /// used if present and built-in defaults otherwise. The result is validated.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        let config = match explicit {
            Some(path) => Self::load_from_file(path)?,
            None if Path::new(DEFAULT_CONFIG_PATH).exists() => {
                Self::load_from_file(Path::new(DEFAULT_CONFIG_PATH))?
            }
            None => {
                tracing::debug!("no configuration file, using built-in defaults");
                Self::default()
            }
        };
        config.validate()?;
        Ok(config)
    }

    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))
    }

    pub fn validate(&self) -> Result<()> {
        if self.target_timezone.trim().is_empty() {
            anyhow::bail!("target_timezone cannot be empty");
        }
        if self.package_install_command.is_empty() {
            anyhow::bail!("package_install_command cannot be empty");
        }
        if !self.agent.download_url.contains("{arch}") {
            anyhow::bail!("agent.download_url must contain an {{arch}} placeholder");
        }
        if !self.media.download_url.contains("{arch}")
            || !self.media.download_url.contains("{version}")
        {
            anyhow::bail!("media.download_url must contain {{arch}} and {{version}} placeholders");
        }
        for (name, service) in [
            ("agent.service", &self.agent.service),
            ("usb_monitor.service", &self.usb_monitor.service),
            ("overlay.service", &self.overlay.service),
        ] {
            if service.trim().is_empty() {
                anyhow::bail!("{} cannot be empty", name);
            }
        }
        if self.overlay.status_command.is_empty() {
            anyhow::bail!("overlay.status_command cannot be empty");
        }
        if self.prompt_timeout_secs > MAX_PROMPT_TIMEOUT_SECS {
            anyhow::bail!(
                "prompt_timeout_secs must be at most {} (got {})",
                MAX_PROMPT_TIMEOUT_SECS,
                self.prompt_timeout_secs
            );
        }
        Ok(())
    }

    pub fn prompt_timeout(&self) -> Duration {
        Duration::from_secs(self.prompt_timeout_secs)
    }
}

/// Expand `{arch}` and `{version}` in a URL template.
///
/// Returns `None` for an unsupported architecture.
pub fn expand(template: &str, version: &SemanticVersion, arch: &Architecture) -> Option<String> {
    let arch = arch.dispatch_name()?;
    Some(
        template
            .replace("{arch}", arch)
            .replace("{version}", &version.to_string()),
    )
}
