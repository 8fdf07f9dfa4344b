//! USB drive monitoring service.
//!
//! Installs the payload's runtime packages, downloads the payload script,
//! registers it as a service unit and starts it. The payload itself is
//! opaque here; only its active status is observed.

use crate::config::UsbMonitorSettings;
use crate::error::{EnvironmentGap, ProvisionError, Result};
use crate::host::{Inspect, Provision};
use crate::probe::Facts;
use crate::step::{enable_and_verify, require_service_manager, Check, Step};
use crate::types::{FailurePolicy, StepId};

#[derive(Debug, Clone)]
pub struct UsbMonitorStep {
    settings: UsbMonitorSettings,
}

impl UsbMonitorStep {
    pub fn new(settings: UsbMonitorSettings) -> Self {
        Self { settings }
    }

    /// Service unit running the payload under the configured interpreter.
    pub fn unit_file(&self) -> String {
        format!(
            "[Unit]\n\
             Description=USB drive log monitor\n\
             After=network-online.target\n\
             Wants=network-online.target\n\
             \n\
             [Service]\n\
             Type=simple\n\
             WorkingDirectory={dir}\n\
             ExecStart={interpreter} {script}\n\
             Restart=on-failure\n\
             RestartSec=5\n\
             \n\
             [Install]\n\
             WantedBy=multi-user.target\n",
            dir = self.settings.install_dir.display(),
            interpreter = self.settings.interpreter.display(),
            script = self.settings.script_path().display(),
        )
    }
}

impl Step for UsbMonitorStep {
    fn id(&self) -> StepId {
        StepId::UsbMonitor
    }

    fn policy(&self) -> FailurePolicy {
        FailurePolicy::Advisory
    }

    fn check(&self, _facts: &Facts, host: &dyn Inspect) -> Check {
        if host.is_active(&self.settings.service) {
            Check::Satisfied(format!("{} active", self.settings.service))
        } else {
            Check::Needed
        }
    }

    fn apply(&self, facts: &Facts, host: &dyn Provision) -> Result<String> {
        if facts.is_containerized {
            return Err(ProvisionError::UnsupportedEnvironment(EnvironmentGap::Containerized));
        }
        require_service_manager(facts)?;

        for package in &self.settings.packages {
            host.install(package)?;
        }
        host.fetch(&self.settings.payload_url, &self.settings.script_path())?;
        host.write_file(&self.settings.unit_path(), &self.unit_file(), 0o644)?;
        host.reload_units()?;
        enable_and_verify(host, &self.settings.service)?;

        Ok(format!("installed, {} active", self.settings.service))
    }
}
