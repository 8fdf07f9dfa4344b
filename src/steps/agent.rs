//! Monitoring agent step.
//!
//! # Failure Policy
//!
//! **FATAL**: every later step assumes the host is enrolled with the
//! monitoring backend, so a failed agent install aborts the run.
//!
//! # Reinstall Policy
//!
//! With `skip-when-active` (the default) an agent whose manifest version is
//! at or above the target and whose service is active is left alone. With
//! `always-reinstall` the agent is fetched and re-enrolled on every run.
//!
//! The enrollment key is optional and only ever reaches the installer
//! through an environment variable. It is not asked for when the installed
//! agent is already at the target version, unless every run reinstalls.

use crate::config::{expand, AgentSettings, ReinstallPolicy};
use crate::error::{ProvisionError, Result};
use crate::host::{Inspect, Invocation, Provision};
use crate::manifest::{read_agent_identity, write_manifest, ComponentManifest};
use crate::probe::Facts;
use crate::prompt::Prompter;
use crate::step::{
    enable_and_verify, require_service_manager, require_supported_arch, Check, Step,
};
use crate::types::{Component, FailurePolicy, StepId};
use crate::version::UpgradeDecision;
use std::time::Duration;
use tracing::{debug, info};

#[derive(Debug, Clone)]
pub struct AgentStep {
    settings: AgentSettings,
    enroll_key: Option<String>,
}

impl AgentStep {
    pub fn new(settings: AgentSettings) -> Self {
        Self {
            settings,
            enroll_key: None,
        }
    }

    fn decision(&self, facts: &Facts) -> UpgradeDecision {
        UpgradeDecision::decide(
            facts.installed_version(Component::Agent),
            &self.settings.version,
        )
    }

    /// Append `(client: …, site: …)` when the agent has recorded its pairing.
    fn with_identity(&self, host: &dyn Inspect, detail: String) -> String {
        match read_agent_identity(host, &self.settings.config_path) {
            Some(identity) => format!("{} ({})", detail, identity),
            None => detail,
        }
    }
}

impl Step for AgentStep {
    fn id(&self) -> StepId {
        StepId::Agent
    }

    fn policy(&self) -> FailurePolicy {
        FailurePolicy::Fatal
    }

    fn gather(&mut self, facts: &Facts, prompter: &dyn Prompter, timeout: Duration) {
        if self.settings.reinstall == ReinstallPolicy::SkipWhenActive
            && self.decision(facts).is_up_to_date()
        {
            debug!("agent at target version, enrollment key not needed");
            self.enroll_key = None;
            return;
        }
        let key = prompter.ask("Agent enrollment key", "", timeout);
        self.enroll_key = (!key.is_empty()).then_some(key);
        debug!(provided = self.enroll_key.is_some(), "agent enrollment key");
    }

    fn check(&self, facts: &Facts, host: &dyn Inspect) -> Check {
        if self.settings.reinstall == ReinstallPolicy::AlwaysReinstall {
            return Check::Needed;
        }
        match self.decision(facts) {
            UpgradeDecision::UpToDate { installed } if host.is_active(&self.settings.service) => {
                Check::Satisfied(self.with_identity(host, format!("{} running", installed)))
            }
            UpgradeDecision::UpToDate { .. } => {
                info!(service = %self.settings.service, "agent installed but not active");
                Check::Needed
            }
            _ => Check::Needed,
        }
    }

    fn apply(&self, facts: &Facts, host: &dyn Provision) -> Result<String> {
        let arch = require_supported_arch(facts)?;
        require_service_manager(facts)?;

        let version = &self.settings.version;
        let url = expand(&self.settings.download_url, version, &facts.architecture)
            .ok_or_else(|| ProvisionError::unsupported_arch(facts.architecture.to_string()))?;
        let binary = self.settings.binary_path.display().to_string();

        host.fetch(&url, &self.settings.binary_path)?;
        host.run(&Invocation::new("chmod").args(["0755", binary.as_str()]))?;

        let mut installer =
            Invocation::new(binary.as_str()).args(self.settings.install_args.iter().cloned());
        if let Some(ref key) = self.enroll_key {
            installer = installer.env(self.settings.enroll_key_env.as_str(), key.as_str());
        }
        host.run(&installer)?;

        write_manifest(
            host,
            &self.settings.manifest_path,
            &ComponentManifest::new(version.clone(), arch),
        )?;
        enable_and_verify(host, &self.settings.service)?;

        let detail = match self.decision(facts) {
            UpgradeDecision::Install => format!("installed {}", version),
            UpgradeDecision::Upgrade { from } => format!("upgraded {} -> {}", from, version),
            UpgradeDecision::UpToDate { .. } => format!("reinstalled {}", version),
        };
        Ok(self.with_identity(host, detail))
    }
}
