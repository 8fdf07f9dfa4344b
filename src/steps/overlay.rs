//! Overlay network (remote access) step.
//!
//! The node counts as provisioned once the client is installed and its
//! daemon is active. Joining needs an auth key; without one the step
//! succeeds as "not joined" so a later run with a key can finish the job.

use crate::config::OverlaySettings;
use crate::error::Result;
use crate::host::{Inspect, Invocation, Provision};
use crate::probe::Facts;
use crate::prompt::Prompter;
use crate::step::{enable_and_verify, require_service_manager, Check, Step};
use crate::types::{FailurePolicy, StepId};
use std::time::Duration;
use tracing::{debug, info};

const CONNECTED: &str = "installed, connected";
const NOT_JOINED: &str = "installed, not joined (no auth key)";

#[derive(Debug, Clone)]
pub struct OverlayStep {
    settings: OverlaySettings,
    auth_key: Option<String>,
}

impl OverlayStep {
    pub fn new(settings: OverlaySettings) -> Self {
        Self {
            settings,
            auth_key: None,
        }
    }

    fn is_connected(&self, host: &dyn Inspect) -> bool {
        let Some((program, args)) = self.settings.status_command.split_first() else {
            return false;
        };
        let args: Vec<&str> = args.iter().map(String::as_str).collect();
        host.query(program, &args).is_some()
    }
}

impl Step for OverlayStep {
    fn id(&self) -> StepId {
        StepId::Overlay
    }

    fn policy(&self) -> FailurePolicy {
        FailurePolicy::Advisory
    }

    fn gather(&mut self, _facts: &Facts, prompter: &dyn Prompter, timeout: Duration) {
        let key = prompter.ask("Overlay network auth key", "", timeout);
        self.auth_key = (!key.is_empty()).then_some(key);
        debug!(provided = self.auth_key.is_some(), "overlay auth key");
    }

    fn check(&self, _facts: &Facts, host: &dyn Inspect) -> Check {
        if !host.command_exists(&self.settings.binary) || !host.is_active(&self.settings.service) {
            return Check::Needed;
        }
        if self.is_connected(host) {
            Check::Satisfied(CONNECTED.to_string())
        } else if self.auth_key.is_none() {
            Check::Satisfied(NOT_JOINED.to_string())
        } else {
            Check::Needed
        }
    }

    fn apply(&self, facts: &Facts, host: &dyn Provision) -> Result<String> {
        require_service_manager(facts)?;

        if !host.command_exists(&self.settings.binary) {
            host.install(&self.settings.package)?;
        }
        enable_and_verify(host, &self.settings.service)?;

        let Some(ref key) = self.auth_key else {
            info!("no overlay auth key given, leaving node unjoined");
            return Ok(NOT_JOINED.to_string());
        };
        if self.is_connected(host) {
            return Ok(CONNECTED.to_string());
        }

        let join = Invocation::new("sh")
            .args(["-c", self.settings.join_script.as_str()])
            .env(self.settings.auth_key_env.as_str(), key.as_str());
        host.run(&join)?;
        Ok(CONNECTED.to_string())
    }
}
