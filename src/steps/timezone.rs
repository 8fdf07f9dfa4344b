//! Timezone step.
//!
//! Prompt default: the configured target timezone. On hosts with a service
//! manager the change goes through `timedatectl`; elsewhere (containers,
//! minimal images) `/etc/timezone` is written and `/etc/localtime` repointed.

use crate::config::ProvisionConfig;
use crate::error::{ProvisionError, Result};
use crate::host::{Inspect, Invocation, Provision};
use crate::probe::Facts;
use crate::prompt::Prompter;
use crate::step::{Check, Step};
use crate::types::{FailurePolicy, StepId};
use std::path::{Component, Path, PathBuf};
use std::time::Duration;
use tracing::info;

const TIMEZONE_FILE: &str = "/etc/timezone";
const LOCALTIME_LINK: &str = "/etc/localtime";

#[derive(Debug, Clone)]
pub struct TimezoneStep {
    target: String,
    zoneinfo_dir: PathBuf,
    chosen: String,
}

impl TimezoneStep {
    pub fn new(config: &ProvisionConfig) -> Self {
        Self {
            target: config.target_timezone.clone(),
            zoneinfo_dir: config.zoneinfo_dir.clone(),
            chosen: config.target_timezone.clone(),
        }
    }

    /// Timezone the step will converge to.
    pub fn chosen(&self) -> &str {
        &self.chosen
    }

    /// Zone file for `zone`, rejecting names that escape the zoneinfo tree.
    fn zone_file(&self, zone: &str) -> Result<PathBuf> {
        let relative = Path::new(zone);
        let well_formed = !zone.is_empty()
            && relative
                .components()
                .all(|c| matches!(c, Component::Normal(_)));
        if !well_formed {
            return Err(ProvisionError::invalid_input(format!(
                "invalid timezone name '{}'",
                zone
            )));
        }
        Ok(self.zoneinfo_dir.join(relative))
    }
}

impl Step for TimezoneStep {
    fn id(&self) -> StepId {
        StepId::Timezone
    }

    fn policy(&self) -> FailurePolicy {
        FailurePolicy::Advisory
    }

    fn gather(&mut self, _facts: &Facts, prompter: &dyn Prompter, timeout: Duration) {
        self.chosen = prompter.ask("Timezone", &self.target, timeout);
    }

    fn check(&self, facts: &Facts, _host: &dyn Inspect) -> Check {
        if facts.current_timezone == self.chosen {
            Check::Satisfied(format!("already {}", self.chosen))
        } else {
            Check::Needed
        }
    }

    fn apply(&self, facts: &Facts, host: &dyn Provision) -> Result<String> {
        let zone_file = self.zone_file(&self.chosen)?;
        if !host.exists(&zone_file) {
            return Err(ProvisionError::invalid_input(format!(
                "unknown timezone '{}'",
                self.chosen
            )));
        }

        if facts.has_service_manager && host.command_exists("timedatectl") {
            let set = Invocation::new("timedatectl").args(["set-timezone", self.chosen.as_str()]);
            host.run(&set)?;
        } else {
            info!("setting timezone through /etc/timezone and /etc/localtime");
            host.write_file(Path::new(TIMEZONE_FILE), &format!("{}\n", self.chosen), 0o644)?;
            host.symlink(&zone_file, Path::new(LOCALTIME_LINK))?;
        }

        Ok(format!("changed {} -> {}", facts.current_timezone, self.chosen))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::prompt::ScriptedPrompter;

    #[test]
    fn test_timeout_keeps_configured_target() {
        let mut step = TimezoneStep::new(&ProvisionConfig::default());
        step.gather(&Facts::default(), &ScriptedPrompter::new(), Duration::ZERO);
        assert_eq!(step.chosen(), "America/Chicago");
    }

    #[test]
    fn test_operator_answer_and_check() {
        let mut step = TimezoneStep::new(&ProvisionConfig::default());
        let prompter = ScriptedPrompter::answering([Some("Europe/Berlin")]);
        step.gather(&Facts::default(), &prompter, Duration::ZERO);
        assert_eq!(step.chosen(), "Europe/Berlin");

        let facts = Facts {
            current_timezone: "Europe/Berlin".to_string(),
            ..Facts::default()
        };
        let host = crate::host::SystemHost::default();
        assert_eq!(
            step.check(&facts, &host),
            Check::Satisfied("already Europe/Berlin".to_string())
        );
        assert_eq!(step.check(&Facts::default(), &host), Check::Needed);
    }

    #[test]
    fn test_zone_names_cannot_escape_zoneinfo() {
        let step = TimezoneStep::new(&ProvisionConfig::default());
        assert_eq!(
            step.zone_file("America/Chicago").ok(),
            Some(PathBuf::from("/usr/share/zoneinfo/America/Chicago"))
        );
        assert!(step.zone_file("../../etc/passwd").is_err());
        assert!(step.zone_file("/etc/passwd").is_err());
        assert!(step.zone_file("").is_err());
    }
}
