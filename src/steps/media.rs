//! Optional media-server component.
//!
//! The operator is only asked when something could change:
//!
//! - not installed: pick a candidate by number, or `s` to skip (default `s`)
//! - installed but older than the newest candidate: upgrade offer, default
//!   `n` when the installed version is itself a candidate (the operator
//!   picked it on an earlier run), `y` otherwise
//! - installed at or above the newest candidate: no prompt
//!
//! Versions are never downgraded.

use crate::config::{expand, MediaSettings};
use crate::error::{ProvisionError, Result};
use crate::host::{Inspect, Provision};
use crate::manifest::{write_manifest, ComponentManifest};
use crate::probe::Facts;
use crate::prompt::Prompter;
use crate::step::{require_supported_arch, Check, Precondition, Step};
use crate::types::{Component, FailurePolicy, StepId};
use crate::version::{compare, SemanticVersion, UpgradeDecision};
use std::cmp::Ordering;
use std::time::Duration;
use tracing::{info, warn};

/// Operator decision for this run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MediaChoice {
    /// Leave the installed version in place
    Keep(SemanticVersion),
    /// Do not install; reason for the summary
    Skip(String),
    Install(SemanticVersion),
}

#[derive(Debug, Clone)]
pub struct MediaStep {
    settings: MediaSettings,
    choice: MediaChoice,
}

impl MediaStep {
    pub fn new(settings: MediaSettings) -> Self {
        Self {
            settings,
            choice: MediaChoice::Skip("no selection made".to_string()),
        }
    }

    pub fn choice(&self) -> &MediaChoice {
        &self.choice
    }

    fn selection_prompt(&self) -> String {
        let options: Vec<String> = self
            .settings
            .candidates
            .iter()
            .enumerate()
            .map(|(idx, v)| format!("{}) {}", idx + 1, v))
            .collect();
        format!(
            "Install optional media component? {}, s) skip",
            options.join(", ")
        )
    }

    /// Version to install, for the action phase.
    fn target(&self) -> Option<&SemanticVersion> {
        match &self.choice {
            MediaChoice::Install(version) => Some(version),
            MediaChoice::Keep(installed) => Some(installed),
            MediaChoice::Skip(_) => None,
        }
    }
}

/// Map a selection answer onto a candidate. `None` means skip.
pub fn parse_selection(answer: &str, candidates: &[SemanticVersion]) -> Option<SemanticVersion> {
    let answer = answer.trim();
    if answer.eq_ignore_ascii_case("s") || answer.eq_ignore_ascii_case("skip") {
        return None;
    }
    if let Ok(idx) = answer.parse::<usize>() {
        return idx.checked_sub(1).and_then(|i| candidates.get(i)).cloned();
    }
    // A literal version string is accepted if it is one of the candidates
    SemanticVersion::parse(answer)
        .ok()
        .filter(|v| candidates.contains(v))
}

fn is_yes(answer: &str) -> bool {
    matches!(answer.trim().to_ascii_lowercase().as_str(), "y" | "yes")
}

impl Step for MediaStep {
    fn id(&self) -> StepId {
        StepId::Media
    }

    fn policy(&self) -> FailurePolicy {
        FailurePolicy::Advisory
    }

    fn gather(&mut self, facts: &Facts, prompter: &dyn Prompter, timeout: Duration) {
        let Some(newest) = self.settings.newest().cloned() else {
            self.choice = MediaChoice::Skip("no candidate versions configured".to_string());
            return;
        };

        let installed = facts.installed_version(Component::Media);
        self.choice = match UpgradeDecision::decide(installed, &newest) {
            UpgradeDecision::UpToDate { installed } => MediaChoice::Keep(installed),
            UpgradeDecision::Install => {
                let answer = prompter.ask(&self.selection_prompt(), "s", timeout);
                match parse_selection(&answer, &self.settings.candidates) {
                    Some(version) => MediaChoice::Install(version),
                    None if answer.trim().eq_ignore_ascii_case("s")
                        || answer.trim().eq_ignore_ascii_case("skip") =>
                    {
                        MediaChoice::Skip("operator chose skip".to_string())
                    }
                    None => {
                        warn!(answer = %answer, "unrecognized media selection, skipping");
                        MediaChoice::Skip(format!("invalid selection '{}'", answer))
                    }
                }
            }
            UpgradeDecision::Upgrade { from } => {
                let selected_earlier = self.settings.candidates.contains(&from);
                let default = if selected_earlier { "n" } else { "y" };
                let prompt =
                    format!("Upgrade optional media component {} -> {}? (y/n)", from, newest);
                if is_yes(&prompter.ask(&prompt, default, timeout)) {
                    MediaChoice::Install(newest)
                } else if selected_earlier {
                    MediaChoice::Keep(from)
                } else {
                    MediaChoice::Skip(format!("upgrade declined, {} remains installed", from))
                }
            }
        };
        info!(choice = ?self.choice, "media component selection");
    }

    fn precondition(&self, _facts: &Facts) -> Precondition {
        match &self.choice {
            MediaChoice::Skip(reason) => Precondition::Unmet(reason.clone()),
            _ => Precondition::Met,
        }
    }

    fn check(&self, facts: &Facts, _host: &dyn Inspect) -> Check {
        let Some(installed) = facts.installed_version(Component::Media) else {
            return Check::Needed;
        };
        match self.target() {
            Some(target) if compare(installed, target) == Ordering::Less => Check::Needed,
            _ => match self.settings.newest() {
                Some(newest) if compare(installed, newest) == Ordering::Less => {
                    Check::Satisfied(format!("{} kept ({} available)", installed, newest))
                }
                _ => Check::Satisfied(format!("{} is up to date", installed)),
            },
        }
    }

    fn apply(&self, facts: &Facts, host: &dyn Provision) -> Result<String> {
        let version = self
            .target()
            .ok_or_else(|| ProvisionError::invalid_input("no media component version selected"))?;
        let arch = require_supported_arch(facts)?;
        let url = expand(&self.settings.download_url, version, &facts.architecture)
            .ok_or_else(|| ProvisionError::unsupported_arch(facts.architecture.to_string()))?;

        let file_name = url
            .rsplit('/')
            .next()
            .filter(|name| !name.is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| format!("media-{}-{}.deb", version, arch));
        let package = self.settings.download_dir.join(file_name);

        host.fetch(&url, &package)?;
        host.install(&package.display().to_string())?;
        write_manifest(
            host,
            &self.settings.manifest_path,
            &ComponentManifest::new(version.clone(), arch),
        )?;

        Ok(match facts.installed_version(Component::Media) {
            Some(old) => format!("upgraded {} -> {}", old, version),
            None => format!("installed {}", version),
        })
    }
}
