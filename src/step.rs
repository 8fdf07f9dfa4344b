//! The provisioning step contract.
//!
//! A step is a named unit of work split into phases with different powers:
//!
//! | Phase          | Receives              | May mutate host |
//! |----------------|-----------------------|-----------------|
//! | `gather`       | facts, prompter       | no (own state only) |
//! | `precondition` | facts                 | no              |
//! | `check`        | facts, `&dyn Inspect` | no              |
//! | `apply`        | facts, `&dyn Provision` | yes           |
//!
//! Only `apply` can fail. Everything before it answers with plain values.

use crate::error::{ProvisionError, Result};
use crate::host::{Inspect, Provision};
use crate::probe::Facts;
use crate::prompt::Prompter;
use crate::types::{FailurePolicy, StepId};
use std::fmt;
use std::time::Duration;

/// Whether a step should run at all on this host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Precondition {
    Met,
    /// Not an error; the step is reported as skipped with this reason
    Unmet(String),
}

/// Result of a step's idempotency check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Check {
    /// Desired state already holds; detail for the summary
    Satisfied(String),
    /// The action has to run
    Needed,
}

/// Terminal result of running one step. Recorded once, never mutated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepOutcome {
    Skipped(String),
    AlreadySatisfied(String),
    Succeeded(String),
    Failed {
        error: ProvisionError,
        policy: FailurePolicy,
    },
}

impl StepOutcome {
    /// Short name used in log lines.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Skipped(_) => "skipped",
            Self::AlreadySatisfied(_) => "already-satisfied",
            Self::Succeeded(_) => "succeeded",
            Self::Failed { .. } => "failed",
        }
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, Self::Failed { .. })
    }

    /// A failure that must abort the run.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Failed { policy, .. } if policy.is_fatal())
    }

    pub fn error(&self) -> Option<&ProvisionError> {
        match self {
            Self::Failed { error, .. } => Some(error),
            _ => None,
        }
    }
}

/// Summary-line rendering of the outcome detail.
impl fmt::Display for StepOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Skipped(reason) => write!(f, "skipped ({})", reason),
            Self::AlreadySatisfied(detail) | Self::Succeeded(detail) => write!(f, "{}", detail),
            Self::Failed { error, .. } => write!(f, "FAILED: {}", error),
        }
    }
}

/// A provisioning step.
pub trait Step {
    fn id(&self) -> StepId;

    fn policy(&self) -> FailurePolicy;

    /// Collect operator input. Called once, before `precondition`, and only
    /// for steps that survived the skip-set.
    fn gather(&mut self, _facts: &Facts, _prompter: &dyn Prompter, _timeout: Duration) {}

    fn precondition(&self, _facts: &Facts) -> Precondition {
        Precondition::Met
    }

    /// Read-only observation of whether the desired state already holds.
    fn check(&self, facts: &Facts, host: &dyn Inspect) -> Check;

    /// Perform the change. Returns the summary detail on success.
    fn apply(&self, facts: &Facts, host: &dyn Provision) -> Result<String>;
}

// ============================================================================
// Shared action guards
// ============================================================================

/// Download architecture name, or `UnsupportedEnvironment(Architecture)`.
pub fn require_supported_arch(facts: &Facts) -> Result<&'static str> {
    facts
        .architecture
        .dispatch_name()
        .ok_or_else(|| match &facts.architecture {
            crate::types::Architecture::Unsupported(raw) => ProvisionError::unsupported_arch(raw),
            other => ProvisionError::unsupported_arch(other.to_string()),
        })
}

pub fn require_service_manager(facts: &Facts) -> Result<()> {
    if facts.has_service_manager {
        Ok(())
    } else {
        Err(ProvisionError::no_service_manager())
    }
}

/// Enable and start `service`, then confirm it is active.
pub fn enable_and_verify(host: &dyn Provision, service: &str) -> Result<()> {
    host.enable(service)?;
    host.start(service)?;
    if host.is_active(service) {
        Ok(())
    } else {
        Err(ProvisionError::action(format!(
            "service {} is not active after start",
            service
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Architecture;

    #[test]
    fn test_outcome_rendering() {
        assert_eq!(
            StepOutcome::Skipped("specialized hypervisor host".into()).to_string(),
            "skipped (specialized hypervisor host)"
        );
        assert_eq!(
            StepOutcome::AlreadySatisfied("already UTC".into()).to_string(),
            "already UTC"
        );
        let failed = StepOutcome::Failed {
            error: ProvisionError::action("boom"),
            policy: FailurePolicy::Advisory,
        };
        assert_eq!(failed.to_string(), "FAILED: action failed: boom");
        assert!(failed.is_failed());
        assert!(!failed.is_fatal());
    }

    #[test]
    fn test_fatal_outcome() {
        let outcome = StepOutcome::Failed {
            error: ProvisionError::unsupported_arch("mips"),
            policy: FailurePolicy::Fatal,
        };
        assert!(outcome.is_fatal());
        assert_eq!(outcome.kind(), "failed");
        assert!(outcome.error().is_some_and(ProvisionError::is_unsupported_architecture));
    }

    #[test]
    fn test_require_supported_arch() {
        let mut facts = Facts::default();
        assert_eq!(require_supported_arch(&facts), Ok("amd64"));

        facts.architecture = Architecture::normalize("riscv64");
        let err = require_supported_arch(&facts).expect_err("unsupported");
        assert_eq!(err, ProvisionError::unsupported_arch("riscv64"));
    }

    #[test]
    fn test_require_service_manager() {
        let mut facts = Facts::default();
        assert!(require_service_manager(&facts).is_ok());
        facts.has_service_manager = false;
        assert_eq!(
            require_service_manager(&facts),
            Err(ProvisionError::no_service_manager())
        );
    }
}
