//! Single-step execution.
//!
//! `run_step` walks a step through precondition, idempotency check and
//! action, in that order, and turns the result into a `StepOutcome`.
//! Preconditions and checks only see an `&dyn Inspect`, so nothing touches
//! the host before the action phase.

use crate::host::Provision;
use crate::probe::Facts;
use crate::step::{Check, Precondition, Step, StepOutcome};
use tracing::{debug, error, info, warn};

/// Whether actions are invoked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExecutionMode {
    #[default]
    Apply,
    /// Evaluate preconditions and checks only; needed actions are reported
    /// as skipped
    DryRun,
}

pub fn run_step(
    step: &dyn Step,
    facts: &Facts,
    host: &dyn Provision,
    mode: ExecutionMode,
) -> StepOutcome {
    let id = step.id();

    if let Precondition::Unmet(reason) = step.precondition(facts) {
        info!(step = %id, %reason, "precondition not met, skipping");
        return StepOutcome::Skipped(reason);
    }

    if let Check::Satisfied(detail) = step.check(facts, host) {
        info!(step = %id, %detail, "already satisfied");
        return StepOutcome::AlreadySatisfied(detail);
    }

    if mode == ExecutionMode::DryRun {
        info!(step = %id, "dry run, action not invoked");
        return StepOutcome::Skipped("dry run: changes needed".to_string());
    }

    debug!(step = %id, policy = %step.policy(), "invoking action");
    match step.apply(facts, host) {
        Ok(detail) => {
            info!(step = %id, %detail, "succeeded");
            StepOutcome::Succeeded(detail)
        }
        Err(err) => {
            let policy = step.policy();
            if policy.is_fatal() {
                error!(step = %id, error = %err, "fatal step failed");
            } else {
                warn!(step = %id, error = %err, "advisory step failed, continuing");
            }
            StepOutcome::Failed { error: err, policy }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{ProvisionError, Result};
    use crate::host::{Inspect, Invocation};
    use crate::types::{FailurePolicy, StepId};
    use std::cell::Cell;
    use std::path::{Path, PathBuf};

    /// Host that answers nothing and accepts every mutation.
    struct NullHost;

    impl Inspect for NullHost {
        fn command_exists(&self, _name: &str) -> bool {
            false
        }
        fn query(&self, _program: &str, _args: &[&str]) -> Option<String> {
            None
        }
        fn read_to_string(&self, _path: &Path) -> Option<String> {
            None
        }
        fn read_link(&self, _path: &Path) -> Option<PathBuf> {
            None
        }
        fn exists(&self, _path: &Path) -> bool {
            false
        }
        fn is_active(&self, _service: &str) -> bool {
            false
        }
    }

    impl Provision for NullHost {
        fn install(&self, _package: &str) -> Result<()> {
            Ok(())
        }
        fn fetch(&self, _url: &str, _dest: &Path) -> Result<()> {
            Ok(())
        }
        fn enable(&self, _service: &str) -> Result<()> {
            Ok(())
        }
        fn start(&self, _service: &str) -> Result<()> {
            Ok(())
        }
        fn reload_units(&self) -> Result<()> {
            Ok(())
        }
        fn run(&self, _invocation: &Invocation) -> Result<String> {
            Ok(String::new())
        }
        fn write_file(&self, _path: &Path, _contents: &str, _mode: u32) -> Result<()> {
            Ok(())
        }
        fn symlink(&self, _target: &Path, _link: &Path) -> Result<()> {
            Ok(())
        }
    }

    struct ProbeStep {
        precondition: Precondition,
        check: Check,
        result: std::result::Result<String, ProvisionError>,
        policy: FailurePolicy,
        applied: Cell<u32>,
    }

    impl ProbeStep {
        fn new() -> Self {
            Self {
                precondition: Precondition::Met,
                check: Check::Needed,
                result: Ok("done".to_string()),
                policy: FailurePolicy::Advisory,
                applied: Cell::new(0),
            }
        }
    }

    impl Step for ProbeStep {
        fn id(&self) -> StepId {
            StepId::Overlay
        }
        fn policy(&self) -> FailurePolicy {
            self.policy
        }
        fn precondition(&self, _facts: &Facts) -> Precondition {
            self.precondition.clone()
        }
        fn check(&self, _facts: &Facts, _host: &dyn Inspect) -> Check {
            self.check.clone()
        }
        fn apply(&self, _facts: &Facts, _host: &dyn Provision) -> Result<String> {
            self.applied.set(self.applied.get() + 1);
            self.result.clone()
        }
    }

    fn run(step: &ProbeStep, mode: ExecutionMode) -> StepOutcome {
        run_step(step, &Facts::default(), &NullHost, mode)
    }

    #[test]
    fn test_unmet_precondition_never_applies() {
        let mut step = ProbeStep::new();
        step.precondition = Precondition::Unmet("operator chose skip".to_string());
        assert_eq!(
            run(&step, ExecutionMode::Apply),
            StepOutcome::Skipped("operator chose skip".to_string())
        );
        assert_eq!(step.applied.get(), 0);
    }

    #[test]
    fn test_satisfied_check_never_applies() {
        let mut step = ProbeStep::new();
        step.check = Check::Satisfied("already UTC".to_string());
        assert_eq!(
            run(&step, ExecutionMode::Apply),
            StepOutcome::AlreadySatisfied("already UTC".to_string())
        );
        assert_eq!(step.applied.get(), 0);
    }

    #[test]
    fn test_action_success_and_failure() {
        let step = ProbeStep::new();
        assert_eq!(
            run(&step, ExecutionMode::Apply),
            StepOutcome::Succeeded("done".to_string())
        );
        assert_eq!(step.applied.get(), 1);

        let mut step = ProbeStep::new();
        step.result = Err(ProvisionError::unsupported_arch("mips"));
        step.policy = FailurePolicy::Fatal;
        let outcome = run(&step, ExecutionMode::Apply);
        assert!(outcome.is_fatal());
        assert_eq!(outcome.error(), Some(&ProvisionError::unsupported_arch("mips")));
    }

    #[test]
    fn test_dry_run_skips_needed_action() {
        let step = ProbeStep::new();
        let outcome = run(&step, ExecutionMode::DryRun);
        assert!(matches!(outcome, StepOutcome::Skipped(ref r) if r.starts_with("dry run")));
        assert_eq!(step.applied.get(), 0);

        let mut step = ProbeStep::new();
        step.check = Check::Satisfied("ok".to_string());
        assert_eq!(
            run(&step, ExecutionMode::DryRun),
            StepOutcome::AlreadySatisfied("ok".to_string())
        );
    }
}
