//! Run sequencing
//!
//! Probes the host once, derives the skip-set, then drives each declared
//! step through `run_step` strictly in order, collecting outcomes into a
//! `Report`.
//!
//! # Run State Flow
//!
//! ```text
//! Running ──► Completed
//!    │
//!    └──────► AbortedOnFatal { step }
//! ```
//!
//! Both targets are terminal. Per step the flow is
//! `Pending -> Skipped | AlreadySatisfied | Succeeded | Failed`, also terminal;
//! a step after a fatal failure stays pending and is absent from the report.

use crate::executor::{run_step, ExecutionMode};
use crate::host::Provision;
use crate::probe::{EnvironmentProbe, Facts};
use crate::prompt::Prompter;
use crate::report::Report;
use crate::step::{Step, StepOutcome};
use crate::types::StepId;
use std::fmt;
use std::time::Duration;
use thiserror::Error;
use tracing::{error, info, warn};

// ============================================================================
// Run State Machine
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Running,
    Completed,
    /// A fatal-policy step failed; no later step was attempted
    AbortedOnFatal { step: StepId },
}

impl RunState {
    pub const fn is_terminal(self) -> bool {
        !matches!(self, Self::Running)
    }

    pub fn complete(self) -> Result<Self, RunTransitionError> {
        match self {
            Self::Running => Ok(Self::Completed),
            from => Err(RunTransitionError::FromTerminalState { from }),
        }
    }

    pub fn abort(self, step: StepId) -> Result<Self, RunTransitionError> {
        match self {
            Self::Running => Ok(Self::AbortedOnFatal { step }),
            from => Err(RunTransitionError::FromTerminalState { from }),
        }
    }
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Running => write!(f, "running"),
            Self::Completed => write!(f, "completed"),
            Self::AbortedOnFatal { step } => write!(f, "aborted at {}", step),
        }
    }
}

/// Invalid run or report transitions.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RunTransitionError {
    #[error("Cannot transition from terminal run state ({from})")]
    FromTerminalState { from: RunState },

    #[error("Step {step} already has a recorded outcome")]
    DuplicateOutcome { step: StepId },

    #[error("Step {step} is not part of this run")]
    NotScheduled { step: StepId },

    #[error("Step {step} is scheduled more than once")]
    DuplicateStep { step: StepId },
}

// ============================================================================
// Skip-set
// ============================================================================

/// Reason a step is excluded on this host before any prompt or check runs.
pub fn skip_reason(step: StepId, facts: &Facts) -> Option<String> {
    if step.is_guest_only() && facts.is_specialized_host {
        return Some("specialized hypervisor host".to_string());
    }
    if step.needs_hardware() && facts.is_containerized {
        return Some("containerized host".to_string());
    }
    None
}

// ============================================================================
// Orchestrator
// ============================================================================

pub struct Orchestrator<'a> {
    host: &'a dyn Provision,
    prompter: &'a dyn Prompter,
    prompt_timeout: Duration,
    mode: ExecutionMode,
}

impl<'a> Orchestrator<'a> {
    pub fn new(host: &'a dyn Provision, prompter: &'a dyn Prompter) -> Self {
        Self {
            host,
            prompter,
            prompt_timeout: Duration::from_secs(30),
            mode: ExecutionMode::Apply,
        }
    }

    pub fn with_prompt_timeout(mut self, timeout: Duration) -> Self {
        self.prompt_timeout = timeout;
        self
    }

    pub fn with_mode(mut self, mode: ExecutionMode) -> Self {
        self.mode = mode;
        self
    }

    /// Probe the host once, then run `steps`.
    pub fn run(
        &self,
        probe: &EnvironmentProbe<'_>,
        steps: Vec<Box<dyn Step>>,
    ) -> Result<Report, RunTransitionError> {
        let facts = probe.probe();
        self.run_with_facts(&facts, steps)
    }

    /// Run `steps` in declared order against already-captured facts.
    ///
    /// A plan naming the same step twice is refused before anything runs.
    pub fn run_with_facts(
        &self,
        facts: &Facts,
        mut steps: Vec<Box<dyn Step>>,
    ) -> Result<Report, RunTransitionError> {
        let mut report = Report::new(steps.iter().map(|s| s.id()).collect())?;
        info!(steps = steps.len(), mode = ?self.mode, "provisioning run started");

        for step in steps.iter_mut() {
            let id = step.id();

            let outcome = match skip_reason(id, facts) {
                Some(reason) => {
                    info!(step = %id, %reason, "excluded by skip-set");
                    StepOutcome::Skipped(reason)
                }
                None => {
                    step.gather(facts, self.prompter, self.prompt_timeout);
                    run_step(&**step, facts, self.host, self.mode)
                }
            };

            let fatal = outcome.is_fatal();
            info!(step = %id, outcome = outcome.kind(), "step finished");
            if let Err(e) = report.record(id, outcome) {
                error!(step = %id, error = %e, "outcome not recorded");
            }

            if fatal {
                warn!(step = %id, "fatal failure, remaining steps not attempted");
                if let Err(e) = report.abort(id) {
                    error!(error = %e, "run state not updated");
                }
                return Ok(report);
            }
        }

        if let Err(e) = report.complete() {
            error!(error = %e, "run state not updated");
        }
        info!(state = %report.state(), "provisioning run finished");
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::{Inspect, SystemHost};
    use crate::prompt::ScriptedPrompter;
    use crate::step::Check;
    use crate::types::FailurePolicy;
    use std::cell::Cell;
    use std::rc::Rc;

    /// Counts how often its check and action run.
    struct CountingStep {
        id: StepId,
        calls: Rc<Cell<usize>>,
    }

    impl Step for CountingStep {
        fn id(&self) -> StepId {
            self.id
        }

        fn policy(&self) -> FailurePolicy {
            FailurePolicy::Advisory
        }

        fn check(&self, _facts: &Facts, _host: &dyn Inspect) -> Check {
            self.calls.set(self.calls.get() + 1);
            Check::Needed
        }

        fn apply(&self, _facts: &Facts, _host: &dyn Provision) -> crate::error::Result<String> {
            self.calls.set(self.calls.get() + 1);
            Ok("done".to_string())
        }
    }

    fn counting(ids: &[StepId], calls: &Rc<Cell<usize>>) -> Vec<Box<dyn Step>> {
        ids.iter()
            .map(|&id| {
                Box::new(CountingStep {
                    id,
                    calls: Rc::clone(calls),
                }) as Box<dyn Step>
            })
            .collect()
    }

    #[test]
    fn test_duplicate_step_is_refused_before_running() {
        let host = SystemHost::default();
        let prompter = ScriptedPrompter::new();
        let orchestrator = Orchestrator::new(&host, &prompter);
        let calls = Rc::new(Cell::new(0));

        let result = orchestrator.run_with_facts(
            &Facts::default(),
            counting(&[StepId::Timezone, StepId::Agent, StepId::Timezone], &calls),
        );
        assert_eq!(
            result.err(),
            Some(RunTransitionError::DuplicateStep { step: StepId::Timezone })
        );
        assert_eq!(calls.get(), 0);

        let plan = counting(&[StepId::Timezone, StepId::Agent], &calls);
        let report = orchestrator
            .run_with_facts(&Facts::default(), plan)
            .expect("unique plan");
        assert_eq!(report.entries().len(), 2);
        assert_eq!(report.state(), RunState::Completed);
        assert_eq!(calls.get(), 4);
    }

    #[test]
    fn test_run_state_transitions() {
        assert_eq!(RunState::Running.complete(), Ok(RunState::Completed));
        assert_eq!(
            RunState::Running.abort(StepId::Agent),
            Ok(RunState::AbortedOnFatal { step: StepId::Agent })
        );
        assert!(RunState::Completed.abort(StepId::Agent).is_err());
        assert!(RunState::AbortedOnFatal { step: StepId::Agent }.complete().is_err());
        assert!(!RunState::Running.is_terminal());
    }

    #[test]
    fn test_skip_set_on_specialized_host() {
        let facts = Facts {
            is_specialized_host: true,
            ..Facts::default()
        };
        assert!(skip_reason(StepId::Media, &facts).is_some());
        assert!(skip_reason(StepId::UsbMonitor, &facts).is_some());
        assert_eq!(skip_reason(StepId::Agent, &facts), None);
        assert_eq!(skip_reason(StepId::Timezone, &facts), None);
        assert_eq!(skip_reason(StepId::Overlay, &facts), None);
    }

    #[test]
    fn test_skip_set_in_container() {
        let facts = Facts {
            is_containerized: true,
            ..Facts::default()
        };
        assert_eq!(
            skip_reason(StepId::UsbMonitor, &facts).as_deref(),
            Some("containerized host")
        );
        assert_eq!(skip_reason(StepId::Media, &facts), None);
    }
}
