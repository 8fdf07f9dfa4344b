//! Run report and the summary renderer.
//!
//! The report keeps the declared step order (`plan`) separately from the
//! outcomes actually recorded, so a run aborted on a fatal step still
//! renders one line per declared step.

use crate::orchestrator::{RunState, RunTransitionError};
use crate::step::StepOutcome;
use crate::types::StepId;
use std::fmt::Write;

/// Fixed first line of the summary.
pub const SUMMARY_HEADER: &str = "==== Provisioning summary ====";

/// Exit status for a completed run.
pub const EXIT_COMPLETED: i32 = 0;
/// Exit status for a run aborted by a fatal step.
pub const EXIT_ABORTED: i32 = 1;
/// Exit status for a completed run in which an architecture-dispatch step
/// failed on an unsupported architecture.
pub const EXIT_UNSUPPORTED_ARCH: i32 = 2;

#[derive(Debug, Clone)]
pub struct Report {
    plan: Vec<StepId>,
    entries: Vec<(StepId, StepOutcome)>,
    state: RunState,
}

impl Report {
    /// Start a report for a run over `plan`, in declared order.
    ///
    /// # Errors
    ///
    /// - `DuplicateStep` when a step appears more than once in `plan`
    pub fn new(plan: Vec<StepId>) -> Result<Self, RunTransitionError> {
        for (idx, step) in plan.iter().enumerate() {
            if plan[..idx].contains(step) {
                return Err(RunTransitionError::DuplicateStep { step: *step });
            }
        }
        Ok(Self {
            plan,
            entries: Vec::new(),
            state: RunState::Running,
        })
    }

    /// Append the outcome of a scheduled step.
    ///
    /// # Errors
    ///
    /// - `FromTerminalState` once the run has completed or aborted
    /// - `NotScheduled` for a step outside the plan
    /// - `DuplicateOutcome` when the step already has an outcome
    pub fn record(&mut self, step: StepId, outcome: StepOutcome) -> Result<(), RunTransitionError> {
        if self.state.is_terminal() {
            return Err(RunTransitionError::FromTerminalState { from: self.state });
        }
        if !self.plan.contains(&step) {
            return Err(RunTransitionError::NotScheduled { step });
        }
        if self.outcome(step).is_some() {
            return Err(RunTransitionError::DuplicateOutcome { step });
        }
        self.entries.push((step, outcome));
        Ok(())
    }

    pub fn complete(&mut self) -> Result<(), RunTransitionError> {
        self.state = self.state.complete()?;
        Ok(())
    }

    pub fn abort(&mut self, step: StepId) -> Result<(), RunTransitionError> {
        self.state = self.state.abort(step)?;
        Ok(())
    }

    pub fn plan(&self) -> &[StepId] {
        &self.plan
    }

    /// Recorded outcomes in execution order.
    pub fn entries(&self) -> &[(StepId, StepOutcome)] {
        &self.entries
    }

    pub fn outcome(&self, step: StepId) -> Option<&StepOutcome> {
        self.entries
            .iter()
            .find(|(id, _)| *id == step)
            .map(|(_, outcome)| outcome)
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    /// Process exit status for this report.
    pub fn exit_code(&self) -> i32 {
        match self.state {
            RunState::Completed => {
                let arch_failure = self.entries.iter().any(|(_, outcome)| {
                    outcome
                        .error()
                        .is_some_and(|e| e.is_unsupported_architecture())
                });
                if arch_failure {
                    EXIT_UNSUPPORTED_ARCH
                } else {
                    EXIT_COMPLETED
                }
            }
            RunState::AbortedOnFatal { .. } | RunState::Running => EXIT_ABORTED,
        }
    }
}

/// Render the summary: header, one line per declared step, result line.
pub fn render(report: &Report) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "{}", SUMMARY_HEADER);

    for step in report.plan() {
        match report.outcome(*step) {
            Some(outcome) => {
                let _ = writeln!(out, "{}: {}", step.label(), outcome);
            }
            None => {
                let _ = writeln!(out, "{}: not attempted (run aborted)", step.label());
            }
        }
    }

    let result = match report.state() {
        RunState::Completed => "completed".to_string(),
        RunState::AbortedOnFatal { step } => format!("aborted at {}", step),
        RunState::Running => "incomplete".to_string(),
    };
    let _ = writeln!(out, "Result: {}", result);
    out
}
