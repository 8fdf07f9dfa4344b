//! hostprep library
//!
//! The provisioning decision-and-execution engine: environment probing,
//! timed prompts, version comparison, step execution with failure policies,
//! orchestration and the run summary.

pub mod cli;
pub mod config;
pub mod error;
pub mod executor;
pub mod host;
pub mod lock;
pub mod manifest;
pub mod orchestrator;
pub mod probe;
pub mod process_guard;
pub mod prompt;
pub mod report;
pub mod step;
pub mod steps;
pub mod types;
pub mod version;

// Re-export main types for convenience
pub use config::ProvisionConfig;
pub use error::{EnvironmentGap, ProvisionError};
pub use executor::{run_step, ExecutionMode};
pub use host::{Inspect, Invocation, Provision, SystemHost};
pub use orchestrator::{Orchestrator, RunState, RunTransitionError};
pub use probe::{EnvironmentProbe, Facts};
pub use process_guard::{ChildRegistry, CommandProcessGroup};
pub use prompt::{Prompter, ScriptedPrompter, TerminalPrompter};
pub use report::{render, Report};
pub use step::{Check, Precondition, Step, StepOutcome};
pub use types::{Architecture, Component, FailurePolicy, StepId};
pub use version::{compare, SemanticVersion, UpgradeDecision};
