//! Error handling module for hostprep
//!
//! Only the action phase of a step can fail. Probes, preconditions and
//! idempotency checks never return errors; they degrade to documented
//! defaults instead (see `probe::Degradation`).
//!
//! `ProvisionError` is `Clone` so a failure can be stored inside an
//! append-only `StepOutcome` and rendered later by the summary.

use std::fmt;
use thiserror::Error;

/// Why the host cannot support a step's action.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnvironmentGap {
    /// Raw machine string that normalizes to neither amd64 nor arm64
    Architecture(String),
    /// No init/service-management facility was detected
    NoServiceManager,
    /// Running inside a container where the action makes no sense
    Containerized,
}

impl fmt::Display for EnvironmentGap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Architecture(raw) => write!(f, "unsupported architecture '{}'", raw),
            Self::NoServiceManager => write!(f, "no service manager available"),
            Self::Containerized => write!(f, "not supported inside a container"),
        }
    }
}

/// Error raised by the action phase of a provisioning step.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProvisionError {
    /// The action ran but did not reach the desired state
    #[error("action failed: {0}")]
    ActionFailed(String),

    /// The host lacks something the action requires
    #[error("unsupported environment: {0}")]
    UnsupportedEnvironment(EnvironmentGap),

    /// An external command exited unsuccessfully
    #[error("command `{command}` failed (exit code {code}): {stderr}")]
    Command {
        command: String,
        code: i32,
        stderr: String,
    },

    /// IO errors (file writes, spawning commands)
    #[error("IO error: {0}")]
    Io(String),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(String),

    /// Operator or configuration supplied a value the action cannot use
    #[error("invalid input: {0}")]
    InvalidInput(String),
}

/// Result type alias for step actions
pub type Result<T> = std::result::Result<T, ProvisionError>;

impl From<std::io::Error> for ProvisionError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

impl From<serde_json::Error> for ProvisionError {
    fn from(err: serde_json::Error) -> Self {
        Self::Json(err.to_string())
    }
}

impl ProvisionError {
    /// Create an action failure
    pub fn action(msg: impl Into<String>) -> Self {
        Self::ActionFailed(msg.into())
    }

    /// Create an invalid input error
    pub fn invalid_input(msg: impl Into<String>) -> Self {
        Self::InvalidInput(msg.into())
    }

    /// Unsupported architecture for an architecture-dispatch step
    pub fn unsupported_arch(raw: impl Into<String>) -> Self {
        Self::UnsupportedEnvironment(EnvironmentGap::Architecture(raw.into()))
    }

    /// Step needs a service manager the host does not have
    pub fn no_service_manager() -> Self {
        Self::UnsupportedEnvironment(EnvironmentGap::NoServiceManager)
    }

    /// True only for an unrecognized architecture
    pub fn is_unsupported_architecture(&self) -> bool {
        matches!(
            self,
            Self::UnsupportedEnvironment(EnvironmentGap::Architecture(_))
        )
    }
}
