// ABOUTME: Error taxonomy for deployment executions.
// ABOUTME: One classification point decides retry-vs-route for the whole machine.

use thiserror::Error;

use crate::cloud::FleetError;
use crate::machine::StepError;

use super::lock::LockError;

/// Errors a deployment step can return.
///
/// The class names are part of the observable output contract: failure
/// payloads carry them verbatim, and operators grep for them.
#[derive(Debug, Error)]
pub enum DeployError {
    /// Malformed or unrecognized release payload, or a bootstrap payload that
    /// doesn't match its declared digest. Nothing was locked or mutated.
    #[error("invalid release input: {0}")]
    BadInput(String),

    /// Another execution holds the deployment lock for this target.
    #[error("deployment lock held: {0}")]
    LockHeld(String),

    /// The environment is in a state unsafe to proceed through automatically.
    #[error("unsafe environment: {0}")]
    Halt(String),

    /// Health never converged within the release's budget, or the budget was
    /// non-positive to begin with.
    #[error("deployment timed out: {0}")]
    Timeout(String),

    /// A flaky external call; the engine may retry within the step's budget.
    #[error("transient failure: {0}")]
    Transient(String),

    /// An execution invariant was violated. Indicates a bug, not bad input.
    #[error("internal invariant violated: {0}")]
    Internal(String),
}

impl DeployError {
    pub fn transient(cause: impl std::fmt::Display) -> Self {
        DeployError::Transient(cause.to_string())
    }

    pub fn internal(cause: impl std::fmt::Display) -> Self {
        DeployError::Internal(cause.to_string())
    }
}

impl StepError for DeployError {
    fn retryable(&self) -> bool {
        matches!(self, DeployError::Transient(_))
    }

    fn class(&self) -> &'static str {
        match self {
            DeployError::BadInput(_) => "BadInput",
            DeployError::LockHeld(_) => "LockHeld",
            DeployError::Halt(_) => "HaltError",
            DeployError::Timeout(_) => "Timeout",
            DeployError::Transient(_) => "Transient",
            DeployError::Internal(_) => "Internal",
        }
    }
}

// The fleet-error policy table: a vanished or rejected group means the
// environment changed under us (halt); throttling and connectivity retry.
impl From<FleetError> for DeployError {
    fn from(err: FleetError) -> Self {
        match err {
            FleetError::NotFound(_) | FleetError::InvalidSpec(_) => {
                DeployError::Halt(err.to_string())
            }
            FleetError::RateLimited(_) | FleetError::Unavailable(_) => {
                DeployError::Transient(err.to_string())
            }
        }
    }
}

impl From<LockError> for DeployError {
    fn from(err: LockError) -> Self {
        match err {
            LockError::Held { record } => DeployError::LockHeld(format!(
                "held by {} since {} (uuid {}, release {})",
                record.holder, record.acquired_at, record.uuid, record.release_ref
            )),
            LockError::Corrupt { path } => DeployError::LockHeld(format!(
                "unreadable lock record at {path}; treating as held by an unknown owner"
            )),
            LockError::Store { source } => DeployError::Transient(source.to_string()),
        }
    }
}
