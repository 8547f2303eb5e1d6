// ABOUTME: Deployment orchestration: the step table, execution context, and public entry.
// ABOUTME: A Deployer drives one release at a time through the locked rollout machine.

mod cleanup;
mod error;
mod fleet;
mod health;
pub mod lock;
mod tuning;
mod validate;

pub use error::DeployError;
pub use health::{EndpointHealth, HealthReport};
pub use tuning::{RetryTuning, Tuning};
pub use validate::ResourceSnapshot;

use serde_json::{Map, Value};
use std::sync::Arc;
use std::time::Instant;
use uuid::Uuid;

use crate::cloud::{FleetApi, InstanceHealthApi, ObjectStore, TargetHealthApi};
use crate::machine::{DefinitionError, ExecutionFailure, StateMachine, Step, StepContext};
use crate::release::Release;

use cleanup::{CleanUpFailureStep, CleanUpSuccessStep, ReleaseLockStep};
use fleet::DeployStep;
use health::CheckHealthyStep;
use lock::LockStep;
use tuning::jittered;
use validate::{ValidateResourcesStep, ValidateStep};

/// The capability clients a deployment calls. All shared; a `Deployer` only
/// ever reads through them.
#[derive(Clone)]
pub struct Clients {
    pub store: Arc<dyn ObjectStore>,
    pub fleet: Arc<dyn FleetApi>,
    pub instance_health: Arc<dyn InstanceHealthApi>,
    pub target_health: Arc<dyn TargetHealthApi>,
}

/// Proof that this execution wrote the lock record at `path`.
#[derive(Debug, Clone)]
pub struct LockClaim {
    pub path: String,
    pub uuid: Uuid,
}

/// Per-execution state threaded through the steps.
///
/// Starts as just the raw input; Validate fills in the typed release, later
/// steps the snapshot, lock claim, deadline, and health report.
pub struct Rollout {
    pub(crate) input: Value,
    pub(crate) tuning: Tuning,
    pub(crate) release: Option<Release>,
    pub(crate) snapshot: Option<ResourceSnapshot>,
    pub(crate) claim: Option<LockClaim>,
    pub(crate) deadline: Option<Instant>,
    pub(crate) fleet_touched: bool,
    pub(crate) health: Option<HealthReport>,
}

impl Rollout {
    pub fn new(input: Value, tuning: Tuning) -> Self {
        Self {
            input,
            tuning,
            release: None,
            snapshot: None,
            claim: None,
            deadline: None,
            fleet_touched: false,
            health: None,
        }
    }

    pub(crate) fn release(&self) -> Result<&Release, DeployError> {
        self.release
            .as_ref()
            .ok_or_else(|| DeployError::internal("release not decoded yet"))
    }
}

impl StepContext for Rollout {
    fn report(&self) -> Value {
        let mut map = Map::new();
        if let Some(release) = &self.release {
            map.insert("release".to_string(), Value::String(release.release_ref()));
        }
        if let Some(health) = &self.health {
            map.insert("healthy".to_string(), health.to_value());
        }
        Value::Object(map)
    }
}

/// Drives releases through the rollout machine:
///
/// ```text
/// Validate → Lock → ValidateResources → Deploy → WaitForDeploy
///   → WaitForHealthy → CheckHealthy ─(healthy)→ CleanUpSuccess
///         ↑                │                      → ReleaseLockSuccess → Success
///         └──(not yet)─────┘
/// any failure → [CleanUpFailure →] ReleaseLockFailure → FailureClean
/// ```
///
/// Pre-lock failures skip straight to `FailureClean`; post-lock failures
/// always pass through `ReleaseLockFailure` first.
pub struct Deployer {
    machine: StateMachine<Rollout, DeployError>,
    tuning: Tuning,
}

impl Deployer {
    pub fn new(clients: Clients, tuning: Tuning) -> Result<Self, DefinitionError> {
        let machine = StateMachine::new("Validate", steps(&clients, &tuning))?;
        Ok(Self { machine, tuning })
    }

    /// Run one release (raw, not-yet-validated JSON) to a terminal state.
    pub async fn execute(&mut self, input: Value) -> Result<Map<String, Value>, ExecutionFailure> {
        self.machine
            .execute(Rollout::new(input, self.tuning.clone()))
            .await
    }

    /// The most recent execution's trace.
    pub fn execution_path(&self) -> &[String] {
        self.machine.execution_path()
    }

    /// The most recent execution's last meaningful step output (JSON).
    pub fn last_output(&self) -> &str {
        self.machine.last_output()
    }
}

fn steps(clients: &Clients, tuning: &Tuning) -> Vec<Step<Rollout, DeployError>> {
    let retry = tuning.retry.policy();

    vec![
        Step::task(
            "Validate",
            ValidateStep {
                store: Arc::clone(&clients.store),
            },
            "Lock",
            "FailureClean",
        )
        .with_retry(retry),
        Step::task(
            "Lock",
            LockStep {
                store: Arc::clone(&clients.store),
            },
            "ValidateResources",
            "FailureClean",
        )
        .with_retry(retry),
        Step::task(
            "ValidateResources",
            ValidateResourcesStep {
                fleet: Arc::clone(&clients.fleet),
            },
            "Deploy",
            "ReleaseLockFailure",
        )
        .with_retry(retry),
        Step::task(
            "Deploy",
            DeployStep {
                fleet: Arc::clone(&clients.fleet),
            },
            "WaitForDeploy",
            "ReleaseLockFailure",
        )
        .with_retry(retry),
        Step::wait(
            "WaitForDeploy",
            |ctx: &Rollout| ctx.tuning.wait_for_deploy,
            "WaitForHealthy",
        ),
        Step::wait(
            "WaitForHealthy",
            |ctx: &Rollout| jittered(ctx.tuning.poll_interval, ctx.tuning.poll_jitter),
            "CheckHealthy",
        ),
        Step::task(
            "CheckHealthy",
            CheckHealthyStep {
                fleet: Arc::clone(&clients.fleet),
                instance_health: Arc::clone(&clients.instance_health),
                target_health: Arc::clone(&clients.target_health),
            },
            "CleanUpSuccess",
            "CleanUpFailure",
        )
        .repeats_to("WaitForHealthy")
        .with_retry(retry),
        Step::task(
            "CleanUpSuccess",
            CleanUpSuccessStep {
                fleet: Arc::clone(&clients.fleet),
            },
            "ReleaseLockSuccess",
            "ReleaseLockFailure",
        ),
        Step::task(
            "ReleaseLockSuccess",
            ReleaseLockStep {
                store: Arc::clone(&clients.store),
            },
            "Success",
            "FailureClean",
        )
        .with_retry(retry),
        Step::task(
            "CleanUpFailure",
            CleanUpFailureStep {
                fleet: Arc::clone(&clients.fleet),
            },
            "ReleaseLockFailure",
            "ReleaseLockFailure",
        ),
        Step::task(
            "ReleaseLockFailure",
            ReleaseLockStep {
                store: Arc::clone(&clients.store),
            },
            "FailureClean",
            "FailureClean",
        )
        .with_retry(retry),
        Step::success("Success"),
        Step::failure("FailureClean"),
    ]
}
