// ABOUTME: Best-effort cleanup steps and the lock-release steps for both terminals.
// ABOUTME: Nothing here may block the chain from reaching lock release.

use async_trait::async_trait;
use std::sync::Arc;

use crate::cloud::{FleetApi, ObjectStore};
use crate::machine::{StepTask, TaskOutcome};

use super::error::DeployError;
use super::lock::{self, Released};
use super::Rollout;

/// CleanUpFailure: revert what the fleet mutation changed, as far as the
/// snapshot allows. Strictly best-effort: every error is logged and
/// swallowed, because the one thing this step must do is hand control to
/// ReleaseLockFailure.
pub(crate) struct CleanUpFailureStep {
    pub fleet: Arc<dyn FleetApi>,
}

#[async_trait]
impl StepTask<Rollout, DeployError> for CleanUpFailureStep {
    async fn run(&self, ctx: &mut Rollout) -> Result<TaskOutcome, DeployError> {
        if !ctx.fleet_touched {
            return Ok(TaskOutcome::Advance);
        }

        let (Some(release), Some(snapshot)) = (&ctx.release, &ctx.snapshot) else {
            // Nothing known to restore from.
            return Ok(TaskOutcome::Advance);
        };

        for service in release.services.keys() {
            let id = release.group_id(service);
            let Some(prior) = snapshot.prior_capacity(&id) else {
                continue;
            };
            match self.fleet.set_desired_capacity(&id, prior).await {
                Ok(()) => {
                    tracing::info!(group = %id, prior, "restored prior desired capacity");
                }
                Err(e) => {
                    tracing::warn!(group = %id, error = %e, "failed to restore desired capacity");
                }
            }
        }

        Ok(TaskOutcome::Advance)
    }
}

/// CleanUpSuccess: prune groups of this project/config whose service role the
/// release no longer defines. Also best-effort; a leftover group is an
/// operator chore, not a failed deployment.
pub(crate) struct CleanUpSuccessStep {
    pub fleet: Arc<dyn FleetApi>,
}

#[async_trait]
impl StepTask<Rollout, DeployError> for CleanUpSuccessStep {
    async fn run(&self, ctx: &mut Rollout) -> Result<TaskOutcome, DeployError> {
        let (Some(release), Some(snapshot)) = (&ctx.release, &ctx.snapshot) else {
            return Ok(TaskOutcome::Advance);
        };

        for group in snapshot.groups() {
            if release.services.contains_key(&group.service) {
                continue;
            }
            match self.fleet.delete_group(&group.id).await {
                Ok(()) => {
                    tracing::info!(group = %group.id, "removed group for retired service role");
                }
                Err(e) => {
                    tracing::warn!(group = %group.id, error = %e, "failed to remove retired group");
                }
            }
        }

        Ok(TaskOutcome::Advance)
    }
}

/// ReleaseLockSuccess / ReleaseLockFailure: give the target back.
///
/// Runs on every path where a lock might have been acquired; a missing or
/// mismatched record is reported and ignored so the chain always terminates.
/// Store errors are surfaced as transient for the engine's retry budget, and
/// the step's failure edge points at the same terminal, so even exhaustion
/// cannot strand the execution.
pub(crate) struct ReleaseLockStep {
    pub store: Arc<dyn ObjectStore>,
}

#[async_trait]
impl StepTask<Rollout, DeployError> for ReleaseLockStep {
    async fn run(&self, ctx: &mut Rollout) -> Result<TaskOutcome, DeployError> {
        let Some(claim) = ctx.claim.take() else {
            return Ok(TaskOutcome::Advance);
        };

        match lock::release(self.store.as_ref(), &claim.path, claim.uuid).await {
            Ok(Released::Deleted) => {
                tracing::info!(path = %claim.path, "deployment lock released");
            }
            Ok(Released::NotHeld) => {
                tracing::warn!(path = %claim.path, "lock was already gone at release");
            }
            Ok(Released::OwnerMismatch { held_by }) => {
                tracing::warn!(
                    path = %claim.path,
                    ours = %claim.uuid,
                    %held_by,
                    "lock now owned by another execution; leaving it in place"
                );
            }
            Ok(Released::Unreadable) => {
                tracing::warn!(path = %claim.path, "lock record unreadable at release; leaving it in place");
            }
            Err(e) => {
                // Put the claim back so a retry attempts the release again.
                ctx.claim = Some(claim);
                return Err(DeployError::transient(e));
            }
        }

        Ok(TaskOutcome::Advance)
    }
}
