// ABOUTME: The Deploy step: issue the fleet mutation and start the clock.
// ABOUTME: Accept-only; instance materialization is the health poller's concern.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::cloud::{FleetApi, GroupSpec};
use crate::machine::{StepTask, TaskOutcome};

use super::Rollout;
use super::error::DeployError;

pub(crate) struct DeployStep {
    pub fleet: Arc<dyn FleetApi>,
}

#[async_trait]
impl StepTask<Rollout, DeployError> for DeployStep {
    async fn run(&self, ctx: &mut Rollout) -> Result<TaskOutcome, DeployError> {
        let release = ctx.release()?.clone();

        // The deadline runs from here. A non-positive budget can never
        // converge, so it fails before the fleet is touched; callers use that
        // deliberately to exercise the failure path quickly.
        let timeout = release.timeout.unwrap_or_default();
        if timeout <= 0 {
            return Err(DeployError::Timeout(format!(
                "release timeout is {timeout}s; health can never be verified"
            )));
        }
        ctx.deadline = Some(Instant::now() + Duration::from_secs(timeout as u64));

        for (service, spec) in &release.services {
            let group_spec = GroupSpec {
                name: release.group_id(service),
                service: service.clone(),
                desired_capacity: spec.desired_capacity,
                subnets: release.subnets.iter().cloned().collect(),
                artifact: release.artifact.clone(),
                user_data_sha256: release.user_data_sha256.clone(),
                load_balancers: spec.load_balancers.clone(),
                target_groups: spec.target_groups.clone(),
            };

            self.fleet.configure_group(&group_spec).await?;
            ctx.fleet_touched = true;
            tracing::info!(
                group = %group_spec.name,
                desired = group_spec.desired_capacity,
                artifact = %group_spec.artifact,
                "fleet mutation accepted"
            );
        }

        Ok(TaskOutcome::Advance)
    }
}
