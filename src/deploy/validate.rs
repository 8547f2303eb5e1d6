// ABOUTME: The Validate and ValidateResources steps plus the resource snapshot.
// ABOUTME: Decode strictly, verify the bootstrap digest, confirm the environment fits.

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use std::sync::Arc;

use crate::cloud::{FleetApi, FleetGroup, ObjectStore, StoreError};
use crate::machine::{StepTask, TaskOutcome};
use crate::release::Release;
use crate::types::GroupId;

use super::Rollout;
use super::error::DeployError;

/// The validator's view of the target environment's existing fleet groups.
///
/// Captured once by ValidateResources and kept for rollback (prior desired
/// capacities). The health poller re-fetches fleet state every cycle instead
/// of reading this; freshness requirements differ.
#[derive(Debug)]
pub struct ResourceSnapshot {
    groups: Vec<FleetGroup>,
}

impl ResourceSnapshot {
    pub fn new(groups: Vec<FleetGroup>) -> Self {
        Self { groups }
    }

    pub fn groups(&self) -> &[FleetGroup] {
        &self.groups
    }

    pub fn group(&self, id: &GroupId) -> Option<&FleetGroup> {
        self.groups.iter().find(|g| &g.id == id)
    }

    /// The desired capacity a group had before this deployment touched it.
    pub fn prior_capacity(&self, id: &GroupId) -> Option<u32> {
        self.group(id).map(|g| g.desired_capacity)
    }
}

/// The Validate step: turn the raw input into a checked, defaulted release.
///
/// Everything here fails without side effects: no lock exists yet, nothing
/// has been mutated, so errors route straight to the clean failure terminal.
pub(crate) struct ValidateStep {
    pub store: Arc<dyn ObjectStore>,
}

#[async_trait]
impl StepTask<Rollout, DeployError> for ValidateStep {
    async fn run(&self, ctx: &mut Rollout) -> Result<TaskOutcome, DeployError> {
        let mut release: Release = serde_json::from_value(ctx.input.clone())
            .map_err(|e| DeployError::BadInput(e.to_string()))?;

        release.set_defaults();
        release
            .validate()
            .map_err(|e| DeployError::BadInput(e.to_string()))?;

        // The declared digest must match the payload actually in the store;
        // instances will boot from that payload, not from the descriptor.
        let payload = match self.store.get(&release.user_data_path()).await {
            Ok(bytes) => bytes,
            Err(StoreError::NotFound(path)) => {
                return Err(DeployError::BadInput(format!(
                    "bootstrap payload missing at {path}"
                )));
            }
            Err(e) => return Err(DeployError::transient(e)),
        };

        let computed = format!("{:x}", Sha256::digest(&payload));
        if computed != release.user_data_sha256 {
            return Err(DeployError::BadInput(format!(
                "user-data digest mismatch: declared {}, computed {}",
                release.user_data_sha256, computed
            )));
        }

        tracing::info!(release = %release.release_ref(), "release validated");
        ctx.release = Some(release);
        Ok(TaskOutcome::Advance)
    }
}

/// The ValidateResources step: the environment must fit the release.
pub(crate) struct ValidateResourcesStep {
    pub fleet: Arc<dyn FleetApi>,
}

#[async_trait]
impl StepTask<Rollout, DeployError> for ValidateResourcesStep {
    async fn run(&self, ctx: &mut Rollout) -> Result<TaskOutcome, DeployError> {
        let release = ctx.release()?.clone();

        let groups = self
            .fleet
            .describe_groups(&release.project_name, &release.config_name)
            .await?;
        let snapshot = ResourceSnapshot::new(groups);

        for (service, spec) in &release.services {
            if spec.desired_capacity > ctx.tuning.max_capacity {
                return Err(DeployError::Halt(format!(
                    "service '{}' requests desired_capacity {} above the configured cap of {}",
                    service, spec.desired_capacity, ctx.tuning.max_capacity
                )));
            }

            let id = release.group_id(service);
            if snapshot.group(&id).is_none() && !release.create_missing_groups {
                return Err(DeployError::Halt(format!(
                    "fleet group {id} does not exist and create_missing_groups is not set"
                )));
            }
        }

        tracing::debug!(
            groups = snapshot.groups().len(),
            "target environment resources validated"
        );
        ctx.snapshot = Some(snapshot);
        Ok(TaskOutcome::Advance)
    }
}
