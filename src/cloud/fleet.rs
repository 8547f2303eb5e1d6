// ABOUTME: Fleet management capability trait and shared fleet resource types.
// ABOUTME: Describe, configure, rescale, and delete managed instance groups.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::types::{ArtifactRef, ConfigName, GroupId, InstanceId, ProjectName};

/// Fleet group mutation and discovery operations.
#[async_trait]
pub trait FleetApi: Send + Sync {
    /// List the fleet groups belonging to a project/config pair.
    async fn describe_groups(
        &self,
        project: &ProjectName,
        config: &ConfigName,
    ) -> Result<Vec<FleetGroup>, FleetError>;

    /// Apply a launch spec and desired capacity to a group, creating it if the
    /// backend supports that. Accept-only: instances materialize later.
    async fn configure_group(&self, spec: &GroupSpec) -> Result<(), FleetError>;

    /// Rescale an existing group.
    async fn set_desired_capacity(&self, group: &GroupId, capacity: u32) -> Result<(), FleetError>;

    /// Delete a group and its instances.
    async fn delete_group(&self, group: &GroupId) -> Result<(), FleetError>;
}

/// A managed instance group as the fleet backend reports it.
#[derive(Debug, Clone)]
pub struct FleetGroup {
    pub id: GroupId,
    /// The service role this group backs (the last segment of the group name).
    pub service: String,
    pub desired_capacity: u32,
    pub instances: Vec<FleetInstance>,
    pub load_balancers: Vec<String>,
    pub target_groups: Vec<String>,
}

impl FleetGroup {
    /// Instances currently in a `Terminating` lifecycle state.
    pub fn terminating_instances(&self) -> impl Iterator<Item = &FleetInstance> {
        self.instances
            .iter()
            .filter(|i| i.lifecycle_state == LifecycleState::Terminating)
    }
}

/// A single member instance of a fleet group.
#[derive(Debug, Clone)]
pub struct FleetInstance {
    pub id: InstanceId,
    pub lifecycle_state: LifecycleState,
}

/// Lifecycle state of a fleet instance as reported by the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LifecycleState {
    Pending,
    InService,
    Standby,
    Terminating,
}

impl std::fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            LifecycleState::Pending => "Pending",
            LifecycleState::InService => "InService",
            LifecycleState::Standby => "Standby",
            LifecycleState::Terminating => "Terminating",
        };
        write!(f, "{s}")
    }
}

/// The mutation request a deployment issues per service role.
#[derive(Debug, Clone)]
pub struct GroupSpec {
    pub name: GroupId,
    pub service: String,
    pub desired_capacity: u32,
    pub subnets: Vec<String>,
    pub artifact: ArtifactRef,
    pub user_data_sha256: String,
    pub load_balancers: Vec<String>,
    pub target_groups: Vec<String>,
}

/// Errors from fleet operations.
#[derive(Debug, thiserror::Error)]
pub enum FleetError {
    #[error("fleet group not found: {0}")]
    NotFound(String),

    #[error("invalid group spec: {0}")]
    InvalidSpec(String),

    #[error("rate limited: {0}")]
    RateLimited(String),

    #[error("fleet API unavailable: {0}")]
    Unavailable(String),
}
