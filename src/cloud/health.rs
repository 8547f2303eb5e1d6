// ABOUTME: Load-balancer health query capability traits, classic and target-group style.
// ABOUTME: Both report per-member health verdicts the poller aggregates.

use async_trait::async_trait;

use crate::types::InstanceId;

/// Health of a single registered member, as the balancer reports it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthState {
    Healthy,
    Unhealthy,
    Unknown,
}

/// Per-instance health behind a classic load balancer.
#[derive(Debug, Clone)]
pub struct InstanceHealth {
    pub instance: InstanceId,
    pub state: HealthState,
}

/// Per-target health within a target group.
#[derive(Debug, Clone)]
pub struct TargetHealth {
    pub target: InstanceId,
    pub state: HealthState,
}

/// Classic load balancer instance health queries.
#[async_trait]
pub trait InstanceHealthApi: Send + Sync {
    async fn describe_instance_health(
        &self,
        load_balancer: &str,
    ) -> Result<Vec<InstanceHealth>, HealthError>;
}

/// Target-group health queries.
#[async_trait]
pub trait TargetHealthApi: Send + Sync {
    async fn describe_target_health(
        &self,
        target_group: &str,
    ) -> Result<Vec<TargetHealth>, HealthError>;
}

/// Errors from health queries.
#[derive(Debug, thiserror::Error)]
pub enum HealthError {
    #[error("health endpoint not found: {0}")]
    NotFound(String),

    #[error("health API unavailable: {0}")]
    Unavailable(String),
}
