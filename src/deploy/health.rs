// ABOUTME: The CheckHealthy step and the per-cycle health report it builds.
// ABOUTME: Polls every registered endpoint until converged, halted, or out of time.

use async_trait::async_trait;
use futures::future::join_all;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

use crate::cloud::{FleetApi, HealthState, InstanceHealthApi, TargetHealthApi};
use crate::machine::{StepTask, TaskOutcome};

use super::Rollout;
use super::error::DeployError;

/// Healthy-member count for one load-balancing endpoint, against the count
/// the release expects there.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct EndpointHealth {
    pub healthy: usize,
    pub expected: usize,
}

/// One polling cycle's aggregated view across all endpoints.
///
/// Transient: rebuilt from scratch every cycle, never carried between polls.
#[derive(Debug, Clone, Default)]
pub struct HealthReport {
    endpoints: BTreeMap<String, EndpointHealth>,
}

impl HealthReport {
    pub fn insert(&mut self, endpoint: String, health: EndpointHealth) {
        self.endpoints.insert(endpoint, health);
    }

    pub fn endpoints(&self) -> &BTreeMap<String, EndpointHealth> {
        &self.endpoints
    }

    /// Every endpoint reports at least its expected healthy count.
    pub fn converged(&self) -> bool {
        self.endpoints.values().all(|h| h.healthy >= h.expected)
    }

    pub fn to_value(&self) -> serde_json::Value {
        serde_json::to_value(&self.endpoints).unwrap_or(serde_json::Value::Null)
    }
}

/// The CheckHealthy step.
///
/// Each cycle: re-fetch fleet state (halting on terminating instances), query
/// every endpoint, then decide whether the rollout has timed out, converged,
/// or needs another poll. A failed
/// or empty health query counts as "not yet healthy", never as a hard error;
/// flakiness on the way up is normal.
pub(crate) struct CheckHealthyStep {
    pub fleet: Arc<dyn FleetApi>,
    pub instance_health: Arc<dyn InstanceHealthApi>,
    pub target_health: Arc<dyn TargetHealthApi>,
}

#[async_trait]
impl StepTask<Rollout, DeployError> for CheckHealthyStep {
    async fn run(&self, ctx: &mut Rollout) -> Result<TaskOutcome, DeployError> {
        let release = ctx.release()?.clone();

        // Fresh fleet read every cycle. An instance draining out from under
        // us means a conflicting deployment or manual intervention; neither
        // is safe to poll through.
        let groups = self
            .fleet
            .describe_groups(&release.project_name, &release.config_name)
            .await?;
        let terminating: Vec<String> = groups
            .iter()
            .flat_map(|g| g.terminating_instances())
            .map(|i| i.id.to_string())
            .collect();
        if !terminating.is_empty() {
            return Err(DeployError::Halt(format!(
                "instances terminating during rollout: {}",
                terminating.join(", ")
            )));
        }

        let mut lb_queries = Vec::new();
        let mut tg_queries = Vec::new();
        for spec in release.services.values() {
            let expected = spec.desired_capacity as usize;

            for lb in &spec.load_balancers {
                let api = Arc::clone(&self.instance_health);
                let name = lb.clone();
                lb_queries.push(async move {
                    let healthy = match api.describe_instance_health(&name).await {
                        Ok(members) => members
                            .iter()
                            .filter(|m| m.state == HealthState::Healthy)
                            .count(),
                        Err(e) => {
                            tracing::debug!(endpoint = %name, error = %e, "instance health query failed");
                            0
                        }
                    };
                    (name, EndpointHealth { healthy, expected })
                });
            }

            for tg in &spec.target_groups {
                let api = Arc::clone(&self.target_health);
                let name = tg.clone();
                tg_queries.push(async move {
                    let healthy = match api.describe_target_health(&name).await {
                        Ok(members) => members
                            .iter()
                            .filter(|m| m.state == HealthState::Healthy)
                            .count(),
                        Err(e) => {
                            tracing::debug!(endpoint = %name, error = %e, "target health query failed");
                            0
                        }
                    };
                    (name, EndpointHealth { healthy, expected })
                });
            }
        }

        let (lb_results, tg_results) = futures::join!(join_all(lb_queries), join_all(tg_queries));
        let mut report = HealthReport::default();
        for (name, health) in lb_results.into_iter().chain(tg_results) {
            report.insert(name, health);
        }

        // Deadline check comes after the poll: a result that arrives past the
        // deadline is discarded even if it reports healthy.
        let deadline = ctx
            .deadline
            .ok_or_else(|| DeployError::internal("deadline not set before health polling"))?;
        if Instant::now() >= deadline {
            ctx.health = Some(report);
            return Err(DeployError::Timeout(format!(
                "health checks did not converge within {}s",
                release.timeout.unwrap_or_default()
            )));
        }

        let converged = report.converged();
        ctx.health = Some(report);
        if converged {
            tracing::info!(release = %release.release_ref(), "all endpoints report healthy");
            Ok(TaskOutcome::Advance)
        } else {
            tracing::debug!(release = %release.release_ref(), "not yet healthy; polling again");
            Ok(TaskOutcome::Repeat)
        }
    }
}
