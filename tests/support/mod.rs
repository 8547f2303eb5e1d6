// ABOUTME: Shared test support: in-memory cloud fakes and release builders.
// ABOUTME: Seeds a small healthy world a deployment can run against.

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::Utc;
use nonempty::NonEmpty;
use parking_lot::Mutex;
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use stolos::cloud::{
    FleetApi, FleetError, FleetGroup, FleetInstance, GroupSpec, HealthError, InstanceHealth,
    InstanceHealthApi, LifecycleState, MemoryStore, ObjectStore, StoreError, TargetHealth,
    TargetHealthApi,
};
use stolos::deploy::{Clients, Deployer, RetryTuning, Tuning};
use stolos::machine::ran;
use stolos::release::{Release, ServiceSpec};
use stolos::types::{ArtifactRef, ConfigName, GroupId, InstanceId, ProjectName};

/// The bootstrap payload every mock release declares the digest of.
pub const USER_DATA: &[u8] = b"#!/bin/sh\nexec /srv/app/boot\n";

pub fn user_data_digest() -> String {
    format!("{:x}", Sha256::digest(USER_DATA))
}

/// A fully-specified release: two instances of one web role, both endpoint
/// flavors registered.
pub fn mock_release() -> Release {
    let mut services = BTreeMap::new();
    services.insert(
        "web".to_string(),
        ServiceSpec {
            desired_capacity: 2,
            load_balancers: vec!["web-elb".to_string()],
            target_groups: vec!["web-tg".to_string()],
        },
    );

    Release {
        project_name: ProjectName::new("app").unwrap(),
        config_name: ConfigName::new("staging").unwrap(),
        release_id: "r-100".to_string(),
        created_at: Some(Utc::now()),
        artifact: ArtifactRef::parse("app-image:1.4.2").unwrap(),
        user_data_sha256: user_data_digest(),
        timeout: Some(30),
        subnets: NonEmpty::from_vec(vec!["subnet-1a".to_string(), "subnet-1b".to_string()])
            .unwrap(),
        services,
        create_missing_groups: false,
    }
}

/// A release with every optional field left unset.
pub fn mock_minimal_release() -> Release {
    let mut services = BTreeMap::new();
    services.insert(
        "web".to_string(),
        ServiceSpec {
            desired_capacity: 1,
            load_balancers: vec!["web-elb".to_string()],
            target_groups: vec![],
        },
    );

    Release {
        project_name: ProjectName::new("app").unwrap(),
        config_name: ConfigName::new("staging").unwrap(),
        release_id: "r-101".to_string(),
        created_at: None,
        artifact: ArtifactRef::parse("app-image").unwrap(),
        user_data_sha256: user_data_digest(),
        timeout: None,
        subnets: NonEmpty::from_vec(vec!["subnet-1a".to_string()]).unwrap(),
        services,
        create_missing_groups: false,
    }
}

pub fn to_input(release: &Release) -> serde_json::Value {
    serde_json::to_value(release).expect("release serializes")
}

/// Tuning with real but tiny delays so trace tests finish in milliseconds.
pub fn fast_tuning() -> Tuning {
    Tuning {
        wait_for_deploy: std::time::Duration::from_millis(1),
        poll_interval: std::time::Duration::from_millis(5),
        poll_jitter: std::time::Duration::ZERO,
        max_capacity: 100,
        retry: RetryTuning {
            max_attempts: 3,
            base_delay: std::time::Duration::from_millis(1),
            max_delay: std::time::Duration::from_millis(5),
        },
    }
}

/// In-memory fleet backend: a mutable set of groups plus a record of every
/// mutation a deployment issued.
#[derive(Default)]
pub struct StaticFleet {
    pub groups: Mutex<Vec<FleetGroup>>,
    pub configured: Mutex<Vec<GroupSpec>>,
    pub capacity_updates: Mutex<Vec<(GroupId, u32)>>,
    pub deleted: Mutex<Vec<GroupId>>,
}

impl StaticFleet {
    pub fn add_group(&self, group: FleetGroup) {
        self.groups.lock().push(group);
    }
}

#[async_trait]
impl FleetApi for StaticFleet {
    async fn describe_groups(
        &self,
        project: &ProjectName,
        config: &ConfigName,
    ) -> Result<Vec<FleetGroup>, FleetError> {
        let prefix = format!("{project}-{config}-");
        Ok(self
            .groups
            .lock()
            .iter()
            .filter(|g| g.id.as_str().starts_with(&prefix))
            .cloned()
            .collect())
    }

    async fn configure_group(&self, spec: &GroupSpec) -> Result<(), FleetError> {
        self.configured.lock().push(spec.clone());
        Ok(())
    }

    async fn set_desired_capacity(&self, group: &GroupId, capacity: u32) -> Result<(), FleetError> {
        self.capacity_updates.lock().push((group.clone(), capacity));
        Ok(())
    }

    async fn delete_group(&self, group: &GroupId) -> Result<(), FleetError> {
        self.deleted.lock().push(group.clone());
        self.groups.lock().retain(|g| &g.id != group);
        Ok(())
    }
}

/// Scripted health responses keyed by endpoint name. Unknown endpoints report
/// zero members, which the poller treats as not yet healthy.
#[derive(Default)]
pub struct ScriptedHealth {
    pub instance: Mutex<HashMap<String, Vec<InstanceHealth>>>,
    pub target: Mutex<HashMap<String, Vec<TargetHealth>>>,
    /// Per-endpoint count of polls that report no members before the scripted
    /// response kicks in. Models instances coming up slowly.
    pub warmup_polls: Mutex<HashMap<String, u32>>,
    /// Per-endpoint count of polls whose query fails outright. Models a flaky
    /// health API during the rollout window.
    pub failing_polls: Mutex<HashMap<String, u32>>,
}

impl ScriptedHealth {
    pub fn set_instance_health(&self, endpoint: &str, members: Vec<InstanceHealth>) {
        self.instance.lock().insert(endpoint.to_string(), members);
    }

    pub fn set_target_health(&self, endpoint: &str, members: Vec<TargetHealth>) {
        self.target.lock().insert(endpoint.to_string(), members);
    }

    pub fn clear_endpoint(&self, endpoint: &str) {
        self.instance.lock().remove(endpoint);
        self.target.lock().remove(endpoint);
    }

    pub fn warm_up(&self, endpoint: &str, polls: u32) {
        self.warmup_polls.lock().insert(endpoint.to_string(), polls);
    }

    pub fn fail_queries(&self, endpoint: &str, polls: u32) {
        self.failing_polls.lock().insert(endpoint.to_string(), polls);
    }

    fn warming(&self, endpoint: &str) -> bool {
        let mut warmups = self.warmup_polls.lock();
        match warmups.get_mut(endpoint) {
            Some(0) | None => false,
            Some(remaining) => {
                *remaining -= 1;
                true
            }
        }
    }

    fn failing(&self, endpoint: &str) -> bool {
        let mut failures = self.failing_polls.lock();
        match failures.get_mut(endpoint) {
            Some(0) | None => false,
            Some(remaining) => {
                *remaining -= 1;
                true
            }
        }
    }
}

#[async_trait]
impl InstanceHealthApi for ScriptedHealth {
    async fn describe_instance_health(
        &self,
        load_balancer: &str,
    ) -> Result<Vec<InstanceHealth>, HealthError> {
        if self.failing(load_balancer) {
            return Err(HealthError::Unavailable(format!(
                "{load_balancer} is not answering"
            )));
        }
        if self.warming(load_balancer) {
            return Ok(vec![]);
        }
        Ok(self
            .instance
            .lock()
            .get(load_balancer)
            .cloned()
            .unwrap_or_default())
    }
}

#[async_trait]
impl TargetHealthApi for ScriptedHealth {
    async fn describe_target_health(
        &self,
        target_group: &str,
    ) -> Result<Vec<TargetHealth>, HealthError> {
        if self.failing(target_group) {
            return Err(HealthError::Unavailable(format!(
                "{target_group} is not answering"
            )));
        }
        if self.warming(target_group) {
            return Ok(vec![]);
        }
        Ok(self
            .target
            .lock()
            .get(target_group)
            .cloned()
            .unwrap_or_default())
    }
}

/// An object store that lets a different execution steal the lock the moment
/// it is written, for exercising the owner-mismatch release path.
pub struct UsurpingStore {
    pub inner: Arc<MemoryStore>,
}

#[async_trait]
impl ObjectStore for UsurpingStore {
    async fn get(&self, path: &str) -> Result<Vec<u8>, StoreError> {
        self.inner.get(path).await
    }

    async fn put_if_absent(&self, path: &str, body: Vec<u8>) -> Result<(), StoreError> {
        self.inner.put_if_absent(path, body.clone()).await?;
        if path.ends_with("/lock")
            && let Ok(mut record) = serde_json::from_slice::<serde_json::Value>(&body)
        {
            record["uuid"] = serde_json::json!(uuid::Uuid::new_v4());
            self.inner.insert(path, record.to_string().into_bytes());
        }
        Ok(())
    }

    async fn delete(&self, path: &str) -> Result<(), StoreError> {
        self.inner.delete(path).await
    }
}

/// Everything a deployment talks to, seeded consistently for one release.
pub struct World {
    pub store: Arc<MemoryStore>,
    pub fleet: Arc<StaticFleet>,
    pub health: Arc<ScriptedHealth>,
}

impl World {
    /// A world where the release's groups exist, instances are in service,
    /// and every registered endpoint reports the expected healthy members.
    pub fn for_release(release: &Release) -> Self {
        let store = Arc::new(MemoryStore::new());
        store.insert(&release.user_data_path(), USER_DATA);

        let fleet = Arc::new(StaticFleet::default());
        let health = Arc::new(ScriptedHealth::default());

        for (service, spec) in &release.services {
            let instances: Vec<FleetInstance> = (0..spec.desired_capacity)
                .map(|n| FleetInstance {
                    id: InstanceId::new(format!("i-{service}{n}")),
                    lifecycle_state: LifecycleState::InService,
                })
                .collect();

            fleet.add_group(FleetGroup {
                id: release.group_id(service),
                service: service.clone(),
                desired_capacity: spec.desired_capacity,
                instances: instances.clone(),
                load_balancers: spec.load_balancers.clone(),
                target_groups: spec.target_groups.clone(),
            });

            for lb in &spec.load_balancers {
                health.set_instance_health(
                    lb,
                    instances
                        .iter()
                        .map(|i| InstanceHealth {
                            instance: i.id.clone(),
                            state: stolos::cloud::HealthState::Healthy,
                        })
                        .collect(),
                );
            }
            for tg in &spec.target_groups {
                health.set_target_health(
                    tg,
                    instances
                        .iter()
                        .map(|i| TargetHealth {
                            target: i.id.clone(),
                            state: stolos::cloud::HealthState::Healthy,
                        })
                        .collect(),
                );
            }
        }

        Self {
            store,
            fleet,
            health,
        }
    }

    pub fn clients(&self) -> Clients {
        Clients {
            store: self.store.clone(),
            fleet: self.fleet.clone(),
            instance_health: self.health.clone(),
            target_health: self.health.clone(),
        }
    }

    pub fn deployer(&self) -> Deployer {
        Deployer::new(self.clients(), fast_tuning()).expect("step table is well formed")
    }
}

/// The trace every execution shares up through its first health check.
pub fn happy_prefix() -> Vec<String> {
    vec![
        "Validate".to_string(),
        ran("Validate"),
        "Lock".to_string(),
        ran("Lock"),
        "ValidateResources".to_string(),
        ran("ValidateResources"),
        "Deploy".to_string(),
        ran("Deploy"),
        "WaitForDeploy".to_string(),
        "WaitForHealthy".to_string(),
        "CheckHealthy".to_string(),
        ran("CheckHealthy"),
    ]
}

/// The tail every post-deploy failure shares.
pub fn failure_tail() -> Vec<String> {
    vec![
        "CleanUpFailure".to_string(),
        ran("CleanUpFailure"),
        "ReleaseLockFailure".to_string(),
        ran("ReleaseLockFailure"),
        "FailureClean".to_string(),
    ]
}

/// The complete single-poll successful trace.
pub fn happy_path() -> Vec<String> {
    let mut path = happy_prefix();
    path.extend([
        "CleanUpSuccess".to_string(),
        ran("CleanUpSuccess"),
        "ReleaseLockSuccess".to_string(),
        ran("ReleaseLockSuccess"),
        "Success".to_string(),
    ]);
    path
}
