// ABOUTME: The release descriptor: what to deploy, where, and within what budget.
// ABOUTME: Strict wire model plus the paths and names derived from it.

use chrono::{DateTime, Utc};
use nonempty::NonEmpty;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

use crate::types::{ArtifactRef, ConfigName, GroupId, ProjectName, validate_label};

/// Execution timeout applied when a release leaves it unset.
pub const DEFAULT_TIMEOUT_SECS: i64 = 600;

/// A single deployment request for one project/config target.
///
/// Decoding is strict: unknown fields are rejected so a typo'd descriptor
/// fails before anything is locked or mutated. Everything derived from the
/// release (lock path, group names) is a pure function of its fields.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Release {
    pub project_name: ProjectName,
    pub config_name: ConfigName,

    /// Identifies this deployment attempt within the project/config.
    pub release_id: String,

    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,

    pub artifact: ArtifactRef,

    /// Hex SHA-256 of the instance bootstrap payload stored at
    /// `user_data_path()`. Checked before anything is locked.
    pub user_data_sha256: String,

    /// Overall execution timeout in seconds, measured from when the fleet
    /// mutation is issued. May be explicitly non-positive to force an
    /// immediate post-deploy failure (used by fast-fail callers).
    #[serde(default)]
    pub timeout: Option<i64>,

    #[serde(deserialize_with = "deserialize_subnets")]
    pub subnets: NonEmpty<String>,

    /// Service roles to roll out, keyed by role name.
    pub services: BTreeMap<String, ServiceSpec>,

    /// Allow ValidateResources to proceed when a role's fleet group does not
    /// exist yet (first deployment of a role).
    #[serde(default)]
    pub create_missing_groups: bool,
}

/// Per-role fleet shape and the health endpoints registered for it.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ServiceSpec {
    pub desired_capacity: u32,

    #[serde(default)]
    pub load_balancers: Vec<String>,

    #[serde(default)]
    pub target_groups: Vec<String>,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ReleaseError {
    #[error("release_id cannot be empty")]
    EmptyReleaseId,

    #[error("release defines no services")]
    NoServices,

    #[error("invalid service name '{service}': {reason}")]
    BadServiceName { service: String, reason: String },

    #[error("service '{0}' has desired_capacity 0")]
    ZeroCapacity(String),

    #[error("user_data_sha256 must be a 64-character hex digest, got {0:?}")]
    BadDigestFormat(String),
}

impl Release {
    /// Fill in the optional fields a minimal release leaves unset. Applied
    /// once at the Validate step; the release is immutable afterwards.
    pub fn set_defaults(&mut self) {
        if self.timeout.is_none() {
            self.timeout = Some(DEFAULT_TIMEOUT_SECS);
        }
        if self.created_at.is_none() {
            self.created_at = Some(Utc::now());
        }
    }

    /// Offline structural checks: everything that can be validated without
    /// talking to any cloud service.
    pub fn validate(&self) -> Result<(), ReleaseError> {
        if self.release_id.is_empty() {
            return Err(ReleaseError::EmptyReleaseId);
        }

        if self.services.is_empty() {
            return Err(ReleaseError::NoServices);
        }

        for (service, spec) in &self.services {
            validate_label(service).map_err(|e| ReleaseError::BadServiceName {
                service: service.clone(),
                reason: e.to_string(),
            })?;
            if spec.desired_capacity == 0 {
                return Err(ReleaseError::ZeroCapacity(service.clone()));
            }
        }

        let digest_ok = self.user_data_sha256.len() == 64
            && self.user_data_sha256.chars().all(|c| c.is_ascii_hexdigit());
        if !digest_ok {
            return Err(ReleaseError::BadDigestFormat(self.user_data_sha256.clone()));
        }

        Ok(())
    }

    /// Where the exclusive deployment lock for this target lives. Every
    /// release for the same project/config derives the same path.
    pub fn lock_path(&self) -> String {
        format!("{}/{}/lock", self.project_name, self.config_name)
    }

    /// Where the instance bootstrap payload for this release lives.
    pub fn user_data_path(&self) -> String {
        format!(
            "{}/{}/{}/user-data",
            self.project_name, self.config_name, self.release_id
        )
    }

    /// The fleet group backing a service role of this target.
    pub fn group_id(&self, service: &str) -> GroupId {
        GroupId::new(format!(
            "{}-{}-{}",
            self.project_name, self.config_name, service
        ))
    }

    /// Human-readable identity of this deployment attempt.
    pub fn release_ref(&self) -> String {
        format!(
            "{}/{}/{}",
            self.project_name, self.config_name, self.release_id
        )
    }
}

fn deserialize_subnets<'de, D>(deserializer: D) -> Result<NonEmpty<String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let values: Vec<String> = Vec::deserialize(deserializer)?;
    NonEmpty::from_vec(values)
        .ok_or_else(|| serde::de::Error::custom("at least one subnet is required"))
}
