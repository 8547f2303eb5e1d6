// ABOUTME: Path-scoped exclusive deployment lock over the object store.
// ABOUTME: Conditional create to acquire; read-owner-before-delete to release.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use snafu::Snafu;
use std::sync::Arc;
use uuid::Uuid;

use crate::cloud::{ObjectStore, StoreError};
use crate::machine::{StepTask, TaskOutcome};

use super::error::DeployError;
use super::{LockClaim, Rollout};

/// The JSON record written to the lock path while a deployment is in flight.
///
/// This is advisory locking scoped to a path, not a consensus lock: a crashed
/// execution leaves its record behind, and the age/holder fields exist so an
/// operator can judge and remove it. There is no automatic expiry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LockRecord {
    pub uuid: Uuid,
    pub acquired_at: DateTime<Utc>,
    /// Hostname of the machine that acquired the lock.
    pub holder: String,
    /// The deployment attempt that owns the lock.
    pub release_ref: String,
}

impl LockRecord {
    pub fn new(release_ref: String) -> Self {
        Self {
            uuid: Uuid::new_v4(),
            acquired_at: Utc::now(),
            holder: gethostname::gethostname().to_string_lossy().into_owned(),
            release_ref,
        }
    }

    pub fn age(&self) -> chrono::Duration {
        Utc::now() - self.acquired_at
    }

    /// An hour-old lock almost certainly belongs to a crashed execution.
    /// Reported in contention messages; never auto-broken.
    pub fn is_stale(&self) -> bool {
        self.age().num_hours() >= 1
    }
}

/// Errors from the locking protocol.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum LockError {
    #[snafu(display("lock held by {} since {}", record.holder, record.acquired_at))]
    Held { record: LockRecord },

    #[snafu(display("lock record at {path} is unreadable"))]
    Corrupt { path: String },

    #[snafu(display("lock store error: {source}"))]
    Store { source: StoreError },
}

/// Error kind for programmatic handling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockErrorKind {
    Held,
    Corrupt,
    Store,
}

impl LockError {
    pub fn kind(&self) -> LockErrorKind {
        match self {
            LockError::Held { .. } => LockErrorKind::Held,
            LockError::Corrupt { .. } => LockErrorKind::Corrupt,
            LockError::Store { .. } => LockErrorKind::Store,
        }
    }

    /// The competing record, if this is a contention error.
    pub fn held_record(&self) -> Option<&LockRecord> {
        match self {
            LockError::Held { record } => Some(record),
            _ => None,
        }
    }
}

/// What happened when a release attempt inspected the lock.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Released {
    /// Our record; deleted.
    Deleted,
    /// No record at the path.
    NotHeld,
    /// Someone else's record; left in place.
    OwnerMismatch { held_by: Uuid },
    /// A record we couldn't parse; left in place.
    Unreadable,
}

/// Acquire the lock at `path` by conditionally creating `record` there.
///
/// Contention is never retried here: an existing live record means another
/// execution owns this target, and waiting it out inside a deployment makes
/// no sense. Transient store errors surface as `LockError::Store` for the
/// engine's retry budget.
pub async fn acquire(
    store: &dyn ObjectStore,
    path: &str,
    record: &LockRecord,
) -> Result<(), LockError> {
    let body = serde_json::to_vec(record).map_err(|e| LockError::Store {
        source: StoreError::Unavailable(format!("lock record serialization: {e}")),
    })?;

    match store.put_if_absent(path, body).await {
        Ok(()) => Ok(()),
        Err(StoreError::AlreadyExists(_)) => match store.get(path).await {
            Ok(bytes) => match serde_json::from_slice::<LockRecord>(&bytes) {
                Ok(existing) => {
                    if existing.is_stale() {
                        tracing::warn!(
                            path,
                            holder = %existing.holder,
                            age_secs = existing.age().num_seconds(),
                            "contending lock looks stale; manual removal required"
                        );
                    }
                    Err(LockError::Held { record: existing })
                }
                Err(_) => Err(LockError::Corrupt {
                    path: path.to_string(),
                }),
            },
            // The competing lock vanished between our write and read; let the
            // engine's retry budget take another run at the conditional write.
            Err(StoreError::NotFound(_)) => Err(LockError::Store {
                source: StoreError::Unavailable(format!("lock at {path} vanished during acquire")),
            }),
            Err(source) => Err(LockError::Store { source }),
        },
        Err(source) => Err(LockError::Store { source }),
    }
}

/// Release the lock at `path`, deleting the record only if its uuid matches.
///
/// A mismatch means a different (possibly retried) execution owns the lock
/// now; deleting it would break that execution's exclusion, so the record is
/// left alone and the mismatch is reported for the caller to log.
pub async fn release(
    store: &dyn ObjectStore,
    path: &str,
    uuid: Uuid,
) -> Result<Released, LockError> {
    let bytes = match store.get(path).await {
        Ok(bytes) => bytes,
        Err(StoreError::NotFound(_)) => return Ok(Released::NotHeld),
        Err(source) => return Err(LockError::Store { source }),
    };

    match serde_json::from_slice::<LockRecord>(&bytes) {
        Ok(record) if record.uuid == uuid => match store.delete(path).await {
            Ok(()) | Err(StoreError::NotFound(_)) => Ok(Released::Deleted),
            Err(source) => Err(LockError::Store { source }),
        },
        Ok(record) => Ok(Released::OwnerMismatch {
            held_by: record.uuid,
        }),
        Err(_) => Ok(Released::Unreadable),
    }
}

/// The Lock step: claim the target before anything mutates.
pub(crate) struct LockStep {
    pub store: Arc<dyn ObjectStore>,
}

#[async_trait]
impl StepTask<Rollout, DeployError> for LockStep {
    async fn run(&self, ctx: &mut Rollout) -> Result<TaskOutcome, DeployError> {
        let release = ctx.release()?;
        let path = release.lock_path();
        let record = LockRecord::new(release.release_ref());

        acquire(self.store.as_ref(), &path, &record).await?;
        tracing::info!(path = %path, uuid = %record.uuid, "deployment lock acquired");

        ctx.claim = Some(LockClaim {
            path,
            uuid: record.uuid,
        });
        Ok(TaskOutcome::Advance)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cloud::MemoryStore;

    #[test]
    fn record_carries_current_host() {
        let record = LockRecord::new("app/staging/r-1".to_string());
        assert!(!record.holder.is_empty());
        assert_eq!(record.release_ref, "app/staging/r-1");
    }

    #[test]
    fn fresh_record_is_not_stale() {
        assert!(!LockRecord::new("app/staging/r-1".to_string()).is_stale());
    }

    #[test]
    fn hour_old_record_is_stale() {
        let mut record = LockRecord::new("app/staging/r-1".to_string());
        record.acquired_at = Utc::now() - chrono::Duration::hours(2);
        assert!(record.is_stale());
    }

    #[tokio::test]
    async fn second_acquire_reports_the_holder() {
        let store = MemoryStore::new();
        let first = LockRecord::new("app/staging/r-1".to_string());
        acquire(&store, "app/staging/lock", &first).await.unwrap();

        let second = LockRecord::new("app/staging/r-2".to_string());
        let err = acquire(&store, "app/staging/lock", &second)
            .await
            .unwrap_err();

        assert_eq!(err.kind(), LockErrorKind::Held);
        assert_eq!(err.held_record().unwrap().uuid, first.uuid);
    }

    #[tokio::test]
    async fn release_deletes_only_matching_uuid() {
        let store = MemoryStore::new();
        let record = LockRecord::new("app/staging/r-1".to_string());
        acquire(&store, "app/staging/lock", &record).await.unwrap();

        let outcome = release(&store, "app/staging/lock", Uuid::new_v4())
            .await
            .unwrap();
        assert_eq!(
            outcome,
            Released::OwnerMismatch {
                held_by: record.uuid
            }
        );
        assert!(store.contains("app/staging/lock"));

        let outcome = release(&store, "app/staging/lock", record.uuid)
            .await
            .unwrap();
        assert_eq!(outcome, Released::Deleted);
        assert!(!store.contains("app/staging/lock"));
    }

    #[tokio::test]
    async fn release_of_absent_lock_is_not_held() {
        let store = MemoryStore::new();
        let outcome = release(&store, "app/staging/lock", Uuid::new_v4())
            .await
            .unwrap();
        assert_eq!(outcome, Released::NotHeld);
    }

    #[tokio::test]
    async fn corrupt_record_blocks_acquire_but_not_release() {
        let store = MemoryStore::new();
        store.insert("app/staging/lock", b"not json".as_slice());

        let record = LockRecord::new("app/staging/r-1".to_string());
        let err = acquire(&store, "app/staging/lock", &record)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), LockErrorKind::Corrupt);

        let outcome = release(&store, "app/staging/lock", record.uuid)
            .await
            .unwrap();
        assert_eq!(outcome, Released::Unreadable);
        assert!(store.contains("app/staging/lock"));
    }
}
