// ABOUTME: Object store capability trait used for the deployment lock record.
// ABOUTME: The conditional write is the primitive the locking protocol builds on.

use async_trait::async_trait;

/// Shared object store with atomic create-if-absent semantics.
///
/// `put_if_absent` must be atomic at the store: two concurrent writers to the
/// same path must see exactly one success. Everything the locking protocol
/// guarantees rests on that.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Read an object's bytes.
    async fn get(&self, path: &str) -> Result<Vec<u8>, StoreError>;

    /// Create an object only if no object exists at `path`.
    async fn put_if_absent(&self, path: &str, body: Vec<u8>) -> Result<(), StoreError>;

    /// Delete an object.
    async fn delete(&self, path: &str) -> Result<(), StoreError>;
}

/// Errors from object store operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("object not found: {0}")]
    NotFound(String),

    #[error("object already exists: {0}")]
    AlreadyExists(String),

    #[error("store unavailable: {0}")]
    Unavailable(String),
}
