// ABOUTME: In-memory ObjectStore for tests and local dry-runs.
// ABOUTME: Provides real conditional-write semantics behind a mutex.

use parking_lot::Mutex;
use std::collections::HashMap;

use async_trait::async_trait;

use super::store::{ObjectStore, StoreError};

/// An `ObjectStore` backed by a process-local map.
///
/// `put_if_absent` holds the map lock for check-and-insert, so concurrent
/// acquisitions against the same path behave like the real store.
#[derive(Debug, Default)]
pub struct MemoryStore {
    objects: Mutex<HashMap<String, Vec<u8>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Unconditionally write an object. Test seeding only; deployments go
    /// through the trait.
    pub fn insert(&self, path: &str, body: impl Into<Vec<u8>>) {
        self.objects.lock().insert(path.to_string(), body.into());
    }

    pub fn contains(&self, path: &str) -> bool {
        self.objects.lock().contains_key(path)
    }

    pub fn read(&self, path: &str) -> Option<Vec<u8>> {
        self.objects.lock().get(path).cloned()
    }
}

#[async_trait]
impl ObjectStore for MemoryStore {
    async fn get(&self, path: &str) -> Result<Vec<u8>, StoreError> {
        self.objects
            .lock()
            .get(path)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(path.to_string()))
    }

    async fn put_if_absent(&self, path: &str, body: Vec<u8>) -> Result<(), StoreError> {
        let mut objects = self.objects.lock();
        if objects.contains_key(path) {
            return Err(StoreError::AlreadyExists(path.to_string()));
        }
        objects.insert(path.to_string(), body);
        Ok(())
    }

    async fn delete(&self, path: &str) -> Result<(), StoreError> {
        self.objects
            .lock()
            .remove(path)
            .map(|_| ())
            .ok_or_else(|| StoreError::NotFound(path.to_string()))
    }
}
