//! In-memory blob store
//!
//! Fast, no persistence. A completed `put` is visible to every holder of the
//! same handle immediately, which makes it the zero-lag baseline.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use parking_lot::RwLock;

use super::{BlobStore, StoreError};
use crate::content::{BlobKey, Payload};

/// In-memory store implementation
#[derive(Debug, Default)]
pub struct MemoryStore {
    data: RwLock<HashMap<BlobKey, Payload>>,
    closed: AtomicBool,
}

impl MemoryStore {
    /// Create a new empty in-memory store
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored blobs
    pub fn len(&self) -> usize {
        self.data.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.read().is_empty()
    }

    /// Remove a key, returning whether it was present
    pub fn remove(&self, key: &BlobKey) -> bool {
        self.data.write().remove(key).is_some()
    }

    /// Reject all further operations
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    fn check_open(&self) -> Result<(), StoreError> {
        if self.closed.load(Ordering::SeqCst) {
            Err(StoreError::Closed)
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl BlobStore for MemoryStore {
    async fn put(&self, key: BlobKey, payload: Payload) -> Result<(), StoreError> {
        self.check_open()?;
        self.data.write().insert(key, payload);
        Ok(())
    }

    async fn get(&self, key: &BlobKey) -> Result<Option<Payload>, StoreError> {
        self.check_open()?;
        Ok(self.data.read().get(key).cloned())
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::content::ContentAddresser;

    #[tokio::test]
    async fn test_put_then_get() {
        let store = MemoryStore::new();
        let (payload, key) = ContentAddresser::new(32).generate();

        store.put(key, payload.clone()).await.unwrap();

        assert_eq!(store.get(&key).await.unwrap(), Some(payload));
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_get_missing_is_none() {
        let store = MemoryStore::new();
        let (_, key) = ContentAddresser::new(32).generate();
        assert_eq!(store.get(&key).await.unwrap(), None);
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_remove() {
        let store = MemoryStore::new();
        let (payload, key) = ContentAddresser::new(32).generate();
        store.put(key, payload).await.unwrap();

        assert!(store.remove(&key));
        assert!(!store.remove(&key));
        assert_eq!(store.get(&key).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_closed_store_rejects_operations() {
        let store = MemoryStore::new();
        let (payload, key) = ContentAddresser::new(32).generate();
        store.close();

        assert_eq!(store.put(key, payload).await, Err(StoreError::Closed));
        assert_eq!(store.get(&key).await, Err(StoreError::Closed));
    }
}
