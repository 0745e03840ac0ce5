//! Blob store abstraction shared by the coordinator and every worker

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use crate::content::{BlobKey, Payload};

/// Errors that can occur during store operations
///
/// A miss is not an error: `get` reports it as `Ok(None)`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    /// I/O error (e.g., disk full, permission denied)
    #[error("I/O error: {0}")]
    Io(String),
    /// Stored bytes failed their integrity check
    #[error("data corruption: {0}")]
    Corruption(String),
    /// The store has been closed
    #[error("store is closed")]
    Closed,
}

/// Key/value store holding content-addressed blobs
///
/// Implementations must be safe for concurrent use from many tasks. Whether a
/// completed `put` is immediately visible to `get` from another context is
/// exactly the property the harness measures, so it is not assumed here.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Store `payload` under `key`
    async fn put(&self, key: BlobKey, payload: Payload) -> Result<(), StoreError>;

    /// Fetch the payload stored under `key`, `Ok(None)` on a miss
    async fn get(&self, key: &BlobKey) -> Result<Option<Payload>, StoreError>;

    /// Human-readable backend name for logs
    fn name(&self) -> &'static str;
}

/// Handle to one logical store instance
///
/// Cloning shares the instance; it never opens a second store.
pub type SharedStore = Arc<dyn BlobStore>;
