//! Fault-injecting store wrappers
//!
//! Each wrapper forwards to an inner store and bends one guarantee, so the
//! harness can be shown to catch the matching class of bug:
//! - `DelayedCommitStore`: acknowledged writes become visible only after a lag
//! - `PurgingStore`: some acknowledged writes are silently dropped
//! - `CorruptingStore`: reads return truncated payloads

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::time::Instant;

use super::{BlobStore, SharedStore, StoreError};
use crate::content::{BlobKey, Payload};

/// Store whose writes are acknowledged before they are committed
///
/// `put` returns at once; the payload is published to the inner store the
/// first time it is read at or after `commit_delay` has elapsed.
pub struct DelayedCommitStore {
    inner: SharedStore,
    commit_delay: Duration,
    pending: Mutex<HashMap<BlobKey, (Payload, Instant)>>,
}

impl DelayedCommitStore {
    pub fn new(inner: SharedStore, commit_delay: Duration) -> Self {
        DelayedCommitStore {
            inner,
            commit_delay,
            pending: Mutex::new(HashMap::new()),
        }
    }

    /// Number of acknowledged writes not yet committed
    pub fn pending(&self) -> usize {
        self.pending.lock().len()
    }

    fn take_due(&self, key: &BlobKey) -> Option<Payload> {
        let mut pending = self.pending.lock();
        let due = matches!(pending.get(key), Some((_, visible_at)) if Instant::now() >= *visible_at);
        if due {
            pending.remove(key).map(|(payload, _)| payload)
        } else {
            None
        }
    }
}

#[async_trait]
impl BlobStore for DelayedCommitStore {
    async fn put(&self, key: BlobKey, payload: Payload) -> Result<(), StoreError> {
        if self.commit_delay.is_zero() {
            return self.inner.put(key, payload).await;
        }
        let visible_at = Instant::now() + self.commit_delay;
        self.pending.lock().insert(key, (payload, visible_at));
        Ok(())
    }

    async fn get(&self, key: &BlobKey) -> Result<Option<Payload>, StoreError> {
        if let Some(payload) = self.take_due(key) {
            self.inner.put(*key, payload).await?;
        }
        self.inner.get(key).await
    }

    fn name(&self) -> &'static str {
        "delayed-commit"
    }
}

/// Store that drops every `every`-th acknowledged write
pub struct PurgingStore {
    inner: SharedStore,
    every: u64,
    writes: AtomicU64,
    purged: AtomicU64,
}

impl PurgingStore {
    /// `every` = 1 drops all writes; 0 drops none
    pub fn new(inner: SharedStore, every: u64) -> Self {
        PurgingStore {
            inner,
            every,
            writes: AtomicU64::new(0),
            purged: AtomicU64::new(0),
        }
    }

    /// Number of writes dropped so far
    pub fn purged(&self) -> u64 {
        self.purged.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl BlobStore for PurgingStore {
    async fn put(&self, key: BlobKey, payload: Payload) -> Result<(), StoreError> {
        let n = self.writes.fetch_add(1, Ordering::SeqCst) + 1;
        if self.every > 0 && n % self.every == 0 {
            self.purged.fetch_add(1, Ordering::SeqCst);
            return Ok(());
        }
        self.inner.put(key, payload).await
    }

    async fn get(&self, key: &BlobKey) -> Result<Option<Payload>, StoreError> {
        self.inner.get(key).await
    }

    fn name(&self) -> &'static str {
        "purging"
    }
}

/// Store whose reads return payloads truncated to `keep` bytes
pub struct CorruptingStore {
    inner: SharedStore,
    keep: usize,
}

impl CorruptingStore {
    pub fn new(inner: SharedStore, keep: usize) -> Self {
        CorruptingStore { inner, keep }
    }
}

#[async_trait]
impl BlobStore for CorruptingStore {
    async fn put(&self, key: BlobKey, payload: Payload) -> Result<(), StoreError> {
        self.inner.put(key, payload).await
    }

    async fn get(&self, key: &BlobKey) -> Result<Option<Payload>, StoreError> {
        let found = self.inner.get(key).await?;
        Ok(found.map(|payload| {
            let keep = self.keep.min(payload.len());
            Payload::new(payload.as_bytes()[..keep].to_vec())
        }))
    }

    fn name(&self) -> &'static str {
        "corrupting"
    }
}
