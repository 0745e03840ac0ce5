//! Testing utilities
//!
//! Store doubles for exercising the validator, pool and controller without a
//! real backend.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::content::{BlobKey, Payload};
use crate::store::{BlobStore, SharedStore, StoreError};

/// Wraps a store and counts calls
pub struct CountingStore {
    inner: SharedStore,
    puts: AtomicU64,
    gets: AtomicU64,
}

impl CountingStore {
    pub fn new(inner: SharedStore) -> Self {
        CountingStore {
            inner,
            puts: AtomicU64::new(0),
            gets: AtomicU64::new(0),
        }
    }

    pub fn puts(&self) -> u64 {
        self.puts.load(Ordering::SeqCst)
    }

    pub fn gets(&self) -> u64 {
        self.gets.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl BlobStore for CountingStore {
    async fn put(&self, key: BlobKey, payload: Payload) -> Result<(), StoreError> {
        self.puts.fetch_add(1, Ordering::SeqCst);
        self.inner.put(key, payload).await
    }

    async fn get(&self, key: &BlobKey) -> Result<Option<Payload>, StoreError> {
        self.gets.fetch_add(1, Ordering::SeqCst);
        self.inner.get(key).await
    }

    fn name(&self) -> &'static str {
        "counting"
    }
}

/// Store that answers `get` from a fixed script, then misses
///
/// `put` is accepted and discarded.
pub struct ScriptedStore {
    script: Mutex<VecDeque<Result<Option<Payload>, StoreError>>>,
}

impl ScriptedStore {
    pub fn new(script: Vec<Result<Option<Payload>, StoreError>>) -> Self {
        ScriptedStore {
            script: Mutex::new(script.into()),
        }
    }
}

#[async_trait]
impl BlobStore for ScriptedStore {
    async fn put(&self, _key: BlobKey, _payload: Payload) -> Result<(), StoreError> {
        Ok(())
    }

    async fn get(&self, _key: &BlobKey) -> Result<Option<Payload>, StoreError> {
        self.script.lock().pop_front().unwrap_or(Ok(None))
    }

    fn name(&self) -> &'static str {
        "scripted"
    }
}

/// Store that panics inside the `n`-th `put` (1-based), killing the caller
pub struct PanicOnPut {
    inner: SharedStore,
    nth: u64,
    puts: AtomicU64,
}

impl PanicOnPut {
    pub fn new(inner: SharedStore, nth: u64) -> Self {
        PanicOnPut {
            inner,
            nth,
            puts: AtomicU64::new(0),
        }
    }
}

#[async_trait]
impl BlobStore for PanicOnPut {
    async fn put(&self, key: BlobKey, payload: Payload) -> Result<(), StoreError> {
        let n = self.puts.fetch_add(1, Ordering::SeqCst) + 1;
        if n == self.nth {
            panic!("simulated worker crash on put {}", n);
        }
        self.inner.put(key, payload).await
    }

    async fn get(&self, key: &BlobKey) -> Result<Option<Payload>, StoreError> {
        self.inner.get(key).await
    }

    fn name(&self) -> &'static str {
        "panic-on-put"
    }
}

/// Store whose `put` always fails
pub struct FailingStore;

#[async_trait]
impl BlobStore for FailingStore {
    async fn put(&self, _key: BlobKey, _payload: Payload) -> Result<(), StoreError> {
        Err(StoreError::Io("disk unavailable".into()))
    }

    async fn get(&self, _key: &BlobKey) -> Result<Option<Payload>, StoreError> {
        Ok(None)
    }

    fn name(&self) -> &'static str {
        "failing"
    }
}
