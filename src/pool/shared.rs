//! Shared references published once to every worker
//!
//! The coordinator publishes a value (typically the store handle) and gets
//! back a small typed `RefHandle` that can be sent with every call instead of
//! the value itself. Workers resolve the handle through their `WorkerContext`,
//! so all of them observe the same instance.

use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;

use super::traits::{TaskError, WorkerId};

/// Typed identifier of a published value
pub struct RefHandle<T> {
    id: u64,
    _marker: PhantomData<fn() -> T>,
}

impl<T> RefHandle<T> {
    pub fn id(&self) -> u64 {
        self.id
    }
}

impl<T> Clone for RefHandle<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for RefHandle<T> {}

impl<T> PartialEq for RefHandle<T> {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl<T> Eq for RefHandle<T> {}

impl<T> fmt::Debug for RefHandle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RefHandle({})", self.id)
    }
}

/// Registry of published values, shared by a pool and all of its workers
#[derive(Clone, Default)]
pub struct SharedRefs {
    values: Arc<RwLock<HashMap<u64, Arc<dyn Any + Send + Sync>>>>,
    next_id: Arc<AtomicU64>,
}

impl SharedRefs {
    pub fn new() -> Self {
        Self::default()
    }

    /// Publish `value` and return its handle
    pub fn publish<T: Any + Send + Sync>(&self, value: T) -> RefHandle<T> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        self.values.write().insert(id, Arc::new(value));
        RefHandle {
            id,
            _marker: PhantomData,
        }
    }

    /// Look up a published value
    pub fn resolve<T: Any + Send + Sync>(&self, handle: RefHandle<T>) -> Option<Arc<T>> {
        let value = self.values.read().get(&handle.id).cloned()?;
        value.downcast::<T>().ok()
    }

    /// Withdraw a published value; returns whether it was present
    pub fn release<T>(&self, handle: RefHandle<T>) -> bool {
        self.values.write().remove(&handle.id).is_some()
    }

    /// Number of currently published values
    pub fn len(&self) -> usize {
        self.values.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.read().is_empty()
    }
}

/// Capabilities handed to a task for one call
///
/// Built by the pool for each worker; tests construct one directly around a
/// fake store to exercise task logic without spawning a pool.
#[derive(Clone)]
pub struct WorkerContext {
    worker_id: WorkerId,
    refs: SharedRefs,
}

impl WorkerContext {
    pub fn new(worker_id: WorkerId, refs: SharedRefs) -> Self {
        WorkerContext { worker_id, refs }
    }

    pub fn worker_id(&self) -> WorkerId {
        self.worker_id
    }

    /// Resolve a published reference
    pub fn shared<T: Any + Send + Sync>(&self, handle: RefHandle<T>) -> Result<Arc<T>, TaskError> {
        self.refs
            .resolve(handle)
            .ok_or(TaskError::MissingReference(handle.id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_publish_and_resolve() {
        let refs = SharedRefs::new();
        let handle = refs.publish(String::from("store"));

        let resolved = refs.resolve(handle).unwrap();
        assert_eq!(resolved.as_str(), "store");
        assert_eq!(refs.len(), 1);
    }

    #[test]
    fn test_resolve_shares_one_instance() {
        let refs = SharedRefs::new();
        let handle = refs.publish(vec![1u8, 2, 3]);

        let a = refs.resolve(handle).unwrap();
        let b = refs.clone().resolve(handle).unwrap();
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn test_handles_are_distinct() {
        let refs = SharedRefs::new();
        let first = refs.publish(1u32);
        let second = refs.publish(2u32);
        assert_ne!(first, second);
        assert_eq!(*refs.resolve(second).unwrap(), 2);
    }

    #[test]
    fn test_release() {
        let refs = SharedRefs::new();
        let handle = refs.publish(7u64);

        assert!(refs.release(handle));
        assert!(!refs.release(handle));
        assert!(refs.resolve(handle).is_none());
        assert!(refs.is_empty());
    }

    #[test]
    fn test_context_reports_missing_reference() {
        let refs = SharedRefs::new();
        let handle = refs.publish(7u64);
        refs.release(handle);

        let ctx = WorkerContext::new(WorkerId(3), refs);
        assert_eq!(ctx.worker_id(), WorkerId(3));
        assert_eq!(
            ctx.shared(handle).unwrap_err(),
            TaskError::MissingReference(handle.id())
        );
    }
}
