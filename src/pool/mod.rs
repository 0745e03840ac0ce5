//! Worker pool
//!
//! A fixed number of workers, each an isolated actor task with its own job
//! queue, executing named operations of one `WorkerTask`:
//! - `WorkerPool::spawn` starts the workers
//! - `WorkerPool::create_handle` binds a cloneable handle to an operation name
//! - `WorkerPool::share_reference` publishes a value to every worker once
//! - `WorkerPool::shutdown` drains queued and in-flight calls, then stops

pub mod shared;
pub mod traits;
mod worker;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

pub use shared::{RefHandle, SharedRefs, WorkerContext};
pub use traits::{TaskError, WorkerId, WorkerTask};

use worker::{spawn_worker, Job, WorkerControl, WorkerSlot, WorkerStats};

/// Errors surfaced to callers of a pool handle
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PoolError {
    /// The worker died while running the call; the call is lost
    #[error("{worker} crashed: {reason}")]
    WorkerCrashed { worker: WorkerId, reason: String },
    /// The pool has shut down or the call was abandoned at teardown
    #[error("worker pool is closed")]
    Closed,
    /// `call_on` named a worker outside the pool
    #[error("no such worker: {0}")]
    NoSuchWorker(WorkerId),
    /// The task returned an error
    #[error(transparent)]
    Task(#[from] TaskError),
    /// Pool configuration rejected
    #[error("invalid pool configuration: {0}")]
    InvalidConfig(String),
}

/// Pool construction parameters
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Number of workers (default: 4)
    pub worker_count: usize,
    /// Calls a single worker runs at once; extra calls queue (default: 200)
    pub max_in_flight_per_worker: usize,
    /// How long shutdown waits for in-flight calls (default: 500ms)
    pub teardown_timeout: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        PoolConfig {
            worker_count: 4,
            max_in_flight_per_worker: 200,
            teardown_timeout: Duration::from_millis(500),
        }
    }
}

impl PoolConfig {
    /// Total calls the pool runs at once
    pub fn capacity(&self) -> usize {
        self.worker_count.saturating_mul(self.max_in_flight_per_worker)
    }
}

struct PoolShared<T: WorkerTask> {
    workers: Vec<WorkerSlot<T>>,
    cursor: AtomicUsize,
}

/// Running pool of workers executing `T`
pub struct WorkerPool<T: WorkerTask> {
    shared: Arc<PoolShared<T>>,
    controls: Vec<WorkerControl>,
    refs: SharedRefs,
}

impl<T: WorkerTask> WorkerPool<T> {
    /// Start `config.worker_count` workers sharing `task`
    ///
    /// Must be called within a tokio runtime.
    pub fn spawn(config: PoolConfig, task: T) -> Result<Self, PoolError> {
        if config.worker_count == 0 {
            return Err(PoolError::InvalidConfig("worker_count must be at least 1".into()));
        }
        if config.max_in_flight_per_worker == 0 {
            return Err(PoolError::InvalidConfig(
                "max_in_flight_per_worker must be at least 1".into(),
            ));
        }

        let task = Arc::new(task);
        let refs = SharedRefs::new();
        let mut workers = Vec::with_capacity(config.worker_count);
        let mut controls = Vec::with_capacity(config.worker_count);

        for index in 0..config.worker_count {
            let id = WorkerId(index);
            let (slot, control) = spawn_worker(
                id,
                task.clone(),
                WorkerContext::new(id, refs.clone()),
                config.max_in_flight_per_worker,
                config.teardown_timeout,
            );
            workers.push(slot);
            controls.push(control);
        }

        info!(
            workers = config.worker_count,
            per_worker = config.max_in_flight_per_worker,
            "worker pool started"
        );

        Ok(WorkerPool {
            shared: Arc::new(PoolShared {
                workers,
                cursor: AtomicUsize::new(0),
            }),
            controls,
            refs,
        })
    }

    /// Handle that invokes `operation` on the pool
    pub fn create_handle(&self, operation: &str) -> PoolHandle<T> {
        PoolHandle {
            shared: self.shared.clone(),
            operation: Arc::from(operation),
        }
    }

    /// Publish `value` to every worker and return its handle
    ///
    /// Workers resolve the handle to the same instance; the value is never
    /// copied per call.
    pub fn share_reference<V: std::any::Any + Send + Sync>(&self, value: V) -> RefHandle<V> {
        let handle = self.refs.publish(value);
        debug!(reference = handle.id(), "published shared reference");
        handle
    }

    pub fn worker_count(&self) -> usize {
        self.shared.workers.len()
    }

    /// Crash-restarts across all workers
    pub fn restarts(&self) -> u64 {
        self.shared
            .workers
            .iter()
            .map(|w| w.stats.restarts.load(Ordering::SeqCst))
            .sum()
    }

    /// Calls answered by each worker, indexed by worker id
    pub fn completed_per_worker(&self) -> Vec<u64> {
        self.shared
            .workers
            .iter()
            .map(|w| w.stats.completed.load(Ordering::SeqCst))
            .collect()
    }

    /// Stop accepting calls, drain queued and in-flight work, stop workers
    pub async fn shutdown(self) {
        let WorkerPool {
            shared, controls, ..
        } = self;

        for control in &controls {
            let _ = control.shutdown_tx.send(()).await;
        }
        for control in controls {
            if let Err(e) = control.join.await {
                warn!(error = %e, "worker task ended abnormally");
            }
        }

        let restarts: u64 = shared
            .workers
            .iter()
            .map(|w| w.stats.restarts.load(Ordering::SeqCst))
            .sum();
        info!(restarts, "worker pool stopped");
    }
}

/// Cloneable handle bound to one named operation
pub struct PoolHandle<T: WorkerTask> {
    shared: Arc<PoolShared<T>>,
    operation: Arc<str>,
}

impl<T: WorkerTask> Clone for PoolHandle<T> {
    fn clone(&self) -> Self {
        PoolHandle {
            shared: self.shared.clone(),
            operation: self.operation.clone(),
        }
    }
}

impl<T: WorkerTask> PoolHandle<T> {
    pub fn operation(&self) -> &str {
        &self.operation
    }

    /// Invoke the operation on the least-loaded worker
    pub async fn call(&self, input: T::Input) -> Result<T::Output, PoolError> {
        let index = self.pick_worker();
        self.dispatch(index, input).await
    }

    /// Invoke the operation on a specific worker
    pub async fn call_on(&self, worker: WorkerId, input: T::Input) -> Result<T::Output, PoolError> {
        if worker.0 >= self.shared.workers.len() {
            return Err(PoolError::NoSuchWorker(worker));
        }
        self.dispatch(worker.0, input).await
    }

    /// Least-loaded worker, scanning from a rotating start so ties round-robin
    fn pick_worker(&self) -> usize {
        let workers = &self.shared.workers;
        let count = workers.len();
        let start = self.shared.cursor.fetch_add(1, Ordering::Relaxed) % count;

        let mut best = start;
        let mut best_load = workers[start].stats.in_flight.load(Ordering::SeqCst);
        for offset in 1..count {
            let index = (start + offset) % count;
            let load = workers[index].stats.in_flight.load(Ordering::SeqCst);
            if load < best_load {
                best = index;
                best_load = load;
            }
        }
        best
    }

    async fn dispatch(&self, index: usize, input: T::Input) -> Result<T::Output, PoolError> {
        let slot = &self.shared.workers[index];
        let (reply_tx, reply_rx) = oneshot::channel();

        let mut pending = InFlight::enter(&slot.stats);
        let job = Job {
            operation: self.operation.clone(),
            input,
            reply: reply_tx,
        };
        if slot.jobs.send(job).await.is_err() {
            return Err(PoolError::Closed);
        }
        // the worker decrements once the job has been handed over
        pending.handed_off();

        reply_rx.await.map_err(|_| PoolError::Closed)?
    }

    /// Id of the worker at `index`, for callers pairing workers
    pub fn worker_id(&self, index: usize) -> Option<WorkerId> {
        self.shared.workers.get(index).map(|w| w.id)
    }

    pub fn worker_count(&self) -> usize {
        self.shared.workers.len()
    }
}

/// Load taken on a worker while a job waits to be queued
///
/// Released on drop unless the job reached the worker, so a caller that
/// gives up while blocked on a full queue does not leave the worker looking
/// busy.
struct InFlight<'a> {
    stats: &'a WorkerStats,
    armed: bool,
}

impl<'a> InFlight<'a> {
    fn enter(stats: &'a WorkerStats) -> Self {
        stats.in_flight.fetch_add(1, Ordering::SeqCst);
        InFlight { stats, armed: true }
    }

    fn handed_off(&mut self) {
        self.armed = false;
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.stats.in_flight.fetch_sub(1, Ordering::SeqCst);
        }
    }
}
