//! Worker actor loop
//!
//! Each worker owns a job queue and runs at most `max_in_flight` calls at a
//! time; further jobs wait in the queue. Every call runs in its own task so a
//! panic is contained: the caller gets `WorkerCrashed`, the worker's
//! generation is bumped and it keeps serving the queue.

use std::any::Any;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot, OwnedSemaphorePermit, Semaphore};
use tokio::task::{AbortHandle, JoinHandle, JoinSet};
use tracing::{debug, warn};

use super::shared::WorkerContext;
use super::traits::{WorkerId, WorkerTask};
use super::PoolError;

/// A call queued for a worker
pub(crate) struct Job<T: WorkerTask> {
    pub(crate) operation: Arc<str>,
    pub(crate) input: T::Input,
    pub(crate) reply: oneshot::Sender<Result<T::Output, PoolError>>,
}

/// Load and health counters observed by the dispatcher
#[derive(Debug, Default)]
pub(crate) struct WorkerStats {
    /// Calls dispatched to this worker and not yet answered
    pub(crate) in_flight: AtomicUsize,
    /// Calls lost to a crash; each one restarts the worker
    pub(crate) restarts: AtomicU64,
    /// Calls answered (successfully or not)
    pub(crate) completed: AtomicU64,
}

/// Coordinator-side end of a running worker
pub(crate) struct WorkerSlot<T: WorkerTask> {
    pub(crate) id: WorkerId,
    pub(crate) jobs: mpsc::Sender<Job<T>>,
    pub(crate) stats: Arc<WorkerStats>,
}

/// Handles needed to stop a worker
pub(crate) struct WorkerControl {
    pub(crate) shutdown_tx: mpsc::Sender<()>,
    pub(crate) join: JoinHandle<()>,
}

/// Spawn a worker and return its dispatch slot and control handles
pub(crate) fn spawn_worker<T: WorkerTask>(
    id: WorkerId,
    task: Arc<T>,
    ctx: WorkerContext,
    max_in_flight: usize,
    teardown_timeout: Duration,
) -> (WorkerSlot<T>, WorkerControl) {
    let (jobs_tx, jobs_rx) = mpsc::channel(max_in_flight.max(1));
    let (shutdown_tx, shutdown_rx) = mpsc::channel(1);
    let stats = Arc::new(WorkerStats::default());

    let worker = Worker {
        id,
        task,
        ctx,
        jobs: jobs_rx,
        shutdown_rx,
        permits: Arc::new(Semaphore::new(max_in_flight)),
        stats: stats.clone(),
        teardown_timeout,
    };
    let join = tokio::spawn(worker.run());

    (
        WorkerSlot {
            id,
            jobs: jobs_tx,
            stats,
        },
        WorkerControl { shutdown_tx, join },
    )
}

struct Worker<T: WorkerTask> {
    id: WorkerId,
    task: Arc<T>,
    ctx: WorkerContext,
    jobs: mpsc::Receiver<Job<T>>,
    shutdown_rx: mpsc::Receiver<()>,
    permits: Arc<Semaphore>,
    stats: Arc<WorkerStats>,
    teardown_timeout: Duration,
}

impl<T: WorkerTask> Worker<T> {
    async fn run(mut self) {
        debug!(worker = %self.id, "worker started");
        let mut running = JoinSet::new();
        let mut draining = false;

        loop {
            tokio::select! {
                _ = self.shutdown_rx.recv(), if !draining => {
                    // Refuse new jobs but still run the ones already queued
                    draining = true;
                    self.jobs.close();
                }
                job = self.jobs.recv() => {
                    let Some(job) = job else { break };
                    let Ok(permit) = self.permits.clone().acquire_owned().await else { break };
                    running.spawn(execute(
                        self.id,
                        self.task.clone(),
                        self.ctx.clone(),
                        self.stats.clone(),
                        job,
                        permit,
                    ));
                    while running.try_join_next().is_some() {}
                }
            }
        }

        let drained = tokio::time::timeout(self.teardown_timeout, async {
            while running.join_next().await.is_some() {}
        })
        .await;
        if drained.is_err() {
            warn!(
                worker = %self.id,
                abandoned = running.len(),
                "teardown timeout elapsed, aborting in-flight calls"
            );
            running.shutdown().await;
        }
        debug!(worker = %self.id, "worker stopped");
    }
}

async fn execute<T: WorkerTask>(
    id: WorkerId,
    task: Arc<T>,
    ctx: WorkerContext,
    stats: Arc<WorkerStats>,
    job: Job<T>,
    _permit: OwnedSemaphorePermit,
) {
    let Job {
        operation,
        input,
        reply,
    } = job;

    let call = tokio::spawn(async move { task.call(&ctx, &operation, input).await });
    let _cancel = AbortOnDrop(call.abort_handle());

    let result = match call.await {
        Ok(Ok(output)) => Ok(output),
        Ok(Err(e)) => Err(PoolError::Task(e)),
        Err(join_err) => {
            let reason = if join_err.is_panic() {
                panic_message(join_err.into_panic())
            } else {
                "call cancelled".to_string()
            };
            let generation = stats.restarts.fetch_add(1, Ordering::SeqCst) + 1;
            warn!(worker = %id, generation, %reason, "worker crashed, restarting");
            Err(PoolError::WorkerCrashed { worker: id, reason })
        }
    };

    stats.in_flight.fetch_sub(1, Ordering::SeqCst);
    stats.completed.fetch_add(1, Ordering::SeqCst);
    let _ = reply.send(result);
}

/// Cancels the spawned call if `execute` is dropped before it finishes
struct AbortOnDrop(AbortHandle);

impl Drop for AbortOnDrop {
    fn drop(&mut self) {
        self.0.abort();
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "panic".to_string()
    }
}
