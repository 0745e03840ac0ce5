//! Bounded concurrent scheduler
//!
//! Runs a sequence of lazily created tasks with at most `max_concurrent` of
//! them active at once; the next task is admitted as soon as one settles.
//! Tasks complete in any order. A panicking task settles as `Panicked`
//! without disturbing its siblings.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::task::JoinSet;
use tracing::warn;

/// How one task settled
#[derive(Debug)]
pub enum Settled<T> {
    Done(T),
    Panicked(String),
}

/// Admission statistics for one `run`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchStats {
    /// Tasks started
    pub admitted: usize,
    /// Tasks that returned a value
    pub completed: usize,
    pub panicked: usize,
    /// Tasks never started because the batch was aborted
    pub skipped: usize,
    /// Highest number of simultaneously active tasks
    pub peak_in_flight: usize,
}

/// Settled tasks in completion order, plus statistics
#[derive(Debug)]
pub struct BatchResult<T> {
    pub settled: Vec<Settled<T>>,
    pub stats: BatchStats,
}

#[derive(Debug, Clone, Copy)]
pub struct BoundedScheduler {
    max_concurrent: usize,
}

impl BoundedScheduler {
    /// A cap of 0 is treated as 1
    pub fn new(max_concurrent: usize) -> Self {
        BoundedScheduler {
            max_concurrent: max_concurrent.max(1),
        }
    }

    pub fn max_concurrent(&self) -> usize {
        self.max_concurrent
    }

    /// Run every task and wait until all have settled
    pub async fn run<I, F, T>(&self, tasks: I) -> BatchResult<T>
    where
        I: IntoIterator<Item = F>,
        F: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        self.run_with_abort(tasks, &AtomicBool::new(false)).await
    }

    /// Like `run`, but stop admitting new tasks once `abort` is set
    ///
    /// Tasks already active are still awaited; none is cancelled mid-flight.
    pub async fn run_with_abort<I, F, T>(&self, tasks: I, abort: &AtomicBool) -> BatchResult<T>
    where
        I: IntoIterator<Item = F>,
        F: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        let mut pending = tasks.into_iter();
        let mut active = JoinSet::new();
        let mut settled = Vec::new();
        let mut stats = BatchStats::default();

        loop {
            while active.len() < self.max_concurrent && !abort.load(Ordering::SeqCst) {
                match pending.next() {
                    Some(task) => {
                        active.spawn(task);
                        stats.admitted += 1;
                        stats.peak_in_flight = stats.peak_in_flight.max(active.len());
                    }
                    None => break,
                }
            }

            match active.join_next().await {
                Some(Ok(value)) => {
                    stats.completed += 1;
                    settled.push(Settled::Done(value));
                }
                Some(Err(e)) => {
                    stats.panicked += 1;
                    warn!(error = %e, "scheduled task panicked");
                    settled.push(Settled::Panicked(e.to_string()));
                }
                None => break,
            }
        }

        stats.skipped = pending.count();
        BatchResult { settled, stats }
    }
}
