//! Run controller
//!
//! Drives a run as a sequence of batches. Each batch issues `batch_size`
//! write-then-validate operations through the bounded scheduler; every
//! operation asks a pool worker to write, then validates the returned key
//! either from the coordinator or from a different worker. Between batches
//! the controller checks the time budget, the batch limit, the violation
//! threshold and the abort conditions. The current batch always drains
//! before the run stops.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use thiserror::Error;
use tracing::{error, info, warn};

use super::config::{ConfigError, HarnessConfig, ReadMode};
use super::counters::RunCounters;
use super::probe::{ProbeReply, ProbeRequest, ProbeTask, VALIDATE_OP, WRITE_OP};
use super::scheduler::{BoundedScheduler, Settled};
use super::validator::{ConsistencyValidator, HardFailure, Outcome};
use crate::content::ContentAddresser;
use crate::pool::{PoolError, PoolHandle, RefHandle, WorkerId, WorkerPool};
use crate::report::{
    AbortReason, FailureKind, FlakinessReport, ReadContext, RunClock, RunSummary, Verdict,
    ViolationLog, ViolationRecord, MAX_RECORDS,
};
use crate::store::{SharedStore, StoreError};

/// Final result of `RunController::run_once`
pub type RunResult = RunSummary;

/// Errors that prevent a run from starting or completing
#[derive(Debug, Error)]
pub enum RunError {
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),
    #[error("worker pool: {0}")]
    Pool(#[from] PoolError),
    #[error("store: {0}")]
    Store(#[from] StoreError),
}

/// How one operation settled, as seen by the batch loop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OpStatus {
    Classified,
    Rejected,
}

/// Everything one operation needs, cloned per operation
#[derive(Clone)]
struct OpContext {
    writer: PoolHandle<ProbeTask>,
    reader: PoolHandle<ProbeTask>,
    store: SharedStore,
    store_ref: RefHandle<SharedStore>,
    validator: ConsistencyValidator,
    read_mode: ReadMode,
    counters: Arc<RunCounters>,
    log: Arc<ViolationLog>,
    clock: RunClock,
    abort: Arc<AtomicBool>,
}

impl OpContext {
    async fn execute(self, op_id: u64) -> OpStatus {
        self.counters.record_operation();

        let receipt = match self.writer.call(ProbeRequest::write(self.store_ref)).await {
            Ok(ProbeReply::Written(receipt)) => receipt,
            Ok(other) => {
                self.reject(op_id, format!("unexpected write reply: {:?}", other));
                return OpStatus::Rejected;
            }
            Err(e) => {
                self.reject(op_id, e.to_string());
                return OpStatus::Rejected;
            }
        };

        let (reader, outcome) = match self.read_mode {
            ReadMode::Coordinator => (
                ReadContext::Coordinator,
                self.validator.validate(&*self.store, &receipt.key).await,
            ),
            ReadMode::CrossWorker => {
                let count = self.reader.worker_count();
                let target = WorkerId((receipt.worker.0 + 1) % count);
                let request = ProbeRequest::validate(self.store_ref, receipt.key);
                let outcome = match self.reader.call_on(target, request).await {
                    Ok(ProbeReply::Validated(outcome)) => outcome,
                    Ok(other) => Outcome::transport(format!("unexpected validate reply: {:?}", other)),
                    Err(e) => Outcome::transport(e.to_string()),
                };
                (ReadContext::Worker(target), outcome)
            }
        };

        self.counters.record(&outcome);

        let (kind, detail) = match &outcome {
            Outcome::FirstTry | Outcome::AfterRetry { .. } => return OpStatus::Classified,
            Outcome::Violation => {
                warn!(
                    op = op_id,
                    key = %receipt.key.short(),
                    writer = %receipt.worker,
                    %reader,
                    "acknowledged write not visible after retry"
                );
                (FailureKind::Violation, "not visible after retry".to_string())
            }
            Outcome::HardFailure {
                failure: HardFailure::Corruption { corruption },
            } => {
                error!(
                    op = op_id,
                    key = %receipt.key.short(),
                    %corruption,
                    "corrupted payload, aborting run"
                );
                self.abort.store(true, Ordering::SeqCst);
                (FailureKind::Corruption, corruption.to_string())
            }
            Outcome::HardFailure {
                failure: HardFailure::Transport { message },
            } => (FailureKind::Transport, message.clone()),
        };

        self.log.record(ViolationRecord {
            op_id,
            key: Some(receipt.key.to_string()),
            kind,
            writer: Some(receipt.worker),
            reader: Some(reader),
            write_committed_at: Some(receipt.committed_at),
            detected_at: self.clock.now(),
            detail,
        });

        if kind == FailureKind::Transport {
            OpStatus::Rejected
        } else {
            OpStatus::Classified
        }
    }

    /// Record a write that never reached the store
    fn reject(&self, op_id: u64, detail: String) {
        warn!(op = op_id, error = %detail, "write call rejected");
        self.counters.record_transport_failure();
        self.log.record(ViolationRecord {
            op_id,
            key: None,
            kind: FailureKind::Transport,
            writer: None,
            reader: None,
            write_committed_at: None,
            detected_at: self.clock.now(),
            detail,
        });
    }
}

/// Drives runs against a store
#[derive(Debug, Clone)]
pub struct RunController {
    config: HarnessConfig,
}

impl RunController {
    pub fn new(config: HarnessConfig) -> Result<Self, RunError> {
        config.validate()?;
        Ok(RunController { config })
    }

    pub fn config(&self) -> &HarnessConfig {
        &self.config
    }

    /// Execute one run against `store`
    ///
    /// Counters and records start empty. The store is published to the pool
    /// once and shared by the coordinator and every worker.
    pub async fn run_once(&self, store: SharedStore) -> Result<RunResult, RunError> {
        let config = &self.config;
        let clock = RunClock::new();
        let counters = Arc::new(RunCounters::new());
        let log = Arc::new(ViolationLog::new(MAX_RECORDS));
        let abort = Arc::new(AtomicBool::new(false));

        let validator = ConsistencyValidator::new(config.payload_size, config.retry_delay);
        let task = ProbeTask::new(ContentAddresser::new(config.payload_size), validator, clock);
        let pool = WorkerPool::spawn(config.pool_config(), task)?;
        let store_ref = pool.share_reference(store.clone());

        let ctx = OpContext {
            writer: pool.create_handle(WRITE_OP),
            reader: pool.create_handle(VALIDATE_OP),
            store: store.clone(),
            store_ref,
            validator,
            read_mode: config.read_mode,
            counters: counters.clone(),
            log: log.clone(),
            clock,
            abort: abort.clone(),
        };
        let scheduler = BoundedScheduler::new(config.max_concurrent);

        info!(
            store = store.name(),
            workers = config.worker_count,
            max_concurrent = config.max_concurrent,
            batch_size = config.batch_size,
            read_mode = ?config.read_mode,
            strictness = ?config.strictness,
            "run started"
        );

        let mut batches: u64 = 0;
        let mut next_op: u64 = 0;
        let mut abort_reason = None;

        loop {
            let first_op = next_op;
            next_op += config.batch_size as u64;
            let ops = (first_op..next_op).map(|op_id| ctx.clone().execute(op_id));

            let result = scheduler.run_with_abort(ops, &abort).await;
            batches += 1;

            let rejected = result
                .settled
                .iter()
                .filter(|s| matches!(s, Settled::Done(OpStatus::Rejected) | Settled::Panicked(_)))
                .count();
            // A panic escaping an operation is a rejected call like any other
            for _ in 0..result.stats.panicked {
                counters.record_transport_failure();
            }

            let snapshot = counters.snapshot();
            info!(
                batch = batches,
                ops = result.stats.admitted,
                rejected,
                retries = snapshot.after_retry,
                violations = snapshot.violations,
                peak_in_flight = result.stats.peak_in_flight,
                elapsed_ms = clock.elapsed().as_millis() as u64,
                "batch done"
            );

            if abort.load(Ordering::SeqCst) {
                abort_reason = Some(AbortReason::Corruption);
                break;
            }
            if result.stats.admitted > 0 && rejected == result.stats.admitted {
                error!(batch = batches, "every operation in the batch was rejected, aborting run");
                abort_reason = Some(AbortReason::PoolExhausted);
                break;
            }
            if clock.elapsed() >= config.time_budget {
                break;
            }
            if config.max_batches.is_some_and(|max| batches >= max) {
                break;
            }
            if config.max_violations > 0 && snapshot.violations >= config.max_violations {
                warn!(
                    violations = snapshot.violations,
                    threshold = config.max_violations,
                    "violation threshold reached"
                );
                break;
            }
        }

        drop(ctx);
        let restarts = pool.restarts();
        pool.shutdown().await;

        let counters = counters.snapshot();
        let (records, dropped_records) = log.drain();
        let summary = RunSummary {
            verdict: Verdict::decide(&counters, config.strictness, abort_reason),
            counters,
            batches,
            elapsed: clock.elapsed(),
            restarts,
            strictness: config.strictness,
            read_mode: config.read_mode,
            records,
            dropped_records,
        };
        summary.log();
        Ok(summary)
    }

    /// Execute `runs` independent runs, each against a freshly opened store
    ///
    /// `open_store` receives the run index.
    pub async fn run_repeated<F, Fut>(&self, runs: usize, mut open_store: F) -> Result<FlakinessReport, RunError>
    where
        F: FnMut(usize) -> Fut,
        Fut: Future<Output = Result<SharedStore, StoreError>>,
    {
        let mut report = FlakinessReport::default();
        for run in 0..runs {
            let store = open_store(run).await?;
            let summary = self.run_once(store).await?;
            info!(run, verdict = %summary.verdict, "run complete");
            report.push(summary);
        }
        report.log();
        Ok(report)
    }
}
