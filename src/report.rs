//! Run reporting types
//!
//! Timestamps relative to run start, records of individual failed
//! operations, and the per-run and multi-run summaries printed at the end
//! and optionally written as JSON.

use std::fmt;
use std::time::Duration;

use parking_lot::Mutex;
use serde::Serialize;
use tokio::time::Instant;
use tracing::{info, warn};

use crate::core::config::{ReadMode, Strictness};
use crate::core::counters::CounterSnapshot;
use crate::pool::WorkerId;

/// Records kept per run; later failures are only counted
pub const MAX_RECORDS: usize = 1000;

/// Microsecond timestamp relative to run start
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct Timestamp(pub u64);

impl Timestamp {
    pub fn from_micros(micros: u64) -> Self {
        Timestamp(micros)
    }

    pub fn as_micros(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "+{}.{:03}ms", self.0 / 1000, self.0 % 1000)
    }
}

/// Clock started at the beginning of a run
///
/// Built on `tokio::time::Instant` so paused-time tests observe it.
#[derive(Clone, Copy, Debug)]
pub struct RunClock {
    start: Instant,
}

impl Default for RunClock {
    fn default() -> Self {
        Self::new()
    }
}

impl RunClock {
    pub fn new() -> Self {
        RunClock {
            start: Instant::now(),
        }
    }

    /// Current time relative to run start
    pub fn now(&self) -> Timestamp {
        Timestamp(self.elapsed().as_micros() as u64)
    }

    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }
}

/// Where a read-back was performed
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ReadContext {
    Coordinator,
    Worker(WorkerId),
}

impl fmt::Display for ReadContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReadContext::Coordinator => write!(f, "coordinator"),
            ReadContext::Worker(id) => write!(f, "{}", id),
        }
    }
}

/// Class of a recorded failure
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum FailureKind {
    /// Acknowledged write not visible after the retry
    Violation,
    /// Returned payload of the wrong size or content
    Corruption,
    /// Worker call rejected
    Transport,
}

/// One failed operation, with enough detail to reproduce the race
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ViolationRecord {
    pub op_id: u64,
    /// Hex key, absent when the write itself was rejected
    pub key: Option<String>,
    pub kind: FailureKind,
    /// Worker that acknowledged the write
    pub writer: Option<WorkerId>,
    pub reader: Option<ReadContext>,
    pub write_committed_at: Option<Timestamp>,
    pub detected_at: Timestamp,
    pub detail: String,
}

/// Bounded, thread-safe collection of failure records for one run
#[derive(Debug)]
pub struct ViolationLog {
    records: Mutex<Vec<ViolationRecord>>,
    dropped: Mutex<u64>,
    limit: usize,
}

impl Default for ViolationLog {
    fn default() -> Self {
        Self::new(MAX_RECORDS)
    }
}

impl ViolationLog {
    pub fn new(limit: usize) -> Self {
        ViolationLog {
            records: Mutex::new(Vec::new()),
            dropped: Mutex::new(0),
            limit,
        }
    }

    pub fn record(&self, record: ViolationRecord) {
        let mut records = self.records.lock();
        if records.len() < self.limit {
            records.push(record);
        } else {
            *self.dropped.lock() += 1;
        }
    }

    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.lock().is_empty()
    }

    /// Kept records sorted by detection time, and the number not kept
    pub fn drain(&self) -> (Vec<ViolationRecord>, u64) {
        let mut records = std::mem::take(&mut *self.records.lock());
        records.sort_by_key(|r| (r.detected_at, r.op_id));
        let dropped = std::mem::take(&mut *self.dropped.lock());
        (records, dropped)
    }
}

/// Why a run stopped before its budget
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum AbortReason {
    /// A read returned a corrupted payload
    Corruption,
    /// Every operation of a batch was rejected by the pool
    PoolExhausted,
}

impl fmt::Display for AbortReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AbortReason::Corruption => write!(f, "corruption"),
            AbortReason::PoolExhausted => write!(f, "worker pool exhausted"),
        }
    }
}

/// Terminal state of a run
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "verdict", rename_all = "kebab-case")]
pub enum Verdict {
    Passed,
    Failed,
    Aborted { reason: AbortReason },
}

impl Verdict {
    pub fn is_pass(&self) -> bool {
        matches!(self, Verdict::Passed)
    }

    /// Decide the verdict from final counters
    ///
    /// Violations and rejected calls fail the run; so does any retry when
    /// strict.
    pub fn decide(
        counters: &CounterSnapshot,
        strictness: Strictness,
        abort: Option<AbortReason>,
    ) -> Verdict {
        if let Some(reason) = abort {
            return Verdict::Aborted { reason };
        }
        let soft_violations = match strictness {
            Strictness::Strict => counters.after_retry,
            Strictness::Lenient => 0,
        };
        if counters.violations > 0 || counters.transport_failures > 0 || soft_violations > 0 {
            Verdict::Failed
        } else {
            Verdict::Passed
        }
    }
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Verdict::Passed => write!(f, "passed"),
            Verdict::Failed => write!(f, "failed"),
            Verdict::Aborted { reason } => write!(f, "aborted ({})", reason),
        }
    }
}

/// Final result of one run
#[derive(Clone, Debug, Serialize)]
pub struct RunSummary {
    pub verdict: Verdict,
    pub counters: CounterSnapshot,
    pub batches: u64,
    pub elapsed: Duration,
    /// Worker crash-restarts during the run
    pub restarts: u64,
    pub strictness: Strictness,
    pub read_mode: ReadMode,
    pub records: Vec<ViolationRecord>,
    /// Failures beyond `MAX_RECORDS`, counted but not kept
    pub dropped_records: u64,
}

impl RunSummary {
    pub fn operations(&self) -> u64 {
        self.counters.operations
    }

    pub fn successes(&self) -> u64 {
        self.counters.successes()
    }

    pub fn retries(&self) -> u64 {
        self.counters.retries()
    }

    pub fn violations(&self) -> u64 {
        self.counters.violations
    }

    /// Emit the summary and the first few records
    pub fn log(&self) {
        info!(
            verdict = %self.verdict,
            operations = self.operations(),
            successes = self.successes(),
            retries = self.retries(),
            violations = self.violations(),
            corruptions = self.counters.corruptions,
            transport_failures = self.counters.transport_failures,
            batches = self.batches,
            restarts = self.restarts,
            elapsed_ms = self.elapsed.as_millis() as u64,
            "run finished"
        );
        for record in self.records.iter().take(10) {
            warn!(
                op = record.op_id,
                kind = ?record.kind,
                key = record.key.as_deref().unwrap_or("-"),
                writer = ?record.writer,
                reader = ?record.reader,
                at = %record.detected_at,
                detail = %record.detail,
                "failed operation"
            );
        }
        if self.records.len() > 10 || self.dropped_records > 0 {
            warn!(
                more = self.records.len().saturating_sub(10) as u64 + self.dropped_records,
                "further failed operations omitted"
            );
        }
    }
}

/// Aggregate of repeated runs
#[derive(Clone, Debug, Default, Serialize)]
pub struct FlakinessReport {
    pub runs: u64,
    pub passed: u64,
    pub failed: u64,
    pub aborted: u64,
    pub summaries: Vec<RunSummary>,
}

impl FlakinessReport {
    pub fn push(&mut self, summary: RunSummary) {
        self.runs += 1;
        match summary.verdict {
            Verdict::Passed => self.passed += 1,
            Verdict::Failed => self.failed += 1,
            Verdict::Aborted { .. } => self.aborted += 1,
        }
        self.summaries.push(summary);
    }

    /// Fraction of runs that did not pass
    pub fn failure_rate(&self) -> f64 {
        if self.runs == 0 {
            return 0.0;
        }
        (self.failed + self.aborted) as f64 / self.runs as f64
    }

    pub fn all_passed(&self) -> bool {
        self.passed == self.runs
    }

    pub fn log(&self) {
        info!(
            runs = self.runs,
            passed = self.passed,
            failed = self.failed,
            aborted = self.aborted,
            failure_rate = self.failure_rate(),
            "flakiness report"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn summary(verdict: Verdict) -> RunSummary {
        RunSummary {
            verdict,
            counters: CounterSnapshot::default(),
            batches: 1,
            elapsed: Duration::from_millis(10),
            restarts: 0,
            strictness: Strictness::Lenient,
            read_mode: ReadMode::Coordinator,
            records: Vec::new(),
            dropped_records: 0,
        }
    }

    fn record(op_id: u64, detected_at: u64) -> ViolationRecord {
        ViolationRecord {
            op_id,
            key: None,
            kind: FailureKind::Violation,
            writer: Some(WorkerId(0)),
            reader: Some(ReadContext::Coordinator),
            write_committed_at: None,
            detected_at: Timestamp(detected_at),
            detail: String::new(),
        }
    }

    #[test]
    fn test_timestamp_ordering_and_display() {
        assert!(Timestamp(100) < Timestamp(200));
        assert_eq!(Timestamp::from_micros(1_500).as_micros(), 1_500);
        assert_eq!(Timestamp(12_034).to_string(), "+12.034ms");
    }

    #[tokio::test(start_paused = true)]
    async fn test_clock_follows_tokio_time() {
        let clock = RunClock::new();
        tokio::time::advance(Duration::from_millis(3)).await;
        assert_eq!(clock.now(), Timestamp(3_000));
    }

    #[test]
    fn test_log_is_bounded_and_sorted() {
        let log = ViolationLog::new(2);
        log.record(record(1, 30));
        log.record(record(2, 10));
        log.record(record(3, 20));

        assert_eq!(log.len(), 2);
        let (records, dropped) = log.drain();
        assert_eq!(dropped, 1);
        assert_eq!(records.iter().map(|r| r.op_id).collect::<Vec<_>>(), vec![2, 1]);
        assert!(log.is_empty());
    }

    #[test]
    fn test_verdict_rules() {
        let clean = CounterSnapshot {
            operations: 10,
            validations: 10,
            first_try: 8,
            after_retry: 2,
            ..Default::default()
        };
        assert_eq!(Verdict::decide(&clean, Strictness::Lenient, None), Verdict::Passed);
        assert_eq!(Verdict::decide(&clean, Strictness::Strict, None), Verdict::Failed);

        let violated = CounterSnapshot {
            violations: 1,
            ..clean
        };
        assert_eq!(Verdict::decide(&violated, Strictness::Lenient, None), Verdict::Failed);

        let rejected = CounterSnapshot {
            transport_failures: 1,
            ..Default::default()
        };
        assert_eq!(Verdict::decide(&rejected, Strictness::Lenient, None), Verdict::Failed);

        assert_eq!(
            Verdict::decide(&clean, Strictness::Lenient, Some(AbortReason::Corruption)),
            Verdict::Aborted {
                reason: AbortReason::Corruption
            }
        );
    }

    #[test]
    fn test_flakiness_report() {
        let mut report = FlakinessReport::default();
        assert_eq!(report.failure_rate(), 0.0);

        report.push(summary(Verdict::Passed));
        report.push(summary(Verdict::Failed));
        report.push(summary(Verdict::Passed));
        report.push(summary(Verdict::Aborted {
            reason: AbortReason::PoolExhausted,
        }));

        assert_eq!(report.runs, 4);
        assert_eq!(report.passed, 2);
        assert_eq!(report.failed, 1);
        assert_eq!(report.aborted, 1);
        assert_eq!(report.failure_rate(), 0.5);
        assert!(!report.all_passed());
    }

    #[test]
    fn test_summary_serializes() {
        let json = serde_json::to_value(summary(Verdict::Aborted {
            reason: AbortReason::Corruption,
        }))
        .unwrap();
        assert_eq!(json["verdict"]["verdict"], "aborted");
        assert_eq!(json["verdict"]["reason"], "corruption");
        assert_eq!(json["read_mode"], "coordinator");
    }
}
