//! Run-scoped outcome accumulator
//!
//! One `RunCounters` is created per run and shared by reference with every
//! operation of that run. Nothing here is process-global, so repeated or
//! concurrent runs never see each other's counts.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

use super::validator::{HardFailure, Outcome};

#[derive(Debug, Default)]
pub struct RunCounters {
    operations: AtomicU64,
    validations: AtomicU64,
    first_try: AtomicU64,
    after_retry: AtomicU64,
    violations: AtomicU64,
    corruptions: AtomicU64,
    transport_failures: AtomicU64,
}

impl RunCounters {
    pub fn new() -> Self {
        Self::default()
    }

    /// Count an operation entering the harness
    pub fn record_operation(&self) {
        self.operations.fetch_add(1, Ordering::SeqCst);
    }

    /// Count a worker call that was rejected before a read-back happened
    pub fn record_transport_failure(&self) {
        self.transport_failures.fetch_add(1, Ordering::SeqCst);
    }

    /// Count a classified read-back
    pub fn record(&self, outcome: &Outcome) {
        match outcome {
            Outcome::HardFailure {
                failure: HardFailure::Transport { .. },
            } => {
                self.record_transport_failure();
                return;
            }
            Outcome::FirstTry => {
                self.first_try.fetch_add(1, Ordering::SeqCst);
            }
            Outcome::AfterRetry { .. } => {
                self.after_retry.fetch_add(1, Ordering::SeqCst);
            }
            Outcome::Violation => {
                self.violations.fetch_add(1, Ordering::SeqCst);
            }
            Outcome::HardFailure {
                failure: HardFailure::Corruption { .. },
            } => {
                self.corruptions.fetch_add(1, Ordering::SeqCst);
            }
        }
        self.validations.fetch_add(1, Ordering::SeqCst);
    }

    pub fn violations(&self) -> u64 {
        self.violations.load(Ordering::SeqCst)
    }

    pub fn snapshot(&self) -> CounterSnapshot {
        CounterSnapshot {
            operations: self.operations.load(Ordering::SeqCst),
            validations: self.validations.load(Ordering::SeqCst),
            first_try: self.first_try.load(Ordering::SeqCst),
            after_retry: self.after_retry.load(Ordering::SeqCst),
            violations: self.violations.load(Ordering::SeqCst),
            corruptions: self.corruptions.load(Ordering::SeqCst),
            transport_failures: self.transport_failures.load(Ordering::SeqCst),
        }
    }
}

/// Point-in-time copy of the counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CounterSnapshot {
    /// Operations issued
    pub operations: u64,
    /// Read-backs that produced a classification
    pub validations: u64,
    pub first_try: u64,
    /// Reads that needed the retry
    pub after_retry: u64,
    pub violations: u64,
    pub corruptions: u64,
    /// Rejected worker calls (write or remote read)
    pub transport_failures: u64,
}

impl CounterSnapshot {
    /// Keys readable within the retry budget
    pub fn successes(&self) -> u64 {
        self.first_try + self.after_retry
    }

    pub fn retries(&self) -> u64 {
        self.after_retry
    }

    /// Every validation landed in exactly one class
    pub fn is_exhaustive(&self) -> bool {
        self.first_try + self.after_retry + self.violations + self.corruptions == self.validations
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::validator::Corruption;
    use std::time::Duration;

    #[test]
    fn test_record_each_class() {
        let counters = RunCounters::new();
        counters.record(&Outcome::FirstTry);
        counters.record(&Outcome::FirstTry);
        counters.record(&Outcome::AfterRetry { waited: Duration::ZERO });
        counters.record(&Outcome::Violation);
        counters.record(&Outcome::corruption(Corruption::DigestMismatch));
        counters.record(&Outcome::transport("closed"));

        let snap = counters.snapshot();
        assert_eq!(snap.first_try, 2);
        assert_eq!(snap.after_retry, 1);
        assert_eq!(snap.violations, 1);
        assert_eq!(snap.corruptions, 1);
        assert_eq!(snap.transport_failures, 1);
        assert_eq!(snap.validations, 5);
        assert_eq!(snap.successes(), 3);
        assert_eq!(snap.retries(), 1);
        assert!(snap.is_exhaustive());
    }

    #[test]
    fn test_separate_runs_do_not_share_counts() {
        let first = RunCounters::new();
        let second = RunCounters::new();
        first.record(&Outcome::Violation);
        first.record_operation();

        assert_eq!(first.violations(), 1);
        assert_eq!(second.snapshot(), CounterSnapshot::default());
    }
}
