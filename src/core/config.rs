//! Harness configuration parameters

use std::time::Duration;

use serde::Serialize;
use thiserror::Error;
use tracing::warn;

use crate::content::DEFAULT_PAYLOAD_SIZE;
use crate::pool::PoolConfig;

/// How a read that needed its retry is judged
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, clap::ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum Strictness {
    /// A successful retry is tolerated eventual-consistency lag
    Lenient,
    /// Any retry fails the run: the write had already been acknowledged
    Strict,
}

/// Where the read-back of a written key happens
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, clap::ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum ReadMode {
    /// A worker writes, the coordinator reads through its own handle
    Coordinator,
    /// Worker A writes, a different worker B reads
    CrossWorker,
}

/// Configuration rejected by `HarnessConfig::validate`
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("{0} must be at least 1")]
    Zero(&'static str),
    /// Cross-worker reads need a reader other than the writer
    #[error("cross-worker reads need at least 2 workers, got {0}")]
    CrossWorkerNeedsPeer(usize),
}

/// Configuration for a probe run
#[derive(Debug, Clone, Serialize)]
pub struct HarnessConfig {
    /// Number of pool workers (default: 4)
    pub worker_count: usize,
    /// Calls each worker runs at once (default: 200)
    pub per_worker_concurrency: usize,
    /// Operations the scheduler keeps in flight (default: 200)
    pub max_concurrent: usize,
    /// Operations per batch (default: 20000)
    pub batch_size: usize,
    /// Payload size in bytes (default: 10000)
    pub payload_size: usize,
    /// Wall-clock budget; checked between batches (default: 1s)
    pub time_budget: Duration,
    /// Stop after this many batches even if budget remains (default: none)
    pub max_batches: Option<u64>,
    /// Wait before the single retry of a missed read (default: 0)
    pub retry_delay: Duration,
    /// Whether a successful retry fails the run (default: lenient)
    pub strictness: Strictness,
    /// Where reads happen (default: coordinator)
    pub read_mode: ReadMode,
    /// How long pool shutdown waits for in-flight calls (default: 500ms)
    pub teardown_timeout: Duration,
    /// Stop after the batch in which this many violations accumulated;
    /// 0 means never stop early (default: 0)
    pub max_violations: u64,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            worker_count: 4,
            per_worker_concurrency: 200,
            max_concurrent: 200,
            batch_size: 20_000,
            payload_size: DEFAULT_PAYLOAD_SIZE,
            time_budget: Duration::from_secs(1),
            max_batches: None,
            retry_delay: Duration::ZERO,
            strictness: Strictness::Lenient,
            read_mode: ReadMode::Coordinator,
            teardown_timeout: Duration::from_millis(500),
            max_violations: 0,
        }
    }
}

impl HarnessConfig {
    pub fn with_workers(mut self, worker_count: usize, per_worker_concurrency: usize) -> Self {
        self.worker_count = worker_count;
        self.per_worker_concurrency = per_worker_concurrency;
        self
    }

    pub fn with_max_concurrent(mut self, max_concurrent: usize) -> Self {
        self.max_concurrent = max_concurrent;
        self
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    pub fn with_payload_size(mut self, payload_size: usize) -> Self {
        self.payload_size = payload_size;
        self
    }

    pub fn with_time_budget(mut self, time_budget: Duration) -> Self {
        self.time_budget = time_budget;
        self
    }

    pub fn with_max_batches(mut self, max_batches: u64) -> Self {
        self.max_batches = Some(max_batches);
        self
    }

    pub fn with_retry_delay(mut self, retry_delay: Duration) -> Self {
        self.retry_delay = retry_delay;
        self
    }

    pub fn with_strictness(mut self, strictness: Strictness) -> Self {
        self.strictness = strictness;
        self
    }

    pub fn with_read_mode(mut self, read_mode: ReadMode) -> Self {
        self.read_mode = read_mode;
        self
    }

    pub fn with_teardown_timeout(mut self, teardown_timeout: Duration) -> Self {
        self.teardown_timeout = teardown_timeout;
        self
    }

    /// Set to 0 to never stop early on violations
    pub fn with_max_violations(mut self, max_violations: u64) -> Self {
        self.max_violations = max_violations;
        self
    }

    /// Reject unusable values
    ///
    /// A global cap above the pool's capacity is allowed but logged, since the
    /// excess only queues at the workers.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let required = [
            ("worker_count", self.worker_count),
            ("per_worker_concurrency", self.per_worker_concurrency),
            ("max_concurrent", self.max_concurrent),
            ("batch_size", self.batch_size),
            ("payload_size", self.payload_size),
        ];
        for (name, value) in required {
            if value == 0 {
                return Err(ConfigError::Zero(name));
            }
        }

        if self.read_mode == ReadMode::CrossWorker && self.worker_count < 2 {
            return Err(ConfigError::CrossWorkerNeedsPeer(self.worker_count));
        }

        let capacity = self.pool_config().capacity();
        if self.max_concurrent > capacity {
            warn!(
                max_concurrent = self.max_concurrent,
                pool_capacity = capacity,
                "global concurrency exceeds pool capacity; excess calls will queue at workers"
            );
        }
        Ok(())
    }

    /// Pool parameters derived from this configuration
    pub fn pool_config(&self) -> PoolConfig {
        PoolConfig {
            worker_count: self.worker_count,
            max_in_flight_per_worker: self.per_worker_concurrency,
            teardown_timeout: self.teardown_timeout,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = HarnessConfig::default();
        assert_eq!(config.worker_count, 4);
        assert_eq!(config.per_worker_concurrency, 200);
        assert_eq!(config.max_concurrent, 200);
        assert_eq!(config.batch_size, 20_000);
        assert_eq!(config.payload_size, 10_000);
        assert_eq!(config.time_budget, Duration::from_secs(1));
        assert_eq!(config.strictness, Strictness::Lenient);
        assert_eq!(config.read_mode, ReadMode::Coordinator);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_builders() {
        let config = HarnessConfig::default()
            .with_workers(2, 8)
            .with_max_concurrent(16)
            .with_batch_size(100)
            .with_payload_size(64)
            .with_max_batches(3)
            .with_retry_delay(Duration::from_millis(5))
            .with_strictness(Strictness::Strict)
            .with_read_mode(ReadMode::CrossWorker)
            .with_max_violations(1);

        assert_eq!(config.worker_count, 2);
        assert_eq!(config.per_worker_concurrency, 8);
        assert_eq!(config.max_concurrent, 16);
        assert_eq!(config.batch_size, 100);
        assert_eq!(config.payload_size, 64);
        assert_eq!(config.max_batches, Some(3));
        assert_eq!(config.retry_delay, Duration::from_millis(5));
        assert_eq!(config.strictness, Strictness::Strict);
        assert_eq!(config.read_mode, ReadMode::CrossWorker);
        assert_eq!(config.max_violations, 1);
    }

    #[test]
    fn test_zero_values_rejected() {
        let config = HarnessConfig::default().with_batch_size(0);
        assert_eq!(config.validate(), Err(ConfigError::Zero("batch_size")));

        let config = HarnessConfig::default().with_workers(0, 1);
        assert_eq!(config.validate(), Err(ConfigError::Zero("worker_count")));
    }

    #[test]
    fn test_cross_worker_requires_two_workers() {
        let single = HarnessConfig::default()
            .with_workers(1, 4)
            .with_read_mode(ReadMode::CrossWorker);
        assert_eq!(single.validate(), Err(ConfigError::CrossWorkerNeedsPeer(1)));

        assert!(single.clone().with_read_mode(ReadMode::Coordinator).validate().is_ok());
        assert!(single.with_workers(2, 4).validate().is_ok());
    }

    #[test]
    fn test_cap_above_capacity_is_allowed() {
        let config = HarnessConfig::default().with_workers(1, 2).with_max_concurrent(10);
        assert!(config.validate().is_ok());
        assert_eq!(config.pool_config().capacity(), 2);
    }
}
