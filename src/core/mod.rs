//! Consistency-probing engine
//!
//! - `config`: run parameters
//! - `scheduler`: bounded concurrent execution of operations
//! - `validator`: read-back with a single bounded retry
//! - `counters`: run-scoped outcome totals
//! - `probe`: the task pool workers run
//! - `controller`: batches, stop conditions and the verdict

pub mod config;
pub mod controller;
pub mod counters;
pub mod probe;
pub mod scheduler;
pub mod validator;

pub use config::{ConfigError, HarnessConfig, ReadMode, Strictness};
pub use controller::{RunController, RunError, RunResult};
pub use counters::{CounterSnapshot, RunCounters};
pub use scheduler::{BatchResult, BatchStats, BoundedScheduler, Settled};
pub use validator::{ConsistencyValidator, Corruption, HardFailure, Outcome};
