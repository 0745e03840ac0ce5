//! Task abstraction executed by pool workers

use std::fmt;

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;

use super::shared::WorkerContext;

/// Worker identifier, the index of the worker within its pool
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct WorkerId(pub usize);

impl fmt::Display for WorkerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "worker-{}", self.0)
    }
}

/// Errors raised by a task while executing an operation
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TaskError {
    /// The handle named an operation the task does not implement
    #[error("unknown operation: {0}")]
    UnknownOperation(String),
    /// A shared reference was not published to the pool
    #[error("shared reference {0} is not published")]
    MissingReference(u64),
    /// Operation input was not valid for the named operation
    #[error("invalid input: {0}")]
    InvalidInput(String),
    /// The operation itself failed
    #[error("operation failed: {0}")]
    Failed(String),
}

/// Definition of the work a pool runs
///
/// One instance is shared by every worker. Each call receives the context of
/// the worker executing it, through which published references (such as the
/// store handle) are reached.
#[async_trait]
pub trait WorkerTask: Send + Sync + 'static {
    type Input: Send + 'static;
    type Output: Send + 'static;

    /// Execute `operation` with `input` on the worker described by `ctx`
    async fn call(
        &self,
        ctx: &WorkerContext,
        operation: &str,
        input: Self::Input,
    ) -> Result<Self::Output, TaskError>;
}
