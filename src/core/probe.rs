//! Worker-side probe operations
//!
//! `ProbeTask` is the task every pool worker runs. It implements two named
//! operations against the store published to the pool:
//! - `write`: generate a payload, store it under its content key, and return
//!   a receipt once the store acknowledges it
//! - `validate`: read a key back through the validator

use async_trait::async_trait;
use tracing::debug;

use super::validator::{ConsistencyValidator, Outcome};
use crate::content::{BlobKey, ContentAddresser};
use crate::pool::{RefHandle, TaskError, WorkerContext, WorkerId, WorkerTask};
use crate::report::{RunClock, Timestamp};
use crate::store::SharedStore;

pub const WRITE_OP: &str = "write";
pub const VALIDATE_OP: &str = "validate";

/// Input of both probe operations
#[derive(Debug, Clone, Copy)]
pub struct ProbeRequest {
    /// Store published to the pool
    pub store: RefHandle<SharedStore>,
    /// Key to read back; only used by `validate`
    pub key: Option<BlobKey>,
}

impl ProbeRequest {
    pub fn write(store: RefHandle<SharedStore>) -> Self {
        ProbeRequest { store, key: None }
    }

    pub fn validate(store: RefHandle<SharedStore>, key: BlobKey) -> Self {
        ProbeRequest {
            store,
            key: Some(key),
        }
    }
}

/// Acknowledged write
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WriteReceipt {
    pub key: BlobKey,
    /// Worker whose `put` returned
    pub worker: WorkerId,
    pub committed_at: Timestamp,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeReply {
    Written(WriteReceipt),
    Validated(Outcome),
}

/// Task run by every worker of a probe pool
pub struct ProbeTask {
    addresser: ContentAddresser,
    validator: ConsistencyValidator,
    clock: RunClock,
}

impl ProbeTask {
    pub fn new(addresser: ContentAddresser, validator: ConsistencyValidator, clock: RunClock) -> Self {
        ProbeTask {
            addresser,
            validator,
            clock,
        }
    }

    async fn write(&self, ctx: &WorkerContext, request: ProbeRequest) -> Result<ProbeReply, TaskError> {
        let store = ctx.shared(request.store)?;
        let (payload, key) = self.addresser.generate();
        store
            .put(key, payload)
            .await
            .map_err(|e| TaskError::Failed(format!("put {}: {}", key.short(), e)))?;

        debug!(worker = %ctx.worker_id(), key = %key.short(), "write acknowledged");
        Ok(ProbeReply::Written(WriteReceipt {
            key,
            worker: ctx.worker_id(),
            committed_at: self.clock.now(),
        }))
    }

    async fn validate(
        &self,
        ctx: &WorkerContext,
        request: ProbeRequest,
    ) -> Result<ProbeReply, TaskError> {
        let key = request
            .key
            .ok_or_else(|| TaskError::InvalidInput("validate requires a key".into()))?;
        let store = ctx.shared(request.store)?;
        let outcome = self.validator.validate(&**store, &key).await;
        Ok(ProbeReply::Validated(outcome))
    }
}

#[async_trait]
impl WorkerTask for ProbeTask {
    type Input = ProbeRequest;
    type Output = ProbeReply;

    async fn call(
        &self,
        ctx: &WorkerContext,
        operation: &str,
        input: ProbeRequest,
    ) -> Result<ProbeReply, TaskError> {
        match operation {
            WRITE_OP => self.write(ctx, input).await,
            VALIDATE_OP => self.validate(ctx, input).await,
            other => Err(TaskError::UnknownOperation(other.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::SharedRefs;
    use crate::store::{BlobStore, MemoryStore, PurgingStore};
    use crate::testing::FailingStore;
    use std::sync::Arc;
    use std::time::Duration;

    const SIZE: usize = 128;

    fn task() -> ProbeTask {
        ProbeTask::new(
            ContentAddresser::new(SIZE),
            ConsistencyValidator::new(SIZE, Duration::ZERO),
            RunClock::new(),
        )
    }

    /// Context for worker `id` with `store` already published
    fn context(id: usize, store: SharedStore) -> (WorkerContext, RefHandle<SharedStore>) {
        let refs = SharedRefs::new();
        let handle = refs.publish(store);
        (WorkerContext::new(WorkerId(id), refs), handle)
    }

    #[tokio::test]
    async fn test_write_stores_content_addressed_payload() {
        let memory = Arc::new(MemoryStore::new());
        let (ctx, store) = context(2, memory.clone());

        let reply = task().call(&ctx, WRITE_OP, ProbeRequest::write(store)).await.unwrap();
        let receipt = match reply {
            ProbeReply::Written(receipt) => receipt,
            other => panic!("unexpected reply: {:?}", other),
        };

        assert_eq!(receipt.worker, WorkerId(2));
        let stored = memory.get(&receipt.key).await.unwrap().unwrap();
        assert_eq!(stored.len(), SIZE);
        assert_eq!(stored.key(), receipt.key);
    }

    #[tokio::test]
    async fn test_validate_after_write_is_first_try() {
        let (ctx, store) = context(0, Arc::new(MemoryStore::new()));
        let task = task();

        let key = match task.call(&ctx, WRITE_OP, ProbeRequest::write(store)).await.unwrap() {
            ProbeReply::Written(receipt) => receipt.key,
            other => panic!("unexpected reply: {:?}", other),
        };
        let reply = task
            .call(&ctx, VALIDATE_OP, ProbeRequest::validate(store, key))
            .await
            .unwrap();

        assert_eq!(reply, ProbeReply::Validated(Outcome::FirstTry));
    }

    #[tokio::test]
    async fn test_validate_purged_key_is_violation() {
        let purging: SharedStore = Arc::new(PurgingStore::new(Arc::new(MemoryStore::new()), 1));
        let (ctx, store) = context(0, purging);
        let task = task();

        let key = match task.call(&ctx, WRITE_OP, ProbeRequest::write(store)).await.unwrap() {
            ProbeReply::Written(receipt) => receipt.key,
            other => panic!("unexpected reply: {:?}", other),
        };
        let reply = task
            .call(&ctx, VALIDATE_OP, ProbeRequest::validate(store, key))
            .await
            .unwrap();

        assert_eq!(reply, ProbeReply::Validated(Outcome::Violation));
    }

    #[tokio::test]
    async fn test_failed_put_is_task_error() {
        let (ctx, store) = context(0, Arc::new(FailingStore));

        let err = task()
            .call(&ctx, WRITE_OP, ProbeRequest::write(store))
            .await
            .unwrap_err();
        assert!(matches!(err, TaskError::Failed(ref m) if m.contains("disk unavailable")));
    }

    #[tokio::test]
    async fn test_validate_without_key_is_rejected() {
        let (ctx, store) = context(0, Arc::new(MemoryStore::new()));

        let err = task()
            .call(&ctx, VALIDATE_OP, ProbeRequest::write(store))
            .await
            .unwrap_err();
        assert!(matches!(err, TaskError::InvalidInput(_)));
    }

    #[tokio::test]
    async fn test_unpublished_store_is_missing_reference() {
        let (_, store) = context(0, Arc::new(MemoryStore::new()));
        let ctx = WorkerContext::new(WorkerId(0), SharedRefs::new());

        let err = task()
            .call(&ctx, WRITE_OP, ProbeRequest::write(store))
            .await
            .unwrap_err();
        assert_eq!(err, TaskError::MissingReference(store.id()));
    }

    #[tokio::test]
    async fn test_unknown_operation() {
        let (ctx, store) = context(0, Arc::new(MemoryStore::new()));
        let err = task().call(&ctx, "delete", ProbeRequest::write(store)).await.unwrap_err();
        assert_eq!(err, TaskError::UnknownOperation("delete".into()));
    }
}
