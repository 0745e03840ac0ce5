//! Consistency validator
//!
//! Reads back a key that was acknowledged as written and classifies what it
//! finds. A miss gets exactly one more chance after a bounded wait:
//!
//! ```text
//! Pending --hit--------------------------> Resolved(FirstTry)
//!    |--miss/error--> Retrying --hit-----> Resolved(AfterRetry)
//!                         |----miss------> Violated
//! (any read) --wrong size or digest------> Resolved(HardFailure)
//! ```

use std::fmt;
use std::time::Duration;

use serde::Serialize;
use tracing::debug;

use crate::content::BlobKey;
use crate::store::{BlobStore, StoreError};

/// Why a returned payload is unusable
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum Corruption {
    /// Payload length differs from the configured size
    WrongLength { expected: usize, actual: usize },
    /// Payload has the right size but does not hash to its key
    DigestMismatch,
    /// The store itself reported an integrity failure
    Reported { message: String },
}

impl fmt::Display for Corruption {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Corruption::WrongLength { expected, actual } => {
                write!(f, "expected {} bytes, got {}", expected, actual)
            }
            Corruption::DigestMismatch => write!(f, "payload does not hash to its key"),
            Corruption::Reported { message } => write!(f, "store reported: {}", message),
        }
    }
}

/// Failure that is not a visibility question
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum HardFailure {
    Corruption { corruption: Corruption },
    /// A worker call was rejected (crash or closed pool)
    Transport { message: String },
}

/// Classification of one read-back
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "kebab-case")]
pub enum Outcome {
    /// Visible on the first read
    FirstTry,
    /// Missed, then visible after the retry wait
    AfterRetry { waited: Duration },
    /// Missed on both reads
    Violation,
    HardFailure { failure: HardFailure },
}

impl Outcome {
    pub fn corruption(corruption: Corruption) -> Self {
        Outcome::HardFailure {
            failure: HardFailure::Corruption { corruption },
        }
    }

    pub fn transport(message: impl Into<String>) -> Self {
        Outcome::HardFailure {
            failure: HardFailure::Transport {
                message: message.into(),
            },
        }
    }

    /// Whether the key was readable within the retry budget
    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::FirstTry | Outcome::AfterRetry { .. })
    }

    pub fn is_corruption(&self) -> bool {
        matches!(
            self,
            Outcome::HardFailure {
                failure: HardFailure::Corruption { .. }
            }
        )
    }
}

/// Result of a single read attempt
enum Read {
    Hit,
    NotVisible(String),
    Corrupt(Corruption),
}

/// Retry state machine driving one validation
enum ProbeState {
    Pending,
    Retrying { reason: String },
    Resolved(Outcome),
    Violated,
}

/// Reads back keys and classifies visibility
#[derive(Debug, Clone, Copy)]
pub struct ConsistencyValidator {
    expected_len: usize,
    retry_delay: Duration,
}

impl ConsistencyValidator {
    pub fn new(expected_len: usize, retry_delay: Duration) -> Self {
        ConsistencyValidator {
            expected_len,
            retry_delay,
        }
    }

    pub fn expected_len(&self) -> usize {
        self.expected_len
    }

    pub fn retry_delay(&self) -> Duration {
        self.retry_delay
    }

    /// Classify the visibility of `key` in `store`
    ///
    /// Performs at most two reads.
    pub async fn validate(&self, store: &dyn BlobStore, key: &BlobKey) -> Outcome {
        let mut state = ProbeState::Pending;
        loop {
            state = match state {
                ProbeState::Pending => match self.read(store, key).await {
                    Read::Hit => ProbeState::Resolved(Outcome::FirstTry),
                    Read::NotVisible(reason) => ProbeState::Retrying { reason },
                    Read::Corrupt(c) => ProbeState::Resolved(Outcome::corruption(c)),
                },
                ProbeState::Retrying { reason } => {
                    debug!(key = %key.short(), %reason, "retrying read");
                    self.wait().await;
                    match self.read(store, key).await {
                        Read::Hit => ProbeState::Resolved(Outcome::AfterRetry {
                            waited: self.retry_delay,
                        }),
                        Read::NotVisible(_) => ProbeState::Violated,
                        Read::Corrupt(c) => ProbeState::Resolved(Outcome::corruption(c)),
                    }
                }
                ProbeState::Resolved(outcome) => return outcome,
                ProbeState::Violated => return Outcome::Violation,
            };
        }
    }

    async fn wait(&self) {
        if self.retry_delay.is_zero() {
            tokio::task::yield_now().await;
        } else {
            tokio::time::sleep(self.retry_delay).await;
        }
    }

    async fn read(&self, store: &dyn BlobStore, key: &BlobKey) -> Read {
        match store.get(key).await {
            Ok(Some(payload)) if payload.len() != self.expected_len => {
                Read::Corrupt(Corruption::WrongLength {
                    expected: self.expected_len,
                    actual: payload.len(),
                })
            }
            Ok(Some(payload)) if payload.key() != *key => Read::Corrupt(Corruption::DigestMismatch),
            Ok(Some(_)) => Read::Hit,
            Ok(None) => Read::NotVisible("miss".to_string()),
            Err(StoreError::Corruption(message)) => Read::Corrupt(Corruption::Reported { message }),
            Err(e) => Read::NotVisible(e.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::content::{ContentAddresser, Payload};
    use crate::store::{CorruptingStore, DelayedCommitStore, MemoryStore, SharedStore};
    use crate::testing::{CountingStore, ScriptedStore};
    use std::sync::Arc;

    const SIZE: usize = 64;

    fn validator(delay_ms: u64) -> ConsistencyValidator {
        ConsistencyValidator::new(SIZE, Duration::from_millis(delay_ms))
    }

    #[tokio::test]
    async fn test_visible_key_is_first_try() {
        let store = MemoryStore::new();
        let (payload, key) = ContentAddresser::new(SIZE).generate();
        store.put(key, payload).await.unwrap();

        assert_eq!(validator(0).validate(&store, &key).await, Outcome::FirstTry);
    }

    #[tokio::test(start_paused = true)]
    async fn test_lagging_key_resolves_after_retry() {
        let inner: SharedStore = Arc::new(MemoryStore::new());
        let store = DelayedCommitStore::new(inner, Duration::from_millis(50));
        let (payload, key) = ContentAddresser::new(SIZE).generate();
        store.put(key, payload).await.unwrap();

        let outcome = validator(50).validate(&store, &key).await;
        assert_eq!(
            outcome,
            Outcome::AfterRetry {
                waited: Duration::from_millis(50)
            }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_lag_longer_than_delay_is_violation() {
        let inner: SharedStore = Arc::new(MemoryStore::new());
        let store = DelayedCommitStore::new(inner, Duration::from_millis(500));
        let (payload, key) = ContentAddresser::new(SIZE).generate();
        store.put(key, payload).await.unwrap();

        assert_eq!(validator(50).validate(&store, &key).await, Outcome::Violation);
    }

    #[tokio::test]
    async fn test_missing_key_reads_exactly_twice() {
        let store = CountingStore::new(Arc::new(MemoryStore::new()));
        let (_, key) = ContentAddresser::new(SIZE).generate();

        assert_eq!(validator(0).validate(&store, &key).await, Outcome::Violation);
        assert_eq!(store.gets(), 2);
    }

    #[tokio::test]
    async fn test_hit_reads_once() {
        let store = CountingStore::new(Arc::new(MemoryStore::new()));
        let (payload, key) = ContentAddresser::new(SIZE).generate();
        store.put(key, payload).await.unwrap();

        assert_eq!(validator(0).validate(&store, &key).await, Outcome::FirstTry);
        assert_eq!(store.gets(), 1);
    }

    #[tokio::test]
    async fn test_store_error_then_hit_is_retry() {
        let (payload, key) = ContentAddresser::new(SIZE).generate();
        let store = ScriptedStore::new(vec![
            Err(StoreError::Io("busy".into())),
            Ok(Some(payload)),
        ]);

        let outcome = validator(0).validate(&store, &key).await;
        assert_eq!(outcome, Outcome::AfterRetry { waited: Duration::ZERO });
    }

    #[tokio::test]
    async fn test_wrong_length_is_corruption_without_retry() {
        let inner: SharedStore = Arc::new(MemoryStore::new());
        let store = CountingStore::new(Arc::new(CorruptingStore::new(inner, SIZE - 1)));
        let (payload, key) = ContentAddresser::new(SIZE).generate();
        store.put(key, payload).await.unwrap();

        let outcome = validator(0).validate(&store, &key).await;
        assert_eq!(
            outcome,
            Outcome::corruption(Corruption::WrongLength {
                expected: SIZE,
                actual: SIZE - 1
            })
        );
        assert!(outcome.is_corruption());
        assert_eq!(store.gets(), 1);
    }

    #[tokio::test]
    async fn test_corruption_on_retry_read() {
        let (_, key) = ContentAddresser::new(SIZE).generate();
        let store = ScriptedStore::new(vec![Ok(None), Ok(Some(Payload::new(vec![0u8; 3])))]);

        let outcome = validator(0).validate(&store, &key).await;
        assert_eq!(
            outcome,
            Outcome::corruption(Corruption::WrongLength {
                expected: SIZE,
                actual: 3
            })
        );
    }

    #[tokio::test]
    async fn test_foreign_payload_is_digest_mismatch() {
        let addresser = ContentAddresser::new(SIZE);
        let (_, key) = addresser.generate();
        let (other, _) = addresser.generate();
        let store = ScriptedStore::new(vec![Ok(Some(other))]);

        assert_eq!(
            validator(0).validate(&store, &key).await,
            Outcome::corruption(Corruption::DigestMismatch)
        );
    }

    #[tokio::test]
    async fn test_reported_corruption_is_hard_failure() {
        let (_, key) = ContentAddresser::new(SIZE).generate();
        let store = ScriptedStore::new(vec![Err(StoreError::Corruption("bad crc".into()))]);

        let outcome = validator(0).validate(&store, &key).await;
        assert!(outcome.is_corruption());
        assert!(!outcome.is_success());
    }
}
