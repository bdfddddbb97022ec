//! Storage backend abstraction.
//!
//! Provides a backend-agnostic `BackendAdapter` trait that unifies the three
//! persistence technologies behind one contract:
//!
//! - `document_db`: managed real-time document database (push snapshots)
//! - `content_api`: version-controlled content-hosting API (revision tokens)
//! - `flat_file`: JSON blobs in a directory on a plain host
//! - `memory`: in-process reference adapter for tests and offline use
//!
//! Behavioral differences the store must know about are exposed as capability
//! flags rather than backend conditionals: `supports_concurrency_token` and
//! `supports_live_updates`. Everything else is identical observable behavior,
//! guaranteed by the conformance suite in `tests/adapter_conformance.rs`.

pub mod content_api;
pub mod document_db;
pub mod flat_file;
pub mod memory;

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::watch;

use crate::error::StoreError;
use crate::record::{JobFileRecord, UserRecord};

/// Pause before the single retry of an `Unavailable` call.
const RETRY_BACKOFF: Duration = Duration::from_millis(400);

/// Which record collection an operation addresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Collection {
    /// Live job files.
    Active,
    /// Soft-deleted job files awaiting restore or purge.
    Quarantine,
}

impl Collection {
    /// Path segment / directory name for this collection, identical across
    /// backends so blobs stay portable between them.
    pub fn segment(self) -> &'static str {
        match self {
            Self::Active => "jobfiles",
            Self::Quarantine => "recyclebin",
        }
    }
}

/// Path segment for the user registry area.
pub(crate) const USERS_SEGMENT: &str = "users";

/// Uniform get/put/delete/list contract every concrete store satisfies.
///
/// `list_all` cost varies hugely by backend (one request total vs. one request
/// per record); callers must assume it can be O(n) network round trips.
#[async_trait]
pub trait BackendAdapter: Send + Sync {
    /// Short backend name for logs and errors.
    fn name(&self) -> &'static str;

    /// True when `put`/`delete` detect lost updates via revision tokens.
    /// When false the store degrades gracefully: no conflict detection,
    /// last writer wins.
    fn supports_concurrency_token(&self) -> bool {
        false
    }

    /// True when `subscribe` pushes snapshot updates without polling by the
    /// caller.
    fn supports_live_updates(&self) -> bool {
        false
    }

    /// Fetch one record. `revision_token` is populated on backends that
    /// support it.
    async fn get(&self, coll: Collection, id: &str) -> Result<JobFileRecord, StoreError>;

    /// Create or overwrite one record, returning the new revision token where
    /// the backend issues one.
    ///
    /// On token-bearing backends a stale `expected_token` (or a missing one
    /// for an existing blob) fails with `ConcurrencyConflict`. Tokenless
    /// backends ignore the argument.
    async fn put(
        &self,
        coll: Collection,
        id: &str,
        record: &JobFileRecord,
        expected_token: Option<&str>,
    ) -> Result<Option<String>, StoreError>;

    /// Remove one record. `NotFound` when it does not exist.
    async fn delete(&self, coll: Collection, id: &str) -> Result<(), StoreError>;

    /// Enumerate every record in the collection. Individual missing or
    /// malformed blobs are skipped with a warning, never fatal to the whole
    /// listing.
    async fn list_all(&self, coll: Collection) -> Result<Vec<JobFileRecord>, StoreError>;

    /// Live snapshot feed for backends with `supports_live_updates`. The
    /// receiver yields the full collection contents whenever any record
    /// changes.
    async fn subscribe(
        &self,
        coll: Collection,
    ) -> Result<watch::Receiver<Vec<JobFileRecord>>, StoreError> {
        let _ = coll;
        Err(StoreError::Unavailable {
            reason: format!("{} backend does not push live updates", self.name()),
        })
    }

    /// User registry, carried by backup snapshots alongside job files.
    async fn list_users(&self) -> Result<Vec<UserRecord>, StoreError>;

    /// Insert or overwrite one user registry entry by username.
    async fn put_user(&self, user: &UserRecord) -> Result<(), StoreError>;
}

/// Run an adapter call, retrying exactly once with backoff when the first
/// attempt reports `Unavailable`. `NotFound` and `ConcurrencyConflict` are
/// business conditions and are never retried.
pub(crate) async fn with_retry<T, F, Fut>(op_name: &str, op: F) -> Result<T, StoreError>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T, StoreError>>,
{
    match op().await {
        Err(err) if err.is_retryable() => {
            tracing::warn!("{op_name} unavailable, retrying once: {err}");
            tokio::time::sleep(RETRY_BACKOFF).await;
            op().await
        }
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::with_retry;
    use crate::error::StoreError;

    #[tokio::test]
    async fn retries_unavailable_exactly_once() {
        let attempts = AtomicU32::new(0);
        let result: Result<(), StoreError> = with_retry("test", || {
            let n = attempts.fetch_add(1, Ordering::SeqCst);
            async move {
                Err(StoreError::Unavailable {
                    reason: format!("attempt {n}"),
                })
            }
        })
        .await;

        assert!(matches!(result, Err(StoreError::Unavailable { .. })));
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn does_not_retry_business_errors() {
        let attempts = AtomicU32::new(0);
        let result: Result<(), StoreError> = with_retry("test", || {
            attempts.fetch_add(1, Ordering::SeqCst);
            async {
                Err(StoreError::NotFound {
                    id: "X".to_string(),
                })
            }
        })
        .await;

        assert!(matches!(result, Err(StoreError::NotFound { .. })));
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn second_attempt_result_is_returned() {
        let attempts = AtomicU32::new(0);
        let result = with_retry("test", || {
            let n = attempts.fetch_add(1, Ordering::SeqCst);
            async move {
                if n == 0 {
                    Err(StoreError::Unavailable {
                        reason: "first".to_string(),
                    })
                } else {
                    Ok(42u32)
                }
            }
        })
        .await;

        assert_eq!(result.expect("second attempt succeeds"), 42);
    }
}
