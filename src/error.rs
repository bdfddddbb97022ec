//! Error taxonomy for the record store.
//!
//! Validation errors (`DuplicateKey`, `InvalidTransition`, `EmptyReason`) are
//! resolved inside the store before any adapter I/O happens. Adapter errors
//! (`NotFound`, `ConcurrencyConflict`, `Unavailable`) propagate to the caller
//! unchanged; the store never masks them. `Unavailable` is the only condition
//! the store retries, and at most once.

use thiserror::Error;

use crate::record::{BusinessKey, LifecycleStatus};

/// Errors surfaced by the record store and its backend adapters.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The requested record does not exist in the addressed collection.
    #[error("record '{id}' not found")]
    NotFound { id: String },

    /// A non-empty business key on the candidate is already used by another
    /// active record. Raised before any adapter call.
    #[error("duplicate {field}: value already used by record '{conflicting_id}'")]
    DuplicateKey {
        field: BusinessKey,
        conflicting_id: String,
    },

    /// The revision token supplied with a write no longer matches the stored
    /// blob; another writer raced. Never retried.
    #[error("stale revision token for record '{id}'")]
    ConcurrencyConflict { id: String },

    /// The requested approval transition is not legal from the current status.
    #[error("cannot {action} a record with status '{from}'")]
    InvalidTransition {
        action: &'static str,
        from: LifecycleStatus,
    },

    /// A rejection was attempted without a non-empty reason.
    #[error("rejection reason must not be empty")]
    EmptyReason,

    /// Transient network or IO failure. Retryable once with backoff; a timed
    /// out write is reported here, never assumed to have succeeded.
    #[error("backend unavailable: {reason}")]
    Unavailable { reason: String },

    /// A stored blob could not be decoded. During listings this is logged and
    /// the entry is skipped; it is never fatal to the whole listing.
    #[error("malformed record '{id}': {reason}")]
    MalformedRecord { id: String, reason: String },

    /// A record failed to encode or an outgoing value could not be built.
    #[error("serialization failed: {0}")]
    Serialization(String),
}

impl StoreError {
    /// True for the one transient condition the store may retry.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Unavailable { .. })
    }
}

/// Errors raised while resolving configuration from the environment.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required configuration '{key}'")]
    MissingValue { key: String },

    #[error("invalid configuration '{key}': {message}")]
    InvalidValue { key: String, message: String },
}
