//! Error types for MetaKV
//!
//! `BackendError` classifies failures of the raw transactional backend;
//! `Error` is what callers of the metadata store see.

use std::fmt;
use thiserror::Error;

/// Common result type for MetaKV operations
pub type Result<T> = std::result::Result<T, Error>;

/// Phase of a backend transaction that failed
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TxnStage {
    Begin,
    Read,
    Write,
    Commit,
}

impl fmt::Display for TxnStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Begin => "begin",
            Self::Read => "read",
            Self::Write => "write",
            Self::Commit => "commit",
        };
        f.write_str(name)
    }
}

/// Failure reported by a transactional key-value backend
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum BackendError {
    #[error("write conflict on key {key}")]
    Conflict { key: String },

    #[error("request deadline exceeded")]
    Timeout,

    #[error("scan limit {limit} exceeds backend maximum {max}")]
    ScanLimitExceeded { limit: usize, max: usize },

    #[error("empty value rejected for key {key}")]
    EmptyValue { key: String },

    #[error("backend unavailable: {0}")]
    Unavailable(String),

    #[error("storage error: {0}")]
    Storage(String),
}

impl BackendError {
    /// Create a storage error
    pub fn storage(msg: impl Into<String>) -> Self {
        Self::Storage(msg.into())
    }

    /// Create an unavailable error
    pub fn unavailable(msg: impl Into<String>) -> Self {
        Self::Unavailable(msg.into())
    }

    /// Check if re-issuing the whole operation may succeed
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Conflict { .. } | Self::Timeout | Self::Unavailable(_))
    }
}

/// Common error type for MetaKV
#[derive(Debug, Error)]
pub enum Error {
    // Read errors
    #[error("key not found: {key}")]
    KeyNotFound { key: String },

    #[error("keys not found: {missing:?}")]
    KeysNotFound {
        missing: Vec<String>,
        /// Every requested position, `None` where the key was absent
        values: Vec<Option<String>>,
    },

    #[error("value of key {key} is not valid UTF-8")]
    InvalidUtf8 { key: String },

    // Validation errors
    #[error("invalid value for key {key}: {reason}")]
    InvalidValue { key: String, reason: String },

    #[error("invalid key: {0}")]
    InvalidKey(String),

    // Conditional transactions
    #[error("predicate not satisfied on key {key}: {reason}")]
    PredicateFailed { key: String, reason: String },

    // Backend errors
    #[error("transaction {stage} failed: {source}")]
    Transaction {
        stage: TxnStage,
        #[source]
        source: BackendError,
    },

    #[error("backend error: {0}")]
    Backend(#[from] BackendError),

    // Capability errors
    #[error("operation not supported: {0}")]
    Unsupported(String),

    // Caller-originated errors
    #[error("walk aborted: {0}")]
    Walk(String),

    #[error("configuration error: {0}")]
    Configuration(String),
}

impl Error {
    /// Create a transaction error for the given stage
    #[must_use]
    pub const fn transaction(stage: TxnStage, source: BackendError) -> Self {
        Self::Transaction { stage, source }
    }

    /// Create an unsupported operation error
    pub fn unsupported(op: impl Into<String>) -> Self {
        Self::Unsupported(op.into())
    }

    /// Create an error from a walk handler
    pub fn walk(msg: impl Into<String>) -> Self {
        Self::Walk(msg.into())
    }

    /// Create a configuration error
    pub fn configuration(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    /// Check if this is a retryable error
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        match self {
            Self::Transaction { source, .. } | Self::Backend(source) => source.is_retryable(),
            _ => false,
        }
    }

    /// Check if this is a not found error
    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::KeyNotFound { .. } | Self::KeysNotFound { .. })
    }

    /// Check if a conditional transaction was rejected
    #[must_use]
    pub const fn is_predicate_failed(&self) -> bool {
        matches!(self, Self::PredicateFailed { .. })
    }

    /// Check if the caller passed a value or key that cannot be stored
    #[must_use]
    pub const fn is_validation(&self) -> bool {
        matches!(self, Self::InvalidValue { .. } | Self::InvalidKey(_))
    }

    /// Values that were found by a multi-key load that reported missing keys
    #[must_use]
    pub fn partial_values(&self) -> Option<&[Option<String>]> {
        match self {
            Self::KeysNotFound { values, .. } => Some(values),
            _ => None,
        }
    }
}
