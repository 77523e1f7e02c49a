//! Storage-specific error types.
//!
//! All storage operations return [`StorageError`] on failure. The error is
//! tagged as transient or permanent here, at the database boundary, so the
//! retry layer never needs to know about sqlx.

use thiserror::Error;

use crate::model::{MetricKind, ValidationError};
use crate::retry::{Classify, ErrorClass, RetryError};

/// SQLite primary result code for a busy database file.
const SQLITE_BUSY: i32 = 5;
/// SQLite primary result code for a locked table.
const SQLITE_LOCKED: i32 = 6;

/// Errors that can occur in the storage layer.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Database operation failed (sqlx error).
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// JSON serialization/deserialization error.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// Snapshot file I/O error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// A single malformed metric.
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// One or more malformed metrics in a batch.
    #[error("invalid metrics batch: {}", join_errors(.0))]
    InvalidBatch(Vec<ValidationError>),

    /// Invalid data in database (e.g., unknown metric type).
    #[error("invalid data: {0}")]
    InvalidData(String),

    /// Metric does not exist.
    #[error("{kind} metric '{name}' not found")]
    NotFound { kind: MetricKind, name: String },

    /// Storage backend is not available.
    #[error("storage unavailable: {0}")]
    Unavailable(String),

    /// A transient failure persisted through every retry.
    #[error("operation failed after retries: {0}")]
    RetriesExhausted(Box<StorageError>),

    /// The store was shut down while an operation waited to retry.
    #[error("operation cancelled")]
    Cancelled,
}

impl From<RetryError<StorageError>> for StorageError {
    fn from(err: RetryError<StorageError>) -> Self {
        match err {
            RetryError::Cancelled => Self::Cancelled,
            RetryError::Permanent(e) => e,
            RetryError::Exhausted { last, .. } => Self::RetriesExhausted(Box::new(last)),
        }
    }
}

fn join_errors(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

impl StorageError {
    /// Ids of the malformed items carried by this error.
    pub fn invalid_ids(&self) -> Vec<&str> {
        match self {
            Self::Validation(e) => vec![e.id.as_str()],
            Self::InvalidBatch(errors) => errors.iter().map(|e| e.id.as_str()).collect(),
            _ => Vec::new(),
        }
    }
}

impl Classify for StorageError {
    fn class(&self) -> ErrorClass {
        match self {
            Self::Database(e) => classify_sqlx(e),
            _ => ErrorClass::Permanent,
        }
    }
}

fn classify_sqlx(err: &sqlx::Error) -> ErrorClass {
    match err {
        sqlx::Error::Io(_) | sqlx::Error::PoolTimedOut | sqlx::Error::WorkerCrashed => {
            ErrorClass::Transient
        }
        sqlx::Error::Database(db) => {
            let primary = db
                .code()
                .and_then(|code| code.parse::<i32>().ok())
                .map(|code| code & 0xff);
            match primary {
                Some(SQLITE_BUSY | SQLITE_LOCKED) => ErrorClass::Transient,
                _ => ErrorClass::Permanent,
            }
        }
        _ => ErrorClass::Permanent,
    }
}
