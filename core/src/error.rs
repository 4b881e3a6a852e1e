use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Configuration and programming errors. These are always returned
/// immediately and never retried.
#[derive(Error, Debug)]
pub enum ReconError {
    #[error("Invalid chunk size: {size} (must be > 0)")]
    InvalidChunkSize { size: usize },

    #[error("Required field '{field}' is missing or empty")]
    MissingField { field: String },

    #[error("Conflict key must not be empty")]
    EmptyConflictKey,

    #[error("Conflict key '{actual}' does not match the store key column '{expected}'")]
    ConflictKeyMismatch { expected: String, actual: String },

    #[error("Invalid table or column name: '{name}'")]
    InvalidName { name: String },

    #[error("Invalid configuration: {reason}")]
    InvalidConfig { reason: String },

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type ReconResult<T> = Result<T, ReconError>;

/// Failure classes surfaced by a [`crate::store::RemoteStore`].
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "class", content = "message", rename_all = "snake_case")]
pub enum StoreError {
    /// Timeout, dropped connection, busy backend. Safe to retry,
    /// possibly with a smaller batch.
    #[error("transient store failure: {0}")]
    Transient(String),

    /// Constraint violation or malformed data. Never retried.
    #[error("permanent store failure: {0}")]
    Permanent(String),
}

impl StoreError {
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_))
    }

    pub fn message(&self) -> &str {
        match self {
            Self::Transient(m) | Self::Permanent(m) => m,
        }
    }
}

impl From<rusqlite::Error> for StoreError {
    fn from(e: rusqlite::Error) -> Self {
        use rusqlite::ErrorCode;
        match &e {
            rusqlite::Error::SqliteFailure(inner, _) => match inner.code {
                ErrorCode::DatabaseBusy
                | ErrorCode::DatabaseLocked
                | ErrorCode::CannotOpen
                | ErrorCode::SystemIoFailure
                | ErrorCode::OperationInterrupted
                | ErrorCode::OutOfMemory => Self::Transient(e.to_string()),
                _ => Self::Permanent(e.to_string()),
            },
            _ => Self::Permanent(e.to_string()),
        }
    }
}
