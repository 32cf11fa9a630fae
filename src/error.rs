//! Error types for the store and its persistence layer.
//!
//! Two layers:
//! - [`PersistError`]: what actually went wrong (storage backend, codec,
//!   migration, merge).
//! - [`ErrorKind`]: which stage of the persistence engine observed it. The
//!   engine never returns these errors from its public operations; it hands
//!   `(kind, &error)` to the configured `on_error` callback instead.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Errors that can occur while reading, writing or transforming persisted state.
#[derive(Debug, Error)]
pub enum PersistError {
    /// Storage adapter failed to read, write or remove an entry.
    #[error("storage error: {0}")]
    Storage(String),

    /// Serialization or deserialization of the persisted envelope failed.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// A migration function rejected or failed on the stored state.
    #[error("migration error: {0}")]
    Migration(String),

    /// Combining initial state with hydrated state failed.
    #[error("merge error: {0}")]
    Merge(String),

    /// Invalid storage key.
    #[error("invalid key: {0}")]
    InvalidKey(String),

    /// Database error from SQLx.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// I/O error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for persistence operations.
pub type Result<T> = std::result::Result<T, PersistError>;

impl PersistError {
    /// Returns true if retrying the same operation may succeed.
    ///
    /// Backend failures are transient; a payload that failed to decode or
    /// migrate will fail the same way again.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            PersistError::Storage(_) | PersistError::Database(_) | PersistError::Io(_)
        )
    }
}

impl From<serde_json::Error> for PersistError {
    fn from(err: serde_json::Error) -> Self {
        PersistError::Serialization(err.to_string())
    }
}

/// The stage of the persistence engine at which a failure was caught.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorKind {
    /// Reading from storage (or resolving the adapter) failed during hydration.
    Storage,
    /// Deserialize, migrate or merge failed during hydration.
    Migration,
    /// A debounced or flushed write failed.
    Persistence,
    /// Removing the storage entry failed.
    Clear,
}

impl ErrorKind {
    /// Lowercase name as reported to `on_error` handlers and logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Storage => "storage",
            ErrorKind::Migration => "migration",
            ErrorKind::Persistence => "persistence",
            ErrorKind::Clear => "clear",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
