//! Error types for the store module.

use thiserror::Error;

/// Local storage failures.
///
/// Any of these aborts the whole unit of work: a record write and its outbox
/// entry either both land or neither does.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Database error from SQLite.
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Record, entry, or conflict (de)serialization error.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Collection was not declared in the schema.
    #[error("unknown collection: {0}")]
    UnknownCollection(String),

    /// Row not found where one was required.
    #[error("not found: {0}")]
    NotFound(String),

    /// Invalid data in storage.
    #[error("invalid data: {0}")]
    InvalidData(String),

    /// Schema declaration or record rejected before touching storage.
    #[error("{0}")]
    Rejected(#[from] driftsync_core::CoreError),

    /// Migration error.
    #[error("migration error: {0}")]
    Migration(String),

    /// A lock was poisoned by a panicking writer.
    #[error("lock poisoned: {0}")]
    LockPoisoned(String),

    /// Blocking task failed to complete.
    #[error("background task failed: {0}")]
    Task(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;
