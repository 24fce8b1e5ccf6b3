//! Error types for driftsync core.

use thiserror::Error;

/// Errors raised while parsing or validating core types.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("unknown sync status: {0}")]
    UnknownSyncStatus(String),

    #[error("unknown outbox operation: {0}")]
    UnknownOperation(String),

    #[error("unknown outbox entry status: {0}")]
    UnknownEntryStatus(String),

    #[error("unknown resolution: {0}")]
    UnknownResolution(String),

    #[error("invalid record: {0}")]
    InvalidRecord(String),

    #[error("invalid schema: {0}")]
    InvalidSchema(String),

    #[error("conflict {0} is already resolved")]
    AlreadyResolved(String),
}

/// Result type for core operations.
pub type Result<T> = std::result::Result<T, CoreError>;
