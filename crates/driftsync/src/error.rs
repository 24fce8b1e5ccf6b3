//! Error types for the Replica.

use driftsync_core::CoreError;
use driftsync_store::StoreError;
use driftsync_sync::SyncError;
use thiserror::Error;

/// Errors that can occur during Replica operations.
#[derive(Debug, Error)]
pub enum ReplicaError {
    /// Storage error.
    #[error("storage error: {0}")]
    Store(#[from] StoreError),

    /// Sync error.
    #[error("sync error: {0}")]
    Sync(#[from] SyncError),

    /// A record could not be built from caller input.
    #[error("invalid record: {0}")]
    Record(#[from] CoreError),
}

/// Result type for Replica operations.
pub type Result<T> = std::result::Result<T, ReplicaError>;
