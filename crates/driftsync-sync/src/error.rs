//! Error types for the sync module.

use std::time::Duration;

use driftsync_core::ConflictId;
use thiserror::Error;

/// Failures talking to the remote.
///
/// Never fatal to a sync cycle: push records them on the outbox entry,
/// pull reports them in the cycle summary.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    /// The remote could not be reached.
    #[error("remote unreachable: {0}")]
    Unreachable(String),

    /// The remote answered but refused the request.
    #[error("remote rejected request: {message}")]
    Rejected { message: String },

    /// No answer within the configured timeout.
    #[error("remote call timed out after {0:?}")]
    Timeout(Duration),
}

/// Errors that can occur during sync operations.
#[derive(Debug, Error)]
pub enum SyncError {
    /// Local store failed. Always propagated.
    #[error("store error: {0}")]
    Store(#[from] driftsync_store::StoreError),

    /// Remote call failed outside of per-entry bookkeeping.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// No conflict with this id.
    #[error("conflict not found: {0}")]
    ConflictNotFound(ConflictId),

    /// The conflict was already resolved; nothing was applied.
    #[error("conflict already resolved: {0}")]
    AlreadyResolved(ConflictId),

    /// The resolution request does not fit the conflict.
    #[error("invalid resolution: {0}")]
    InvalidResolution(String),
}

/// Result type for sync operations.
pub type Result<T> = std::result::Result<T, SyncError>;
