//! Outbox entries: the durable log of not-yet-confirmed local writes.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{CoreError, Result};
use crate::record::Record;
use crate::types::EntryId;

/// Kind of mutation an outbox entry replays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Operation {
    Create,
    Update,
    Delete,
}

impl Operation {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Operation::Create => "create",
            Operation::Update => "update",
            Operation::Delete => "delete",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Operation {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "create" => Ok(Operation::Create),
            "update" => Ok(Operation::Update),
            "delete" => Ok(Operation::Delete),
            other => Err(CoreError::UnknownOperation(other.to_string())),
        }
    }
}

/// Lifecycle state of an outbox entry.
///
/// `Processing` is transient: it only exists while a push is applying the
/// entry. After a crash it is treated exactly like `Pending`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryStatus {
    Pending,
    Processing,
    Failed,
}

impl EntryStatus {
    pub const fn as_str(&self) -> &'static str {
        match self {
            EntryStatus::Pending => "pending",
            EntryStatus::Processing => "processing",
            EntryStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for EntryStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntryStatus {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "pending" => Ok(EntryStatus::Pending),
            "processing" => Ok(EntryStatus::Processing),
            "failed" => Ok(EntryStatus::Failed),
            other => Err(CoreError::UnknownEntryStatus(other.to_string())),
        }
    }
}

/// One pending local mutation.
///
/// Created in the same unit of work as the record write that caused it and
/// removed only after the remote confirmed the mutation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutboxEntry {
    /// Unique entry identifier.
    pub id: EntryId,
    /// Insertion sequence, assigned by the store. Breaks timestamp ties.
    pub seq: u64,
    /// Collection of the affected record.
    pub collection: String,
    /// Id of the affected record.
    pub record_id: String,
    /// What to replay against the remote.
    pub operation: Operation,
    /// Record state captured at enqueue time. For a delete this is the
    /// record as it was removed. Push re-reads the current record by id and
    /// sends that instead.
    pub payload: Option<Record>,
    /// Enqueue time (Unix ms). Never decreases across entries.
    pub timestamp: i64,
    /// Lifecycle state.
    pub status: EntryStatus,
    /// Number of failed push attempts.
    pub retry_count: u32,
    /// Last push error, if any.
    pub error: Option<String>,
}

impl OutboxEntry {
    /// Create a fresh pending entry. The store assigns `seq` on insert.
    pub fn new(
        collection: impl Into<String>,
        record_id: impl Into<String>,
        operation: Operation,
        payload: Option<Record>,
        timestamp: i64,
    ) -> Self {
        Self {
            id: EntryId::generate(),
            seq: 0,
            collection: collection.into(),
            record_id: record_id.into(),
            operation,
            payload,
            timestamp,
            status: EntryStatus::Pending,
            retry_count: 0,
            error: None,
        }
    }

    /// Whether push should still attempt this entry under a retry budget.
    pub fn is_retryable(&self, max_retries: u32) -> bool {
        self.status != EntryStatus::Failed || self.retry_count < max_retries
    }

    /// FIFO ordering key.
    pub fn order_key(&self) -> (i64, u64) {
        (self.timestamp, self.seq)
    }
}

/// Read-only queue summary polled by the UI layer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueStats {
    /// Entries waiting for push (including any stuck in `processing`).
    pub pending: usize,
    /// Entries whose last push attempt failed.
    pub failed: usize,
    /// Unresolved conflicts.
    pub conflicts: usize,
}
