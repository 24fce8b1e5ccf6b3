//! Store traits: the abstract interface for local persistence.
//!
//! These traits keep the sync engine storage-agnostic. Implementations
//! include SQLite (primary) and in-memory (for tests).

use async_trait::async_trait;
use serde_json::Value;

use driftsync_core::{
    Conflict, ConflictId, EntryId, Origin, OutboxEntry, QueueStats, Record, Resolution, Schema,
    SyncStatus,
};

use crate::error::Result;

/// Meta key under which the pull watermark is persisted.
pub const WATERMARK_KEY: &str = "pull_watermark";

/// Keyed, multi-collection record storage.
///
/// All methods are async to support both blocking (SQLite) and async
/// backends. For SQLite, `spawn_blocking` is used internally.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// The declared collections.
    fn schema(&self) -> &Schema;

    /// Get a record by id.
    async fn get(&self, collection: &str, id: &str) -> Result<Option<Record>>;

    /// All records of a collection, ordered by id.
    async fn get_all(&self, collection: &str) -> Result<Vec<Record>>;

    /// Records whose attribute matches `value` through the named index.
    ///
    /// If `index` is not declared for the collection, it is treated as an
    /// attribute name and the collection is scanned with an equality filter.
    /// Both paths return the same records in the same order (by id).
    async fn get_all_by_index(
        &self,
        collection: &str,
        index: &str,
        value: &Value,
    ) -> Result<Vec<Record>>;

    /// Upsert a record.
    ///
    /// The stored `updatedAt` never decreases. With [`Origin::Local`] the
    /// record is marked pending and a matching outbox entry is appended in
    /// the same unit of work. With [`Origin::Sync`] the record is stored as
    /// given and the outbox is untouched.
    ///
    /// Returns the record as stored. A record that fails
    /// [`Record::validate`] is rejected.
    async fn put(&self, collection: &str, record: Record, origin: Origin) -> Result<Record>;

    /// Sync-origin upsert applied only if the stored record still equals
    /// `expected` (`None`: still absent).
    ///
    /// The comparison and the write are one unit of work, so a local write
    /// that landed after `expected` was read is never overwritten. Returns
    /// whether the record was written.
    async fn put_if_unchanged(
        &self,
        collection: &str,
        record: Record,
        expected: Option<&Record>,
    ) -> Result<bool>;

    /// Delete a record, with the same dual-write contract as [`put`]. The
    /// outbox entry carries the record as it was removed.
    ///
    /// Returns `false` if there was nothing to delete; no outbox entry is
    /// written in that case.
    ///
    /// [`put`]: RecordStore::put
    async fn delete(&self, collection: &str, id: &str, origin: Origin) -> Result<bool>;

    /// Sync-origin status change that leaves fields and `updatedAt` alone.
    ///
    /// Returns `false` if the record does not exist.
    async fn set_sync_status(&self, collection: &str, id: &str, status: SyncStatus)
        -> Result<bool>;

    /// Mark a record synced, but only if no outbox entry for it remains.
    ///
    /// The check and the update are one unit of work, so a local write that
    /// lands concurrently keeps its record dirty. Returns whether the record
    /// was marked.
    async fn mark_synced(&self, collection: &str, id: &str) -> Result<bool>;
}

/// The durable queue of local mutations awaiting push.
#[async_trait]
pub trait Outbox: Send + Sync {
    /// Every outstanding entry (pending, processing, or failed), ordered by
    /// `timestamp` then insertion sequence.
    async fn enumerate_pending(&self) -> Result<Vec<OutboxEntry>>;

    /// Get a single entry.
    async fn get_entry(&self, id: &EntryId) -> Result<Option<OutboxEntry>>;

    /// Outstanding entries for one record, FIFO.
    async fn entries_for(&self, collection: &str, record_id: &str) -> Result<Vec<OutboxEntry>>;

    /// Flag an entry as being applied. Returns `false` if it no longer exists.
    async fn mark_processing(&self, id: &EntryId) -> Result<bool>;

    /// Record a failed attempt: status failed, `retry_count + 1`, error kept.
    async fn mark_failed(&self, id: &EntryId, error: &str) -> Result<bool>;

    /// Drop an entry after the remote confirmed it.
    async fn remove_entry(&self, id: &EntryId) -> Result<bool>;

    /// Drop `entry` and every earlier entry for the same record, once the
    /// remote holds a state that covers them all. Returns how many went.
    async fn remove_entries_through(&self, entry: &OutboxEntry) -> Result<usize>;

    /// Drop every outstanding entry for a record. Returns how many went.
    async fn remove_entries_for(&self, collection: &str, record_id: &str) -> Result<usize>;

    /// Turn entries left in `processing` by an interrupted push back into
    /// `pending`. Returns how many were requeued.
    async fn requeue_processing(&self) -> Result<usize>;

    /// `(pending, failed)` entry counts; pending includes processing.
    async fn entry_counts(&self) -> Result<(usize, usize)>;
}

/// Durable record of unresolved push/pull collisions.
#[async_trait]
pub trait ConflictLog: Send + Sync {
    /// Insert or replace a conflict by id.
    async fn save_conflict(&self, conflict: &Conflict) -> Result<()>;

    /// Get a conflict by id.
    async fn get_conflict(&self, id: &ConflictId) -> Result<Option<Conflict>>;

    /// The unresolved conflict for a record, if any.
    async fn open_conflict_for(&self, collection: &str, record_id: &str)
        -> Result<Option<Conflict>>;

    /// Conflicts ordered by detection time.
    async fn list_conflicts(&self, include_resolved: bool) -> Result<Vec<Conflict>>;

    /// Mark a conflict resolved, exactly once.
    ///
    /// Returns `Ok(false)` without changing anything if it was already
    /// resolved, and `NotFound` if it does not exist.
    async fn mark_resolved(&self, id: &ConflictId, resolution: Resolution, at: i64)
        -> Result<bool>;

    /// Number of unresolved conflicts.
    async fn count_open_conflicts(&self) -> Result<usize>;
}

/// A complete local store: records, outbox, conflict log, and a small
/// key/value area for engine bookkeeping.
#[async_trait]
pub trait Store: RecordStore + Outbox + ConflictLog {
    /// Read an engine meta value.
    async fn get_meta(&self, key: &str) -> Result<Option<String>>;

    /// Write an engine meta value.
    async fn set_meta(&self, key: &str, value: &str) -> Result<()>;

    /// Read-only status summary for the UI layer.
    async fn queue_stats(&self) -> Result<QueueStats> {
        let (pending, failed) = self.entry_counts().await?;
        let conflicts = self.count_open_conflicts().await?;
        Ok(QueueStats {
            pending,
            failed,
            conflicts,
        })
    }
}
