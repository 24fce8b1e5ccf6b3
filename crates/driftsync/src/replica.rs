//! The Replica: one device's view of the data.
//!
//! A Replica pairs a local [`Store`] with a [`SyncEngine`]. Domain code reads
//! and writes through it as if it were a plain keyed store; every write lands
//! locally first and is queued for the remote in the same unit of work.

use std::path::Path;
use std::sync::Arc;

use serde_json::Value;

use driftsync_core::{Conflict, ConflictId, Origin, QueueStats, Record, Resolution, Schema};
use driftsync_store::{MemoryStore, SqliteStore, Store};
use driftsync_sync::{
    ConvergenceResult, PullReport, PushReport, RemoteTransport, SyncConfig, SyncEngine,
    SyncReport, SyncScheduler,
};

use crate::error::Result;

/// The main Replica struct.
///
/// Provides a unified API for:
/// - Reading records, by id, per collection, and through secondary indices
/// - Writing records as local mutations
/// - Running sync cycles against the remote
/// - Inspecting and resolving conflicts
pub struct Replica<S: Store, R: RemoteTransport> {
    engine: Arc<SyncEngine<S, R>>,
}

impl<S: Store, R: RemoteTransport> Replica<S, R> {
    /// Create a replica over an already opened store.
    pub fn new(store: S, remote: R, config: SyncConfig) -> Self {
        Self::from_engine(SyncEngine::new(Arc::new(store), remote, config))
    }

    /// Wrap a configured engine, e.g. one with a custom conflict policy.
    pub fn from_engine(engine: SyncEngine<S, R>) -> Self {
        Self {
            engine: Arc::new(engine),
        }
    }

    /// Get the store reference.
    pub fn store(&self) -> &S {
        self.engine.store()
    }

    /// Get the sync engine.
    pub fn engine(&self) -> &Arc<SyncEngine<S, R>> {
        &self.engine
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Record Operations
    // ─────────────────────────────────────────────────────────────────────────

    pub async fn get(&self, collection: &str, id: &str) -> Result<Option<Record>> {
        Ok(self.store().get(collection, id).await?)
    }

    pub async fn get_all(&self, collection: &str) -> Result<Vec<Record>> {
        Ok(self.store().get_all(collection).await?)
    }

    /// Records whose attribute equals `value`, through a declared index or,
    /// for an undeclared one, a full scan with the same result.
    pub async fn get_all_by_index(
        &self,
        collection: &str,
        index: &str,
        value: impl Into<Value>,
    ) -> Result<Vec<Record>> {
        let value = value.into();
        Ok(self
            .store()
            .get_all_by_index(collection, index, &value)
            .await?)
    }

    /// Write a record as a local mutation. Returns it as stored (pending).
    pub async fn put(&self, collection: &str, record: Record) -> Result<Record> {
        Ok(self.store().put(collection, record, Origin::Local).await?)
    }

    /// Write a record given as a JSON object with `id` and `updatedAt`.
    pub async fn put_json(&self, collection: &str, value: Value) -> Result<Record> {
        let record = Record::from_json(value)?;
        self.put(collection, record).await
    }

    /// Delete a record as a local mutation. Returns `false` if it did not
    /// exist, in which case nothing is queued.
    pub async fn delete(&self, collection: &str, id: &str) -> Result<bool> {
        Ok(self.store().delete(collection, id, Origin::Local).await?)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Sync Operations
    // ─────────────────────────────────────────────────────────────────────────

    /// Run one sync cycle: push, then pull. A no-op while offline.
    pub async fn sync(&self) -> Result<SyncReport> {
        Ok(self.engine.run_sync_cycle().await?)
    }

    pub async fn push(&self) -> Result<PushReport> {
        Ok(self.engine.push().await?)
    }

    pub async fn pull(&self) -> Result<PullReport> {
        Ok(self.engine.pull().await?)
    }

    pub async fn queue_stats(&self) -> Result<QueueStats> {
        Ok(self.engine.queue_stats().await?)
    }

    pub async fn conflicts(&self, include_resolved: bool) -> Result<Vec<Conflict>> {
        Ok(self.engine.conflicts(include_resolved).await?)
    }

    pub async fn resolve(&self, id: &ConflictId, resolution: Resolution) -> Result<Conflict> {
        Ok(self.engine.resolve(id, resolution).await?)
    }

    pub async fn merge(&self, id: &ConflictId, merged: Record) -> Result<Conflict> {
        Ok(self.engine.merge(id, merged).await?)
    }

    pub async fn verify_convergence(&self) -> Result<ConvergenceResult> {
        Ok(self.engine.verify_convergence().await?)
    }
}

impl<S, R> Replica<S, R>
where
    S: Store + 'static,
    R: RemoteTransport + 'static,
{
    /// Start background sync on the engine's interval.
    pub fn spawn_scheduler(&self) -> SyncScheduler {
        SyncScheduler::spawn(self.engine.clone())
    }
}

impl<R: RemoteTransport> Replica<SqliteStore, R> {
    /// Open (or create) a SQLite-backed replica.
    pub fn open_sqlite(
        path: impl AsRef<Path>,
        schema: Schema,
        remote: R,
        config: SyncConfig,
    ) -> Result<Self> {
        let store = SqliteStore::open(path, schema)?;
        Ok(Self::new(store, remote, config))
    }
}

impl<R: RemoteTransport> Replica<MemoryStore, R> {
    /// An ephemeral replica.
    pub fn in_memory(schema: Schema, remote: R, config: SyncConfig) -> Result<Self> {
        let store = MemoryStore::new(schema)?;
        Ok(Self::new(store, remote, config))
    }
}
