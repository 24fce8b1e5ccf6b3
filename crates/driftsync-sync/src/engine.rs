//! The sync engine: push, pull, and the cycle that sequences them.
//!
//! Push drains the outbox against the remote in FIFO order. Pull merges the
//! remote delta into the record store and escalates collisions to the
//! conflict log. A cycle runs push to completion, then pull, under an
//! engine-wide lock so cycles never interleave.

use std::future::Future;
use std::sync::Arc;

use tokio::sync::Mutex;

use driftsync_core::{
    now_millis, Conflict, ConflictId, ConflictPolicy, Operation, Origin, OutboxEntry, QueueStats,
    Record, Resolution, SyncStatus, TimestampPolicy,
};
use driftsync_store::{Store, WATERMARK_KEY};

use crate::config::SyncConfig;
use crate::convergence::{self, ConvergenceResult};
use crate::error::{Result, SyncError, TransportError};
use crate::report::{PullReport, PushReport, SyncReport};
use crate::resolve;
use crate::transport::RemoteTransport;

/// What happened to one outbox entry during push.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EntryOutcome {
    Applied,
    Superseded,
    Failed,
}

/// Orchestrates push, pull, and conflict resolution for one replica.
pub struct SyncEngine<S: Store, R: RemoteTransport> {
    store: Arc<S>,
    remote: R,
    config: SyncConfig,
    policy: Box<dyn ConflictPolicy>,
    /// Held for the duration of every push, pull, cycle, and resolution.
    cycle: Mutex<()>,
}

impl<S: Store, R: RemoteTransport> SyncEngine<S, R> {
    /// Create an engine with plain timestamp comparison.
    pub fn new(store: Arc<S>, remote: R, config: SyncConfig) -> Self {
        Self {
            store,
            remote,
            config,
            policy: Box::new(TimestampPolicy),
            cycle: Mutex::new(()),
        }
    }

    /// Replace the conflict policy.
    pub fn with_policy(mut self, policy: impl ConflictPolicy + 'static) -> Self {
        self.policy = Box::new(policy);
        self
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    pub fn remote(&self) -> &R {
        &self.remote
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    pub fn policy(&self) -> &dyn ConflictPolicy {
        &*self.policy
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Cycle
    // ─────────────────────────────────────────────────────────────────────────

    /// Run push, then pull.
    ///
    /// Offline is a steady state, not an error: an unreachable remote yields
    /// [`SyncReport::offline`]. Transport failures are summarized in the
    /// report; only local store failures are returned as errors.
    pub async fn run_sync_cycle(&self) -> Result<SyncReport> {
        let _cycle = self.cycle.lock().await;

        if !self.reachable().await {
            tracing::debug!("remote unreachable, skipping sync cycle");
            return Ok(SyncReport::offline());
        }

        let push = self.push_locked().await?;
        let (pull, pull_error) = match self.pull_locked().await {
            Ok(pull) => (Some(pull), None),
            Err(SyncError::Transport(err)) => {
                tracing::warn!(error = %err, "pull failed");
                (None, Some(err.to_string()))
            }
            Err(err) => return Err(err),
        };

        let mut report = SyncReport::merge(&push, pull.as_ref());
        report.pull_error = pull_error;

        tracing::info!(
            processed = report.processed,
            errors = report.errors,
            pulled = report.pulled,
            conflicts = report.conflicts,
            "sync cycle complete"
        );
        Ok(report)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Push
    // ─────────────────────────────────────────────────────────────────────────

    /// Drain the outbox against the remote.
    pub async fn push(&self) -> Result<PushReport> {
        let _cycle = self.cycle.lock().await;
        self.push_locked().await
    }

    async fn push_locked(&self) -> Result<PushReport> {
        let requeued = self.store.requeue_processing().await?;
        if requeued > 0 {
            tracing::info!(requeued, "requeued interrupted outbox entries");
        }

        let entries = self.store.enumerate_pending().await?;
        let mut report = PushReport::default();

        for entry in &entries {
            if !entry.is_retryable(self.config.max_retries) {
                report.parked += 1;
                continue;
            }
            match self.push_entry(entry).await? {
                EntryOutcome::Applied => report.processed += 1,
                EntryOutcome::Superseded => report.superseded += 1,
                EntryOutcome::Failed => report.errors += 1,
            }
        }

        tracing::info!(
            processed = report.processed,
            errors = report.errors,
            superseded = report.superseded,
            parked = report.parked,
            "push complete"
        );
        Ok(report)
    }

    /// Reconcile the remote with the current local state of one record.
    async fn push_entry(&self, entry: &OutboxEntry) -> Result<EntryOutcome> {
        let collection = entry.collection.as_str();
        let record_id = entry.record_id.as_str();

        if !self.store.schema().contains(collection) {
            let error = format!("unknown collection {}", collection);
            self.store.mark_failed(&entry.id, &error).await?;
            return Ok(EntryOutcome::Failed);
        }

        let current = self.store.get(collection, record_id).await?;
        let upsert = match (entry.operation, current) {
            (Operation::Delete, None) => None,
            (Operation::Create | Operation::Update, Some(record)) => Some(record),
            (operation, _) => {
                // A later write changed whether the record exists; the entry
                // for that write carries the current state.
                tracing::debug!(
                    entry = %entry.id,
                    collection,
                    record_id,
                    %operation,
                    "outbox entry superseded"
                );
                self.store.remove_entry(&entry.id).await?;
                return Ok(EntryOutcome::Superseded);
            }
        };

        self.store.mark_processing(&entry.id).await?;
        let result = match &upsert {
            Some(record) => self.call(self.remote.upsert(collection, record)).await,
            None => self.call(self.remote.delete(collection, record_id)).await,
        };

        match result {
            Ok(()) => {
                // The remote now holds the current state, which covers any
                // earlier entry for this record, parked ones included.
                let cleared = self.store.remove_entries_through(entry).await?;
                if cleared > 1 {
                    tracing::debug!(
                        entry = %entry.id,
                        collection,
                        record_id,
                        earlier = cleared - 1,
                        "cleared earlier outbox entries"
                    );
                }
                if upsert.is_some() {
                    self.store.mark_synced(collection, record_id).await?;
                }
                tracing::debug!(entry = %entry.id, collection, record_id, "pushed");
                Ok(EntryOutcome::Applied)
            }
            Err(err) => {
                tracing::warn!(
                    entry = %entry.id,
                    collection,
                    record_id,
                    retry = entry.retry_count + 1,
                    error = %err,
                    "push failed"
                );
                self.store.mark_failed(&entry.id, &err.to_string()).await?;
                if upsert.is_some() {
                    self.store
                        .set_sync_status(collection, record_id, SyncStatus::Failed)
                        .await?;
                }
                Ok(EntryOutcome::Failed)
            }
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Pull
    // ─────────────────────────────────────────────────────────────────────────

    /// Fetch the remote delta and merge it.
    pub async fn pull(&self) -> Result<PullReport> {
        let _cycle = self.cycle.lock().await;
        self.pull_locked().await
    }

    async fn pull_locked(&self) -> Result<PullReport> {
        let watermark = self.watermark().await?;
        let since = if self.config.use_watermark {
            watermark
        } else {
            None
        };

        let delta = self.call(self.remote.fetch_delta(since)).await?;
        let mut report = PullReport::default();
        let mut high = watermark;

        for (collection, records) in delta {
            if !self.store.schema().contains(&collection) {
                tracing::warn!(
                    %collection,
                    records = records.len(),
                    "skipping undeclared remote collection"
                );
                report.skipped += records.len();
                continue;
            }
            for remote in records {
                high = Some(high.map_or(remote.updated_at, |h| h.max(remote.updated_at)));
                self.merge_remote(&collection, remote, &mut report).await?;
            }
        }

        if let Some(high) = high.filter(|h| Some(*h) != watermark) {
            self.store.set_meta(WATERMARK_KEY, &high.to_string()).await?;
        }

        tracing::info!(
            pulled = report.pulled,
            conflicts = report.conflicts,
            unchanged = report.unchanged,
            skipped = report.skipped,
            "pull complete"
        );
        Ok(report)
    }

    async fn merge_remote(
        &self,
        collection: &str,
        remote: Record,
        report: &mut PullReport,
    ) -> Result<()> {
        let remote = remote.with_status(SyncStatus::Synced);

        // A domain write may land between the read and the sync write; the
        // conditional write then refuses and the record is merged again.
        loop {
            let local = self.store.get(collection, &remote.id).await?;
            let overwrite = match &local {
                Some(local) => {
                    if !self.policy.remote_is_newer(local, &remote) {
                        report.unchanged += 1;
                        false
                    } else if self.policy.is_conflict(local, &remote) {
                        self.escalate(collection, Some(local.clone()), remote.clone())
                            .await?;
                        report.conflicts += 1;
                        false
                    } else {
                        true
                    }
                }
                None => {
                    let outstanding = self.store.entries_for(collection, &remote.id).await?;
                    if outstanding.is_empty() {
                        true
                    } else if self.collides_with_delete(&outstanding, &remote) {
                        self.escalate(collection, None, remote.clone()).await?;
                        report.conflicts += 1;
                        false
                    } else {
                        // The pending local delete is newer and will be pushed.
                        report.unchanged += 1;
                        false
                    }
                }
            };
            if !overwrite {
                return Ok(());
            }

            if self
                .store
                .put_if_unchanged(collection, remote.clone(), local.as_ref())
                .await?
            {
                tracing::debug!(collection, record_id = %remote.id, "pulled");
                report.pulled += 1;
                return Ok(());
            }
            tracing::debug!(
                collection,
                record_id = %remote.id,
                "record changed during pull, merging again"
            );
        }
    }

    /// Whether `remote` collides with a pending local delete.
    ///
    /// Compared against the last local version the outstanding entries
    /// captured, which for a delete is the record as it was removed.
    fn collides_with_delete(&self, outstanding: &[OutboxEntry], remote: &Record) -> bool {
        match outstanding.iter().rev().find_map(|e| e.payload.as_ref()) {
            Some(deleted) => self.policy.is_delete_conflict(deleted, remote),
            None => true,
        }
    }

    /// Record a collision, keeping at most one open conflict per record.
    async fn escalate(&self, collection: &str, local: Option<Record>, remote: Record) -> Result<()> {
        match self.store.open_conflict_for(collection, &remote.id).await? {
            Some(mut open) => {
                if self.policy.remote_is_newer(&open.remote_version, &remote) {
                    tracing::debug!(conflict = %open.id, "refreshing open conflict");
                    open.remote_version = remote;
                    open.local_version = local;
                    self.store.save_conflict(&open).await?;
                }
            }
            None => {
                let conflict = Conflict::new(collection, local, remote, now_millis());
                tracing::warn!(
                    conflict = %conflict.id,
                    collection,
                    record_id = %conflict.record_id,
                    "conflict detected"
                );
                self.store.save_conflict(&conflict).await?;
            }
        }
        Ok(())
    }

    async fn watermark(&self) -> Result<Option<i64>> {
        let raw = self.store.get_meta(WATERMARK_KEY).await?;
        Ok(raw.and_then(|v| v.parse().ok()))
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Conflicts and status
    // ─────────────────────────────────────────────────────────────────────────

    /// Settle a conflict with `local_wins` or `remote_wins`.
    pub async fn resolve(&self, id: &ConflictId, resolution: Resolution) -> Result<Conflict> {
        let _cycle = self.cycle.lock().await;
        resolve::resolve(self.store.as_ref(), self.policy(), id, resolution).await
    }

    /// Settle a conflict with a caller-built record.
    pub async fn merge(&self, id: &ConflictId, merged: Record) -> Result<Conflict> {
        let _cycle = self.cycle.lock().await;
        resolve::merge(self.store.as_ref(), self.policy(), id, merged).await
    }

    /// Conflicts ordered by detection time.
    pub async fn conflicts(&self, include_resolved: bool) -> Result<Vec<Conflict>> {
        Ok(self.store.list_conflicts(include_resolved).await?)
    }

    /// Pending, failed, and conflict counts for the UI.
    pub async fn queue_stats(&self) -> Result<QueueStats> {
        Ok(self.store.queue_stats().await?)
    }

    /// Compare local and remote state per collection.
    pub async fn verify_convergence(&self) -> Result<ConvergenceResult> {
        let _cycle = self.cycle.lock().await;
        convergence::verify_convergence(self.store.as_ref(), &self.remote).await
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Remote calls
    // ─────────────────────────────────────────────────────────────────────────

    async fn reachable(&self) -> bool {
        tokio::time::timeout(self.config.remote_timeout, self.remote.is_reachable())
            .await
            .unwrap_or(false)
    }

    async fn call<T, F>(&self, fut: F) -> std::result::Result<T, TransportError>
    where
        F: Future<Output = std::result::Result<T, TransportError>>,
    {
        let limit = self.config.remote_timeout;
        tokio::time::timeout(limit, fut)
            .await
            .unwrap_or(Err(TransportError::Timeout(limit)))
    }
}
