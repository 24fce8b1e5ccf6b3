//! Remote transport abstraction.
//!
//! The engine only needs four calls from the remote authority: a liveness
//! probe, idempotent upsert and delete by id, and a delta fetch. Adapters for
//! REST, gRPC, or WebSockets implement [`RemoteTransport`]; tests use
//! [`memory::MemoryRemote`].

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;

use driftsync_core::Record;

use crate::error::TransportError;

/// Result type for transport operations.
pub type Result<T> = std::result::Result<T, TransportError>;

/// Records per collection returned by a delta fetch.
pub type RemoteDelta = BTreeMap<String, Vec<Record>>;

/// The remote authority, as seen by the sync engine.
///
/// Implementations must be thread-safe (Send + Sync).
#[async_trait]
pub trait RemoteTransport: Send + Sync {
    /// Whether a sync cycle should be attempted at all.
    async fn is_reachable(&self) -> bool;

    /// Store `record` under its id, replacing any previous version.
    ///
    /// Must be idempotent: applying the same record twice leaves the remote
    /// as a single application would.
    async fn upsert(&self, collection: &str, record: &Record) -> Result<()>;

    /// Remove a record by id. Deleting a missing record succeeds.
    async fn delete(&self, collection: &str, id: &str) -> Result<()>;

    /// Records with `updatedAt >= since`, or the full snapshot when `since`
    /// is `None`.
    async fn fetch_delta(&self, since: Option<i64>) -> Result<RemoteDelta>;
}

#[async_trait]
impl<T: RemoteTransport + ?Sized> RemoteTransport for Arc<T> {
    async fn is_reachable(&self) -> bool {
        (**self).is_reachable().await
    }

    async fn upsert(&self, collection: &str, record: &Record) -> Result<()> {
        (**self).upsert(collection, record).await
    }

    async fn delete(&self, collection: &str, id: &str) -> Result<()> {
        (**self).delete(collection, id).await
    }

    async fn fetch_delta(&self, since: Option<i64>) -> Result<RemoteDelta> {
        (**self).fetch_delta(since).await
    }
}

/// A simple in-memory remote for testing.
///
/// Holds one snapshot per collection and records every applied mutation so
/// tests can check replay order. Reachability, per-record rejection, and
/// latency can be injected.
pub mod memory {
    use super::*;
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;

    use driftsync_core::SyncStatus;
    use tokio::sync::RwLock;

    /// A mutation the remote accepted.
    #[derive(Debug, Clone, PartialEq, Eq)]
    pub enum AppliedOp {
        Upsert { collection: String, id: String },
        Delete { collection: String, id: String },
    }

    #[derive(Default)]
    struct RemoteState {
        collections: BTreeMap<String, BTreeMap<String, Record>>,
        applied: Vec<AppliedOp>,
        rejected: HashSet<(String, String)>,
        latency: Option<Duration>,
    }

    /// In-memory remote implementation.
    pub struct MemoryRemote {
        state: RwLock<RemoteState>,
        reachable: AtomicBool,
    }

    impl MemoryRemote {
        /// Create an empty, reachable remote.
        pub fn new() -> Arc<Self> {
            Arc::new(Self::default())
        }

        /// Simulate going offline or coming back.
        pub fn set_reachable(&self, reachable: bool) {
            self.reachable.store(reachable, Ordering::SeqCst);
        }

        /// Write a record directly, as another device would. Not logged in
        /// [`applied`](Self::applied).
        pub async fn seed(&self, collection: &str, record: Record) {
            let record = record.with_status(SyncStatus::Synced);
            let mut state = self.state.write().await;
            state
                .collections
                .entry(collection.to_string())
                .or_default()
                .insert(record.id.clone(), record);
        }

        /// Remove a record directly, as another device would.
        pub async fn unseed(&self, collection: &str, id: &str) {
            let mut state = self.state.write().await;
            if let Some(records) = state.collections.get_mut(collection) {
                records.remove(id);
            }
        }

        /// Refuse every mutation of this record until [`accept`](Self::accept).
        pub async fn reject(&self, collection: &str, id: &str) {
            let mut state = self.state.write().await;
            state
                .rejected
                .insert((collection.to_string(), id.to_string()));
        }

        /// Stop refusing mutations of this record.
        pub async fn accept(&self, collection: &str, id: &str) {
            let mut state = self.state.write().await;
            state
                .rejected
                .remove(&(collection.to_string(), id.to_string()));
        }

        /// Delay every call by `latency`.
        pub async fn set_latency(&self, latency: Option<Duration>) {
            self.state.write().await.latency = latency;
        }

        /// A record as the remote currently holds it.
        pub async fn get(&self, collection: &str, id: &str) -> Option<Record> {
            let state = self.state.read().await;
            state.collections.get(collection)?.get(id).cloned()
        }

        /// All records of a collection, ordered by id.
        pub async fn snapshot(&self, collection: &str) -> Vec<Record> {
            let state = self.state.read().await;
            state
                .collections
                .get(collection)
                .map(|records| records.values().cloned().collect())
                .unwrap_or_default()
        }

        /// Every accepted mutation, in the order it was applied.
        pub async fn applied(&self) -> Vec<AppliedOp> {
            self.state.read().await.applied.clone()
        }

        async fn enter(&self) -> Result<()> {
            let latency = self.state.read().await.latency;
            if let Some(latency) = latency {
                tokio::time::sleep(latency).await;
            }
            if self.reachable.load(Ordering::SeqCst) {
                Ok(())
            } else {
                Err(TransportError::Unreachable("memory remote is offline".into()))
            }
        }

        fn check_rejected(state: &RemoteState, collection: &str, id: &str) -> Result<()> {
            if state
                .rejected
                .contains(&(collection.to_string(), id.to_string()))
            {
                return Err(TransportError::Rejected {
                    message: format!("{}/{} rejected", collection, id),
                });
            }
            Ok(())
        }
    }

    impl Default for MemoryRemote {
        fn default() -> Self {
            Self {
                state: RwLock::new(RemoteState::default()),
                reachable: AtomicBool::new(true),
            }
        }
    }

    #[async_trait]
    impl RemoteTransport for MemoryRemote {
        async fn is_reachable(&self) -> bool {
            self.reachable.load(Ordering::SeqCst)
        }

        async fn upsert(&self, collection: &str, record: &Record) -> Result<()> {
            self.enter().await?;
            let mut state = self.state.write().await;
            Self::check_rejected(&state, collection, &record.id)?;

            let record = record.clone().with_status(SyncStatus::Synced);
            state.applied.push(AppliedOp::Upsert {
                collection: collection.to_string(),
                id: record.id.clone(),
            });
            state
                .collections
                .entry(collection.to_string())
                .or_default()
                .insert(record.id.clone(), record);
            Ok(())
        }

        async fn delete(&self, collection: &str, id: &str) -> Result<()> {
            self.enter().await?;
            let mut state = self.state.write().await;
            Self::check_rejected(&state, collection, id)?;

            state.applied.push(AppliedOp::Delete {
                collection: collection.to_string(),
                id: id.to_string(),
            });
            if let Some(records) = state.collections.get_mut(collection) {
                records.remove(id);
            }
            Ok(())
        }

        async fn fetch_delta(&self, since: Option<i64>) -> Result<RemoteDelta> {
            self.enter().await?;
            let state = self.state.read().await;
            let delta = state
                .collections
                .iter()
                .map(|(name, records)| {
                    let records: Vec<Record> = records
                        .values()
                        .filter(|r| since.map_or(true, |since| r.updated_at >= since))
                        .cloned()
                        .collect();
                    (name.clone(), records)
                })
                .filter(|(_, records)| !records.is_empty())
                .collect();
            Ok(delta)
        }
    }
}
