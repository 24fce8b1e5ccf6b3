//! Test fixtures and helpers.
//!
//! Common setup code for integration tests.

use std::sync::Arc;

use driftsync::Replica;
use driftsync_core::{CollectionSchema, IndexDef, Origin, Record, Schema, SyncStatus};
use driftsync_store::{MemoryStore, RecordStore};
use driftsync_sync::{MemoryRemote, SyncConfig};

/// Replica type used throughout the fixtures.
pub type TestReplica = Replica<MemoryStore, Arc<MemoryRemote>>;

/// Collections used by the fixtures: expenses indexed by category, and
/// unindexed garden beds.
pub fn farm_schema() -> Schema {
    Schema::new()
        .collection(CollectionSchema::new("expenses").index(IndexDef::on("category")))
        .collection(CollectionSchema::new("beds"))
}

/// A test fixture with an in-memory replica and the remote it syncs with.
pub struct TestFixture {
    pub remote: Arc<MemoryRemote>,
    pub replica: TestReplica,
}

impl TestFixture {
    /// Create a fixture with the default config.
    pub fn new() -> Self {
        Self::with_config(SyncConfig::default())
    }

    /// Create a fixture with a custom config.
    pub fn with_config(config: SyncConfig) -> Self {
        Self::on_remote(MemoryRemote::new(), config)
    }

    /// Create a fixture sharing an existing remote.
    pub fn on_remote(remote: Arc<MemoryRemote>, config: SyncConfig) -> Self {
        let replica = Replica::in_memory(farm_schema(), remote.clone(), config)
            .expect("fixture schema is valid");
        Self { remote, replica }
    }

    /// Write a record as a local mutation.
    pub async fn local(&self, collection: &str, record: Record) -> Record {
        self.replica
            .put(collection, record)
            .await
            .expect("local put failed")
    }

    /// Write a record as if a previous pull had delivered it.
    pub async fn synced(&self, collection: &str, record: Record) -> Record {
        let record = record.with_status(SyncStatus::Synced);
        self.replica
            .store()
            .put(collection, record, Origin::Sync)
            .await
            .expect("sync put failed")
    }

    /// Write a record on the remote, as another device would.
    pub async fn seed_remote(&self, collection: &str, record: Record) {
        self.remote.seed(collection, record).await;
    }

    /// Current local copy of a record.
    pub async fn get(&self, collection: &str, id: &str) -> Option<Record> {
        self.replica
            .get(collection, id)
            .await
            .expect("get failed")
    }
}

impl Default for TestFixture {
    fn default() -> Self {
        Self::new()
    }
}

/// An expense record.
pub fn expense(id: &str, updated_at: i64, amount: i64) -> Record {
    Record::new(id, updated_at).with_field("amount", amount)
}

/// Create multiple replicas syncing through one remote.
pub fn multi_replica_fixtures(count: usize) -> Vec<TestFixture> {
    let remote = MemoryRemote::new();
    (0..count)
        .map(|_| TestFixture::on_remote(remote.clone(), SyncConfig::default()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use driftsync_store::Outbox;

    #[tokio::test]
    async fn test_fixture_writes() {
        let fixture = TestFixture::new();
        fixture.local("expenses", expense("e1", 100, 10)).await;
        fixture.synced("beds", Record::new("b1", 1)).await;
        fixture.seed_remote("expenses", expense("e1", 200, 99)).await;

        let e1 = fixture.get("expenses", "e1").await.unwrap();
        assert_eq!(e1.sync_status, SyncStatus::Pending);
        let b1 = fixture.replica.store().get("beds", "b1").await.unwrap().unwrap();
        assert_eq!(b1.sync_status, SyncStatus::Synced);
        assert_eq!(fixture.replica.store().enumerate_pending().await.unwrap().len(), 1);
        assert!(fixture.remote.get("expenses", "e1").await.is_some());
    }

    #[tokio::test]
    async fn test_multi_replica_share_remote() {
        let replicas = multi_replica_fixtures(2);
        replicas[0].local("beds", Record::new("b1", 1)).await;
        replicas[0].replica.sync().await.unwrap();
        replicas[1].replica.sync().await.unwrap();
        assert!(replicas[1].get("beds", "b1").await.is_some());
    }
}
