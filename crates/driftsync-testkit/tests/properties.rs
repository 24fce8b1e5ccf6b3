//! Property tests for the outbox and sync engine guarantees.

use std::collections::BTreeMap;
use std::sync::Arc;

use proptest::prelude::*;

use driftsync_core::{Operation, Origin, Record, Resolution, SyncStatus};
use driftsync_store::{MemoryStore, Outbox, RecordStore, SqliteStore, Store};
use driftsync_sync::{AppliedOp, MemoryRemote, RemoteTransport, SyncConfig, SyncEngine, SyncError};
use driftsync_testkit::fixtures::{expense, farm_schema, TestFixture};
use driftsync_testkit::generators::{ordered_timestamps, record, record_id, write_ops, WriteOp};

fn block_on<F: std::future::Future>(fut: F) -> F::Output {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap()
        .block_on(fut)
}

/// Apply writes as local mutations; returns how many actually changed
/// something.
async fn apply<S: Store>(store: &S, ops: &[WriteOp]) -> usize {
    let mut effective = 0;
    for (i, op) in ops.iter().enumerate() {
        match op {
            WriteOp::Put { id, amount } => {
                store
                    .put("expenses", expense(id, i as i64, *amount), Origin::Local)
                    .await
                    .unwrap();
                effective += 1;
            }
            WriteOp::Delete { id } => {
                if store.delete("expenses", id, Origin::Local).await.unwrap() {
                    effective += 1;
                }
            }
        }
    }
    effective
}

/// Every local mutation has exactly one entry, and the newest entry per
/// record agrees with whether the record exists.
async fn check_dual_write<S: Store>(store: &S, ops: &[WriteOp]) {
    let effective = apply(store, ops).await;
    let entries = store.enumerate_pending().await.unwrap();
    assert_eq!(entries.len(), effective);

    let mut newest: BTreeMap<String, Operation> = BTreeMap::new();
    for entry in &entries {
        newest.insert(entry.record_id.clone(), entry.operation);
    }
    for (id, operation) in newest {
        let exists = store.get("expenses", &id).await.unwrap().is_some();
        assert_eq!(exists, operation != Operation::Delete, "record {}", id);
    }

    // A write that fails leaves neither half behind.
    assert!(store
        .put("livestock", Record::new("goat", 1), Origin::Local)
        .await
        .is_err());
    assert_eq!(store.enumerate_pending().await.unwrap().len(), effective);
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn test_dual_write_atomicity_memory(ops in write_ops(30)) {
        block_on(async {
            let store = MemoryStore::new(farm_schema()).unwrap();
            check_dual_write(&store, &ops).await;
        });
    }

    #[test]
    fn test_dual_write_atomicity_sqlite(ops in write_ops(30)) {
        block_on(async {
            let store = SqliteStore::open_memory(farm_schema()).unwrap();
            check_dual_write(&store, &ops).await;
        });
    }

    #[test]
    fn test_push_replays_in_fifo_order(ids in prop::collection::vec(record_id(), 1..40)) {
        block_on(async {
            let fixture = TestFixture::new();
            for (i, id) in ids.iter().enumerate() {
                fixture.local("expenses", expense(id, i as i64, i as i64)).await;
            }

            let report = fixture.replica.push().await.unwrap();
            assert_eq!(report.processed, ids.len());

            let expected: Vec<AppliedOp> = ids
                .iter()
                .map(|id| AppliedOp::Upsert { collection: "expenses".into(), id: id.clone() })
                .collect();
            assert_eq!(fixture.remote.applied().await, expected);
        });
    }

    #[test]
    fn test_replayed_push_is_idempotent(ops in write_ops(20)) {
        block_on(async {
            // Reference: a single clean push.
            let clean = TestFixture::new();
            apply(clean.replica.store(), &ops).await;
            clean.replica.push().await.unwrap();
            let expected = clean.remote.snapshot("expenses").await;

            // Crash after the remote applied every entry but before any was
            // removed locally: the whole queue is replayed.
            let crashed = TestFixture::new();
            let store = crashed.replica.store();
            apply(store, &ops).await;
            for entry in store.enumerate_pending().await.unwrap() {
                match store.get("expenses", &entry.record_id).await.unwrap() {
                    Some(r) => crashed.remote.upsert("expenses", &r).await.unwrap(),
                    None => crashed.remote.delete("expenses", &entry.record_id).await.unwrap(),
                }
            }
            crashed.replica.push().await.unwrap();

            assert_eq!(crashed.remote.snapshot("expenses").await, expected);
            assert!(crashed.replica.verify_convergence().await.unwrap().is_converged());
        });
    }

    #[test]
    fn test_dirty_local_is_never_overwritten(
        local in record(Just("e1".to_string())),
        remote in record(Just("e1".to_string())),
        (t1, t2) in ordered_timestamps(),
    ) {
        block_on(async {
            let fixture = TestFixture::new();
            let mut local = local;
            local.updated_at = t1;
            let stored = fixture.local("expenses", local).await;
            let mut remote = remote;
            remote.updated_at = t2;
            fixture.seed_remote("expenses", remote).await;

            let first = fixture.replica.pull().await.unwrap();
            let second = fixture.replica.pull().await.unwrap();
            assert_eq!((first.conflicts, first.pulled), (1, 0));
            assert_eq!(second.pulled, 0);

            assert_eq!(fixture.get("expenses", "e1").await, Some(stored));
            assert_eq!(fixture.replica.conflicts(false).await.unwrap().len(), 1);
        });
    }

    #[test]
    fn test_clean_local_is_overwritten(
        local in record(Just("e1".to_string())),
        remote in record(Just("e1".to_string())),
        (t1, t2) in ordered_timestamps(),
    ) {
        block_on(async {
            let fixture = TestFixture::new();
            let mut local = local;
            local.updated_at = t1;
            fixture.synced("expenses", local).await;
            let mut remote = remote;
            remote.updated_at = t2;
            fixture.seed_remote("expenses", remote.clone()).await;

            let report = fixture.replica.pull().await.unwrap();
            assert_eq!((report.pulled, report.conflicts), (1, 0));

            let now = fixture.get("expenses", "e1").await.unwrap();
            assert_eq!(now.fields, remote.fields);
            assert_eq!(now.updated_at, t2);
            assert_eq!(now.sync_status, SyncStatus::Synced);
            assert!(fixture.replica.conflicts(true).await.unwrap().is_empty());
            assert_eq!(fixture.replica.queue_stats().await.unwrap().pending, 0);
        });
    }

    #[test]
    fn test_resolution_is_terminal(first_local in any::<bool>(), second_local in any::<bool>()) {
        let pick = |local: bool| if local { Resolution::LocalWins } else { Resolution::RemoteWins };
        block_on(async {
            let fixture = TestFixture::new();
            fixture.local("expenses", expense("e1", 100, 10)).await;
            fixture.seed_remote("expenses", expense("e1", 200, 99)).await;
            fixture.replica.pull().await.unwrap();
            let conflict = fixture.replica.conflicts(false).await.unwrap().remove(0);

            let resolved = fixture.replica.resolve(&conflict.id, pick(first_local)).await.unwrap();
            assert!(resolved.resolved);
            let after_first = fixture.get("expenses", "e1").await;
            let queued = fixture.replica.queue_stats().await.unwrap();

            let again = fixture.replica.resolve(&conflict.id, pick(second_local)).await;
            assert!(matches!(
                again,
                Err(driftsync::ReplicaError::Sync(SyncError::AlreadyResolved(_)))
            ));
            assert_eq!(fixture.get("expenses", "e1").await, after_first);
            assert_eq!(fixture.replica.queue_stats().await.unwrap(), queued);

            let all = fixture.replica.conflicts(true).await.unwrap();
            assert_eq!(all.len(), 1);
            assert_eq!(all[0].resolution, Some(pick(first_local)));
        });
    }
}

#[tokio::test]
async fn test_engine_over_sqlite_matches_memory() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(SqliteStore::open(dir.path().join("p.db"), farm_schema()).unwrap());
    let remote = MemoryRemote::new();
    let engine = SyncEngine::new(store.clone(), remote.clone(), SyncConfig::default());

    store
        .put("expenses", expense("e1", 100, 10), Origin::Local)
        .await
        .unwrap();
    remote.seed("expenses", expense("e1", 200, 99)).await;
    remote.seed("expenses", expense("e2", 50, 5)).await;

    let pull = engine.pull().await.unwrap();
    assert_eq!((pull.pulled, pull.conflicts), (1, 1));
    let push = engine.push().await.unwrap();
    assert_eq!(push.processed, 1);

    let e1 = store.get("expenses", "e1").await.unwrap().unwrap();
    assert_eq!(e1.sync_status, SyncStatus::Synced);
    assert_eq!(engine.queue_stats().await.unwrap().conflicts, 1);
}
