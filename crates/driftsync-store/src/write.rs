//! Write planning shared by every backend.
//!
//! Both backends decide what a put/delete stores and enqueues through these
//! functions, then apply the plan inside their own unit of work.

use driftsync_core::{now_millis, Operation, Origin, Record, SyncStatus};

/// Final stored form of `record` and the operation to enqueue, if any.
pub(crate) fn plan_put(
    existing: Option<&Record>,
    mut record: Record,
    origin: Origin,
) -> (Record, Option<Operation>) {
    if let Some(existing) = existing {
        record.updated_at = record.updated_at.max(existing.updated_at);
    }

    match origin {
        Origin::Local => {
            record.sync_status = SyncStatus::Pending;
            let op = if existing.is_some() {
                Operation::Update
            } else {
                Operation::Create
            };
            (record, Some(op))
        }
        Origin::Sync => (record, None),
    }
}

/// Enqueue timestamp that never runs behind the newest queued entry.
pub(crate) fn enqueue_timestamp(newest_queued: Option<i64>) -> i64 {
    let now = now_millis();
    newest_queued.map_or(now, |newest| now.max(newest))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_local_put_is_pending_create_then_update() {
        let incoming = Record::new("a", 5).with_status(SyncStatus::Synced);
        let (stored, op) = plan_put(None, incoming, Origin::Local);
        assert_eq!(stored.sync_status, SyncStatus::Pending);
        assert_eq!(op, Some(Operation::Create));

        let (_, op) = plan_put(Some(&stored), Record::new("a", 6), Origin::Local);
        assert_eq!(op, Some(Operation::Update));
    }

    #[test]
    fn test_updated_at_never_decreases() {
        let existing = Record::new("a", 100);
        let (stored, _) = plan_put(Some(&existing), Record::new("a", 50), Origin::Local);
        assert_eq!(stored.updated_at, 100);

        let (stored, _) = plan_put(Some(&existing), Record::new("a", 50), Origin::Sync);
        assert_eq!(stored.updated_at, 100);
    }

    #[test]
    fn test_sync_put_keeps_status_and_skips_outbox() {
        let incoming = Record::new("a", 1).with_status(SyncStatus::Synced);
        let (stored, op) = plan_put(None, incoming, Origin::Sync);
        assert_eq!(stored.sync_status, SyncStatus::Synced);
        assert_eq!(op, None);
    }

    #[test]
    fn test_enqueue_timestamp_is_monotonic() {
        let far_future = now_millis() + 60_000;
        assert_eq!(enqueue_timestamp(Some(far_future)), far_future);
        assert!(enqueue_timestamp(None) > 0);
    }
}
