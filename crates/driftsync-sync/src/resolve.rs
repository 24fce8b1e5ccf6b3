//! Applying a decision to a recorded conflict.
//!
//! These work on a bare [`Store`], so a replica can settle conflicts while
//! offline. [`SyncEngine`](crate::SyncEngine) wraps them under its cycle lock.

use driftsync_core::{
    now_millis, Conflict, ConflictId, ConflictPolicy, Origin, Record, Resolution, SyncStatus,
};
use driftsync_store::Store;

use crate::error::{Result, SyncError};

/// Settle a conflict with [`Resolution::LocalWins`] or
/// [`Resolution::RemoteWins`].
///
/// - `RemoteWins` drops the record's outstanding outbox entries and writes
///   the remote version locally as synced. If the local side already pushed
///   over the remote, or was edited again since detection, the remote fields
///   are instead written as a new local version so the next push restores
///   them upstream.
/// - `LocalWins` re-stamps the current local record newer than the remote
///   version and queues it, so the next push overwrites the remote. A
///   pending local delete is left queued as is.
///
/// The conflict is marked resolved only after the decision is applied.
pub async fn resolve<S: Store + ?Sized>(
    store: &S,
    policy: &dyn ConflictPolicy,
    id: &ConflictId,
    resolution: Resolution,
) -> Result<Conflict> {
    let conflict = load_open(store, id).await?;

    match resolution {
        Resolution::RemoteWins => apply_remote(store, policy, &conflict).await?,
        Resolution::LocalWins => reassert_local(store, policy, &conflict).await?,
        Resolution::ManualMerge => {
            return Err(SyncError::InvalidResolution(
                "manual merge needs a merged record".into(),
            ))
        }
    }

    finish(store, conflict, resolution).await
}

/// Settle a conflict with a caller-built record.
///
/// The merged record is stamped newer than the remote version and written as
/// a local mutation, then the conflict is closed as
/// [`Resolution::ManualMerge`].
pub async fn merge<S: Store + ?Sized>(
    store: &S,
    policy: &dyn ConflictPolicy,
    id: &ConflictId,
    mut merged: Record,
) -> Result<Conflict> {
    let conflict = load_open(store, id).await?;
    if merged.id != conflict.record_id {
        return Err(SyncError::InvalidResolution(format!(
            "merged record {} does not match conflict record {}",
            merged.id, conflict.record_id
        )));
    }

    let stamp = policy.supersede(&conflict.remote_version, now_millis());
    merged.updated_at = merged.updated_at.max(stamp);
    store.put(&conflict.collection, merged, Origin::Local).await?;

    finish(store, conflict, Resolution::ManualMerge).await
}

async fn load_open<S: Store + ?Sized>(store: &S, id: &ConflictId) -> Result<Conflict> {
    let conflict = store
        .get_conflict(id)
        .await?
        .ok_or_else(|| SyncError::ConflictNotFound(id.clone()))?;
    if conflict.resolved {
        return Err(SyncError::AlreadyResolved(id.clone()));
    }
    Ok(conflict)
}

async fn apply_remote<S: Store + ?Sized>(
    store: &S,
    policy: &dyn ConflictPolicy,
    conflict: &Conflict,
) -> Result<()> {
    let collection = conflict.collection.as_str();
    let record_id = conflict.record_id.as_str();
    let remote = conflict.remote_version.clone();

    let outstanding = store.entries_for(collection, record_id).await?;
    let current = store.get(collection, record_id).await?;
    let restamped = current
        .as_ref()
        .is_some_and(|c| policy.remote_is_newer(&remote, c));
    let dropped = store.remove_entries_for(collection, record_id).await?;

    if !outstanding.is_empty() && !restamped {
        // The local mutation never reached the remote, which still holds
        // this version.
        let remote = remote.with_status(SyncStatus::Synced);
        store.put(collection, remote, Origin::Sync).await?;
        tracing::debug!(conflict = %conflict.id, dropped, "applied remote version");
        return Ok(());
    }

    // The local mutation was pushed or the record was edited again since
    // detection: write the remote fields as a new local version so push
    // puts them back upstream.
    let mut reasserted = remote;
    let stamp = policy.supersede(&reasserted, now_millis());
    reasserted.updated_at = current.map_or(stamp, |c| stamp.max(c.updated_at));
    store.put(collection, reasserted, Origin::Local).await?;
    tracing::debug!(
        conflict = %conflict.id,
        dropped,
        "re-asserted remote version upstream"
    );
    Ok(())
}

async fn reassert_local<S: Store + ?Sized>(
    store: &S,
    policy: &dyn ConflictPolicy,
    conflict: &Conflict,
) -> Result<()> {
    match store.get(&conflict.collection, &conflict.record_id).await? {
        Some(mut current) => {
            let stamp = policy.supersede(&conflict.remote_version, now_millis());
            current.updated_at = current.updated_at.max(stamp);
            store.put(&conflict.collection, current, Origin::Local).await?;
            tracing::debug!(conflict = %conflict.id, stamp, "re-asserted local version");
        }
        None => {
            tracing::debug!(conflict = %conflict.id, "local delete stands");
        }
    }
    Ok(())
}

async fn finish<S: Store + ?Sized>(
    store: &S,
    mut conflict: Conflict,
    resolution: Resolution,
) -> Result<Conflict> {
    let at = now_millis();
    if !store.mark_resolved(&conflict.id, resolution, at).await? {
        return Err(SyncError::AlreadyResolved(conflict.id));
    }
    conflict
        .mark_resolved(resolution, at)
        .map_err(|_| SyncError::AlreadyResolved(conflict.id.clone()))?;

    tracing::info!(
        conflict = %conflict.id,
        collection = %conflict.collection,
        record_id = %conflict.record_id,
        %resolution,
        "conflict resolved"
    );
    Ok(conflict)
}
