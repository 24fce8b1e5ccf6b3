//! Subcommand implementations.

use anyhow::Context;
use serde::Serialize;

use driftsync_core::{ConflictId, EntryStatus, Resolution, TimestampPolicy};
use driftsync_store::{ConflictLog, Outbox, SqliteStore, Store};

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

pub async fn stats(store: &SqliteStore, json: bool) -> anyhow::Result<()> {
    let stats = store.queue_stats().await?;
    if json {
        return print_json(&stats);
    }
    println!("pending:   {}", stats.pending);
    println!("failed:    {}", stats.failed);
    println!("conflicts: {}", stats.conflicts);
    Ok(())
}

pub async fn outbox(store: &SqliteStore, failed_only: bool, json: bool) -> anyhow::Result<()> {
    let entries: Vec<_> = store
        .enumerate_pending()
        .await?
        .into_iter()
        .filter(|e| !failed_only || e.status == EntryStatus::Failed)
        .collect();
    if json {
        return print_json(&entries);
    }
    for entry in &entries {
        print!(
            "{}  {:<10} {:<6} {}/{}  retries={}",
            entry.id,
            entry.status.as_str(),
            entry.operation.as_str(),
            entry.collection,
            entry.record_id,
            entry.retry_count
        );
        match &entry.error {
            Some(error) => println!("  error: {}", error),
            None => println!(),
        }
    }
    println!("{} entries", entries.len());
    Ok(())
}

pub async fn conflicts(store: &SqliteStore, include_resolved: bool, json: bool) -> anyhow::Result<()> {
    let conflicts = store.list_conflicts(include_resolved).await?;
    if json {
        return print_json(&conflicts);
    }
    for conflict in &conflicts {
        let state = match conflict.resolution {
            Some(resolution) => resolution.to_string(),
            None => "open".to_string(),
        };
        let local = match &conflict.local_version {
            Some(local) => local.updated_at.to_string(),
            None => "deleted".to_string(),
        };
        println!(
            "{}  {}/{}  local={} remote={}  {}",
            conflict.id,
            conflict.collection,
            conflict.record_id,
            local,
            conflict.remote_version.updated_at,
            state
        );
    }
    println!("{} conflicts", conflicts.len());
    Ok(())
}

pub async fn resolve(
    store: &SqliteStore,
    id: &str,
    resolution: Resolution,
    json: bool,
) -> anyhow::Result<()> {
    let id = ConflictId::new(id);
    let conflict = driftsync_sync::resolve::resolve(store, &TimestampPolicy, &id, resolution)
        .await
        .with_context(|| format!("failed to resolve conflict {}", id))?;
    if json {
        return print_json(&conflict);
    }
    println!(
        "resolved {} ({}/{}) as {}",
        conflict.id, conflict.collection, conflict.record_id, resolution
    );
    Ok(())
}

pub async fn requeue(store: &SqliteStore) -> anyhow::Result<()> {
    let requeued = store.requeue_processing().await?;
    println!("requeued {} entries", requeued);
    Ok(())
}
