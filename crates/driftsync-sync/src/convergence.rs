//! Convergence verification.
//!
//! After a quiet sync cycle the local store and the remote should hold the
//! same records. Both sides are reduced to one deterministic hash per
//! collection and compared.

use driftsync_core::Record;
use driftsync_store::Store;

use crate::error::Result;
use crate::transport::RemoteTransport;

/// Compute a deterministic state hash for one collection.
///
/// Algorithm:
/// 1. Sort records by id
/// 2. Hash: Blake3(prefix || collection || (id || updatedAt || fields)*)
///
/// `syncStatus` is excluded: it is local bookkeeping, not record state.
pub fn compute_state_hash(collection: &str, records: &[Record]) -> blake3::Hash {
    let mut sorted: Vec<&Record> = records.iter().collect();
    sorted.sort_by(|a, b| a.id.cmp(&b.id));

    let mut hasher = blake3::Hasher::new();
    hasher.update(b"driftsync-state-v0:");
    update_framed(&mut hasher, collection.as_bytes());

    for record in sorted {
        update_framed(&mut hasher, record.id.as_bytes());
        hasher.update(&record.updated_at.to_le_bytes());
        // serde_json::Map is ordered by key, so this is canonical.
        let fields = serde_json::Value::Object(record.fields.clone()).to_string();
        update_framed(&mut hasher, fields.as_bytes());
    }

    hasher.finalize()
}

fn update_framed(hasher: &mut blake3::Hasher, bytes: &[u8]) {
    hasher.update(&(bytes.len() as u64).to_le_bytes());
    hasher.update(bytes);
}

/// Compare every declared collection against the remote's full snapshot.
pub async fn verify_convergence<S, R>(store: &S, remote: &R) -> Result<ConvergenceResult>
where
    S: Store + ?Sized,
    R: RemoteTransport + ?Sized,
{
    let snapshot = remote.fetch_delta(None).await?;
    let mut collections = Vec::new();

    for collection in store.schema().names() {
        let local = store.get_all(&collection).await?;
        let remote_records = snapshot
            .get(&collection)
            .map(Vec::as_slice)
            .unwrap_or_default();

        let local_hash = compute_state_hash(&collection, &local);
        let remote_hash = compute_state_hash(&collection, remote_records);
        if local_hash != remote_hash {
            tracing::debug!(
                %collection,
                local = local.len(),
                remote = remote_records.len(),
                "collection diverged"
            );
            collections.push(collection);
        }
    }

    if collections.is_empty() {
        Ok(ConvergenceResult::Converged)
    } else {
        Ok(ConvergenceResult::Diverged { collections })
    }
}

/// Result of convergence verification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConvergenceResult {
    /// Local and remote hold identical records.
    Converged,
    /// These collections differ (may need more sync rounds or a resolution).
    Diverged { collections: Vec<String> },
}

impl ConvergenceResult {
    /// Check if local and remote have converged.
    pub fn is_converged(&self) -> bool {
        matches!(self, ConvergenceResult::Converged)
    }
}
