//! In-memory implementation of the store traits.
//!
//! Same semantics as SQLite with no persistence. Records, outbox, and meta
//! share one lock so a dual write is a single critical section; the conflict
//! log has its own lock and never blocks record writes.

use std::collections::{BTreeMap, HashMap};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;
use serde_json::Value;

use driftsync_core::{
    index_key, Conflict, ConflictId, EntryId, EntryStatus, Operation, Origin, OutboxEntry, Record,
    Resolution, Schema, SyncStatus,
};

use crate::error::{Result, StoreError};
use crate::index::{HashIndex, Index, ScanIndex};
use crate::traits::{ConflictLog, Outbox, RecordStore, Store};
use crate::write::{enqueue_timestamp, plan_put};

/// In-memory store implementation.
///
/// All data is lost when the store is dropped.
pub struct MemoryStore {
    schema: Schema,
    data: RwLock<Data>,
    conflicts: RwLock<BTreeMap<ConflictId, Conflict>>,
}

struct Data {
    collections: HashMap<String, Collection>,
    outbox: HashMap<EntryId, OutboxEntry>,
    next_seq: u64,
    meta: HashMap<String, String>,
}

struct Collection {
    records: BTreeMap<String, Record>,
    /// Declared indices by name.
    indexes: HashMap<String, Box<dyn Index>>,
}

impl Collection {
    fn store(&mut self, previous: Option<&Record>, record: Record) {
        for index in self.indexes.values_mut() {
            if let Some(previous) = previous {
                index.remove(previous);
            }
            index.insert(&record);
        }
        self.records.insert(record.id.clone(), record);
    }

    fn remove(&mut self, id: &str) -> Option<Record> {
        let removed = self.records.remove(id)?;
        for index in self.indexes.values_mut() {
            index.remove(&removed);
        }
        Some(removed)
    }
}

impl MemoryStore {
    /// Create an empty store serving the collections in `schema`.
    pub fn new(schema: Schema) -> Result<Self> {
        schema.validate()?;

        let collections = schema
            .collections()
            .map(|c| {
                let indexes = c
                    .indexes
                    .iter()
                    .map(|def| {
                        let index: Box<dyn Index> = Box::new(HashIndex::new(def.clone()));
                        (def.name.clone(), index)
                    })
                    .collect();
                (
                    c.name.clone(),
                    Collection {
                        records: BTreeMap::new(),
                        indexes,
                    },
                )
            })
            .collect();

        Ok(Self {
            schema,
            data: RwLock::new(Data {
                collections,
                outbox: HashMap::new(),
                next_seq: 0,
                meta: HashMap::new(),
            }),
            conflicts: RwLock::new(BTreeMap::new()),
        })
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, Data>> {
        self.data
            .read()
            .map_err(|e| StoreError::LockPoisoned(e.to_string()))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, Data>> {
        self.data
            .write()
            .map_err(|e| StoreError::LockPoisoned(e.to_string()))
    }

    fn read_conflicts(&self) -> Result<RwLockReadGuard<'_, BTreeMap<ConflictId, Conflict>>> {
        self.conflicts
            .read()
            .map_err(|e| StoreError::LockPoisoned(e.to_string()))
    }

    fn write_conflicts(&self) -> Result<RwLockWriteGuard<'_, BTreeMap<ConflictId, Conflict>>> {
        self.conflicts
            .write()
            .map_err(|e| StoreError::LockPoisoned(e.to_string()))
    }
}

impl Data {
    fn collection(&self, name: &str) -> Result<&Collection> {
        self.collections
            .get(name)
            .ok_or_else(|| StoreError::UnknownCollection(name.to_string()))
    }

    fn set_status(&mut self, collection: &str, id: &str, status: SyncStatus) -> Result<bool> {
        let coll = self
            .collections
            .get_mut(collection)
            .ok_or_else(|| StoreError::UnknownCollection(collection.to_string()))?;
        let Some(previous) = coll.records.get(id).cloned() else {
            return Ok(false);
        };
        let updated = previous.clone().with_status(status);
        coll.store(Some(&previous), updated);
        Ok(true)
    }

    fn enqueue(&mut self, collection: &str, record_id: &str, op: Operation, payload: Option<Record>) {
        let newest = self.outbox.values().map(|e| e.timestamp).max();
        let mut entry = OutboxEntry::new(
            collection,
            record_id,
            op,
            payload,
            enqueue_timestamp(newest),
        );
        self.next_seq += 1;
        entry.seq = self.next_seq;
        tracing::debug!(
            entry = %entry.id,
            collection,
            record_id,
            operation = %op,
            "outbox entry enqueued"
        );
        self.outbox.insert(entry.id.clone(), entry);
    }
}

#[async_trait]
impl RecordStore for MemoryStore {
    fn schema(&self) -> &Schema {
        &self.schema
    }

    async fn get(&self, collection: &str, id: &str) -> Result<Option<Record>> {
        let data = self.read()?;
        Ok(data.collection(collection)?.records.get(id).cloned())
    }

    async fn get_all(&self, collection: &str) -> Result<Vec<Record>> {
        let data = self.read()?;
        Ok(data.collection(collection)?.records.values().cloned().collect())
    }

    async fn get_all_by_index(
        &self,
        collection: &str,
        index: &str,
        value: &Value,
    ) -> Result<Vec<Record>> {
        let data = self.read()?;
        let coll = data.collection(collection)?;
        let key = index_key(value);

        let ids = match coll.indexes.get(index) {
            Some(declared) => declared.lookup(&coll.records, &key),
            None => ScanIndex::new(index).lookup(&coll.records, &key),
        };

        Ok(ids
            .iter()
            .filter_map(|id| coll.records.get(id).cloned())
            .collect())
    }

    async fn put(&self, collection: &str, record: Record, origin: Origin) -> Result<Record> {
        record.validate()?;
        let mut data = self.write()?;

        let existing = data
            .collection(collection)?
            .records
            .get(&record.id)
            .cloned();
        let (stored, op) = plan_put(existing.as_ref(), record, origin);

        if let Some(op) = op {
            data.enqueue(collection, &stored.id, op, Some(stored.clone()));
        }
        if let Some(coll) = data.collections.get_mut(collection) {
            coll.store(existing.as_ref(), stored.clone());
        }

        Ok(stored)
    }

    async fn put_if_unchanged(
        &self,
        collection: &str,
        record: Record,
        expected: Option<&Record>,
    ) -> Result<bool> {
        record.validate()?;
        let mut data = self.write()?;

        let existing = data
            .collection(collection)?
            .records
            .get(&record.id)
            .cloned();
        if existing.as_ref() != expected {
            return Ok(false);
        }
        let (stored, _) = plan_put(existing.as_ref(), record, Origin::Sync);
        if let Some(coll) = data.collections.get_mut(collection) {
            coll.store(existing.as_ref(), stored);
        }
        Ok(true)
    }

    async fn delete(&self, collection: &str, id: &str, origin: Origin) -> Result<bool> {
        let mut data = self.write()?;
        data.collection(collection)?;

        let removed = data
            .collections
            .get_mut(collection)
            .and_then(|coll| coll.remove(id));

        let Some(removed) = removed else {
            return Ok(false);
        };
        if origin == Origin::Local {
            data.enqueue(collection, id, Operation::Delete, Some(removed));
        }
        Ok(true)
    }

    async fn set_sync_status(
        &self,
        collection: &str,
        id: &str,
        status: SyncStatus,
    ) -> Result<bool> {
        let mut data = self.write()?;
        data.set_status(collection, id, status)
    }

    async fn mark_synced(&self, collection: &str, id: &str) -> Result<bool> {
        let mut data = self.write()?;
        let outstanding = data
            .outbox
            .values()
            .any(|e| e.collection == collection && e.record_id == id);
        if outstanding {
            return Ok(false);
        }
        data.set_status(collection, id, SyncStatus::Synced)
    }
}

#[async_trait]
impl Outbox for MemoryStore {
    async fn enumerate_pending(&self) -> Result<Vec<OutboxEntry>> {
        let data = self.read()?;
        let mut entries: Vec<OutboxEntry> = data.outbox.values().cloned().collect();
        entries.sort_by_key(OutboxEntry::order_key);
        Ok(entries)
    }

    async fn get_entry(&self, id: &EntryId) -> Result<Option<OutboxEntry>> {
        let data = self.read()?;
        Ok(data.outbox.get(id).cloned())
    }

    async fn entries_for(&self, collection: &str, record_id: &str) -> Result<Vec<OutboxEntry>> {
        let data = self.read()?;
        let mut entries: Vec<OutboxEntry> = data
            .outbox
            .values()
            .filter(|e| e.collection == collection && e.record_id == record_id)
            .cloned()
            .collect();
        entries.sort_by_key(OutboxEntry::order_key);
        Ok(entries)
    }

    async fn mark_processing(&self, id: &EntryId) -> Result<bool> {
        let mut data = self.write()?;
        Ok(match data.outbox.get_mut(id) {
            Some(entry) => {
                entry.status = EntryStatus::Processing;
                true
            }
            None => false,
        })
    }

    async fn mark_failed(&self, id: &EntryId, error: &str) -> Result<bool> {
        let mut data = self.write()?;
        Ok(match data.outbox.get_mut(id) {
            Some(entry) => {
                entry.status = EntryStatus::Failed;
                entry.retry_count += 1;
                entry.error = Some(error.to_string());
                true
            }
            None => false,
        })
    }

    async fn remove_entry(&self, id: &EntryId) -> Result<bool> {
        let mut data = self.write()?;
        Ok(data.outbox.remove(id).is_some())
    }

    async fn remove_entries_through(&self, entry: &OutboxEntry) -> Result<usize> {
        let mut data = self.write()?;
        let before = data.outbox.len();
        let through = entry.order_key();
        data.outbox.retain(|_, e| {
            !(e.collection == entry.collection
                && e.record_id == entry.record_id
                && e.order_key() <= through)
        });
        Ok(before - data.outbox.len())
    }

    async fn remove_entries_for(&self, collection: &str, record_id: &str) -> Result<usize> {
        let mut data = self.write()?;
        let before = data.outbox.len();
        data.outbox
            .retain(|_, e| !(e.collection == collection && e.record_id == record_id));
        Ok(before - data.outbox.len())
    }

    async fn requeue_processing(&self) -> Result<usize> {
        let mut data = self.write()?;
        let mut requeued = 0;
        for entry in data.outbox.values_mut() {
            if entry.status == EntryStatus::Processing {
                entry.status = EntryStatus::Pending;
                requeued += 1;
            }
        }
        Ok(requeued)
    }

    async fn entry_counts(&self) -> Result<(usize, usize)> {
        let data = self.read()?;
        let failed = data
            .outbox
            .values()
            .filter(|e| e.status == EntryStatus::Failed)
            .count();
        Ok((data.outbox.len() - failed, failed))
    }
}

#[async_trait]
impl ConflictLog for MemoryStore {
    async fn save_conflict(&self, conflict: &Conflict) -> Result<()> {
        let mut conflicts = self.write_conflicts()?;
        conflicts.insert(conflict.id.clone(), conflict.clone());
        Ok(())
    }

    async fn get_conflict(&self, id: &ConflictId) -> Result<Option<Conflict>> {
        let conflicts = self.read_conflicts()?;
        Ok(conflicts.get(id).cloned())
    }

    async fn open_conflict_for(
        &self,
        collection: &str,
        record_id: &str,
    ) -> Result<Option<Conflict>> {
        let conflicts = self.read_conflicts()?;
        Ok(conflicts
            .values()
            .find(|c| !c.resolved && c.collection == collection && c.record_id == record_id)
            .cloned())
    }

    async fn list_conflicts(&self, include_resolved: bool) -> Result<Vec<Conflict>> {
        let conflicts = self.read_conflicts()?;
        let mut list: Vec<Conflict> = conflicts
            .values()
            .filter(|c| include_resolved || !c.resolved)
            .cloned()
            .collect();
        list.sort_by(|a, b| (a.detected_at, &a.id).cmp(&(b.detected_at, &b.id)));
        Ok(list)
    }

    async fn mark_resolved(
        &self,
        id: &ConflictId,
        resolution: Resolution,
        at: i64,
    ) -> Result<bool> {
        let mut conflicts = self.write_conflicts()?;
        let conflict = conflicts
            .get_mut(id)
            .ok_or_else(|| StoreError::NotFound(format!("conflict {}", id)))?;
        Ok(conflict.mark_resolved(resolution, at).is_ok())
    }

    async fn count_open_conflicts(&self) -> Result<usize> {
        let conflicts = self.read_conflicts()?;
        Ok(conflicts.values().filter(|c| !c.resolved).count())
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn get_meta(&self, key: &str) -> Result<Option<String>> {
        let data = self.read()?;
        Ok(data.meta.get(key).cloned())
    }

    async fn set_meta(&self, key: &str, value: &str) -> Result<()> {
        let mut data = self.write()?;
        data.meta.insert(key.to_string(), value.to_string());
        Ok(())
    }
}
