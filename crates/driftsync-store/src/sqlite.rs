//! SQLite implementation of the store traits.
//!
//! This is the primary storage backend. It uses rusqlite with bundled SQLite,
//! wrapped in async via tokio::spawn_blocking. Record fields and record
//! snapshots are stored as CBOR blobs.

use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use rusqlite::{params, Connection, OptionalExtension};
use serde_json::Value;

use driftsync_core::{
    index_key, CollectionSchema, Conflict, ConflictId, EntryId, EntryStatus, Fields, Operation,
    Origin, OutboxEntry, Record, Resolution, Schema, SyncStatus,
};

use crate::error::{Result, StoreError};
use crate::index::matches_key;
use crate::migration;
use crate::traits::{ConflictLog, Outbox, RecordStore, Store};
use crate::write::{enqueue_timestamp, plan_put};

/// SQLite-based store implementation.
///
/// Thread-safe via internal Mutex. All operations use spawn_blocking
/// to avoid blocking the async runtime.
pub struct SqliteStore {
    schema: Arc<Schema>,
    /// The SQLite connection, protected by a mutex.
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    /// Open a SQLite database at the given path.
    ///
    /// Creates the file and runs migrations if it doesn't exist.
    pub fn open(path: impl AsRef<Path>, schema: Schema) -> Result<Self> {
        let conn = Connection::open(path)?;
        Self::init(conn, schema)
    }

    /// Open an in-memory SQLite database.
    ///
    /// Useful for testing.
    pub fn open_memory(schema: Schema) -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Self::init(conn, schema)
    }

    /// Open an existing database with a schema derived from its contents.
    ///
    /// Every collection that has records, outbox entries, or conflicts is
    /// declared, without secondary indices. Index queries still work through
    /// the scan fallback. Meant for operator tooling that does not know the
    /// application's schema.
    pub fn open_discovered(path: impl AsRef<Path>) -> Result<Self> {
        let mut conn = Connection::open(path)?;
        migration::migrate(&mut conn)?;

        let names = persisted_collections(&conn)?;
        let schema = names
            .into_iter()
            .fold(Schema::new(), |schema, name| {
                schema.collection(CollectionSchema::new(name))
            });
        Self::init(conn, schema)
    }

    fn init(mut conn: Connection, schema: Schema) -> Result<Self> {
        schema.validate()?;
        migration::migrate(&mut conn)?;
        rebuild_indexes(&mut conn, &schema)?;
        Ok(Self {
            schema: Arc::new(schema),
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn check(&self, collection: &str) -> Result<()> {
        if self.schema.contains(collection) {
            Ok(())
        } else {
            Err(StoreError::UnknownCollection(collection.to_string()))
        }
    }

    /// Run `f` against the connection on the blocking pool.
    async fn run<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Connection, &Schema) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = self.conn.clone();
        let schema = self.schema.clone();

        tokio::task::spawn_blocking(move || {
            let mut conn = conn
                .lock()
                .map_err(|e| StoreError::LockPoisoned(e.to_string()))?;
            f(&mut conn, &schema)
        })
        .await
        .map_err(|e| StoreError::Task(e.to_string()))?
    }
}

// CBOR helpers. Records go through their JSON form so the envelope attributes
// and domain fields share one encoding.

fn encode_cbor(value: &Value) -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    ciborium::into_writer(value, &mut buf).map_err(|e| StoreError::Serialization(e.to_string()))?;
    Ok(buf)
}

fn decode_cbor(bytes: &[u8]) -> Result<Value> {
    ciborium::from_reader(bytes).map_err(|e| StoreError::Serialization(e.to_string()))
}

fn encode_record(record: &Record) -> Result<Vec<u8>> {
    encode_cbor(&record.to_json())
}

fn decode_record(bytes: &[u8]) -> Result<Record> {
    Record::from_json(decode_cbor(bytes)?).map_err(|e| StoreError::Serialization(e.to_string()))
}

fn parse<T>(value: &str) -> Result<T>
where
    T: std::str::FromStr<Err = driftsync_core::CoreError>,
{
    value
        .parse()
        .map_err(|e: driftsync_core::CoreError| StoreError::InvalidData(e.to_string()))
}

const RECORD_COLUMNS: &str = "id, updated_at, sync_status, fields";

type RecordRow = (String, i64, String, Vec<u8>);

fn read_record_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<RecordRow> {
    Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?))
}

fn record_from_row((id, updated_at, sync_status, fields): RecordRow) -> Result<Record> {
    let fields: Fields = match decode_cbor(&fields)? {
        Value::Object(map) => map,
        other => {
            return Err(StoreError::InvalidData(format!(
                "record {} fields are not an object: {}",
                id, other
            )))
        }
    };
    Ok(Record {
        id,
        updated_at,
        sync_status: parse::<SyncStatus>(&sync_status)?,
        fields,
    })
}

fn load_record(conn: &Connection, collection: &str, id: &str) -> Result<Option<Record>> {
    let row = conn
        .query_row(
            &format!(
                "SELECT {} FROM records WHERE collection = ?1 AND id = ?2",
                RECORD_COLUMNS
            ),
            params![collection, id],
            read_record_row,
        )
        .optional()?;
    row.map(record_from_row).transpose()
}

fn load_all(conn: &Connection, collection: &str) -> Result<Vec<Record>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM records WHERE collection = ?1 ORDER BY id",
        RECORD_COLUMNS
    ))?;
    let rows = stmt
        .query_map(params![collection], read_record_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    rows.into_iter().map(record_from_row).collect()
}

/// Write index keys for `record` under every declared index.
fn index_record(conn: &Connection, schema: &Schema, collection: &str, record: &Record) -> Result<()> {
    conn.execute(
        "DELETE FROM record_index WHERE collection = ?1 AND record_id = ?2",
        params![collection, record.id],
    )?;

    let Some(declared) = schema.get(collection) else {
        return Ok(());
    };
    for index in &declared.indexes {
        if let Some(key) = index.key_of(record) {
            conn.execute(
                "INSERT INTO record_index (collection, index_name, key, record_id)
                 VALUES (?1, ?2, ?3, ?4)",
                params![collection, index.name, key, record.id],
            )?;
        }
    }
    Ok(())
}

fn upsert_record(conn: &Connection, schema: &Schema, collection: &str, record: &Record) -> Result<()> {
    let fields = encode_cbor(&Value::Object(record.fields.clone()))?;
    conn.execute(
        "INSERT INTO records (collection, id, updated_at, sync_status, fields)
         VALUES (?1, ?2, ?3, ?4, ?5)
         ON CONFLICT (collection, id) DO UPDATE SET
            updated_at = excluded.updated_at,
            sync_status = excluded.sync_status,
            fields = excluded.fields",
        params![
            collection,
            record.id,
            record.updated_at,
            record.sync_status.as_str(),
            fields
        ],
    )?;
    index_record(conn, schema, collection, record)
}

fn update_status(
    conn: &Connection,
    schema: &Schema,
    collection: &str,
    id: &str,
    status: SyncStatus,
) -> Result<bool> {
    let Some(mut record) = load_record(conn, collection, id)? else {
        return Ok(false);
    };
    record.sync_status = status;
    upsert_record(conn, schema, collection, &record)?;
    Ok(true)
}

/// Recompute the maintained index rows from the records table.
///
/// Run on open so a changed index declaration never serves stale keys.
fn rebuild_indexes(conn: &mut Connection, schema: &Schema) -> Result<()> {
    let tx = conn.transaction()?;
    for collection in schema.collections() {
        tx.execute(
            "DELETE FROM record_index WHERE collection = ?1",
            params![collection.name],
        )?;
        if collection.indexes.is_empty() {
            continue;
        }
        for record in load_all(&tx, &collection.name)? {
            index_record(&tx, schema, &collection.name, &record)?;
        }
    }
    tx.commit()?;
    Ok(())
}

/// Distinct collection names referenced anywhere in the database.
fn persisted_collections(conn: &Connection) -> Result<Vec<String>> {
    let mut stmt = conn.prepare(
        "SELECT collection FROM records
         UNION SELECT collection FROM outbox
         UNION SELECT collection FROM conflict_log
         ORDER BY 1",
    )?;
    let names = stmt
        .query_map([], |row| row.get(0))?
        .collect::<rusqlite::Result<Vec<String>>>()?;
    Ok(names)
}

fn enqueue(
    conn: &Connection,
    collection: &str,
    record_id: &str,
    op: Operation,
    payload: Option<&Record>,
) -> Result<()> {
    let newest: Option<i64> =
        conn.query_row("SELECT MAX(timestamp) FROM outbox", [], |row| row.get(0))?;
    let entry = OutboxEntry::new(
        collection,
        record_id,
        op,
        payload.cloned(),
        enqueue_timestamp(newest),
    );
    let payload = payload.map(encode_record).transpose()?;

    conn.execute(
        "INSERT INTO outbox (id, collection, record_id, operation, payload, timestamp, status, retry_count)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, 0)",
        params![
            entry.id.as_str(),
            collection,
            record_id,
            op.as_str(),
            payload,
            entry.timestamp,
            EntryStatus::Pending.as_str(),
        ],
    )?;
    tracing::debug!(
        entry = %entry.id,
        seq = conn.last_insert_rowid(),
        collection,
        record_id,
        operation = %op,
        "outbox entry enqueued"
    );
    Ok(())
}

const ENTRY_COLUMNS: &str =
    "seq, id, collection, record_id, operation, payload, timestamp, status, retry_count, error";

struct EntryRow {
    seq: i64,
    id: String,
    collection: String,
    record_id: String,
    operation: String,
    payload: Option<Vec<u8>>,
    timestamp: i64,
    status: String,
    retry_count: i64,
    error: Option<String>,
}

fn read_entry_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<EntryRow> {
    Ok(EntryRow {
        seq: row.get(0)?,
        id: row.get(1)?,
        collection: row.get(2)?,
        record_id: row.get(3)?,
        operation: row.get(4)?,
        payload: row.get(5)?,
        timestamp: row.get(6)?,
        status: row.get(7)?,
        retry_count: row.get(8)?,
        error: row.get(9)?,
    })
}

impl EntryRow {
    fn into_entry(self) -> Result<OutboxEntry> {
        Ok(OutboxEntry {
            id: EntryId::new(self.id),
            seq: u64::try_from(self.seq)
                .map_err(|_| StoreError::InvalidData(format!("negative seq {}", self.seq)))?,
            collection: self.collection,
            record_id: self.record_id,
            operation: parse::<Operation>(&self.operation)?,
            payload: self.payload.as_deref().map(decode_record).transpose()?,
            timestamp: self.timestamp,
            status: parse::<EntryStatus>(&self.status)?,
            retry_count: u32::try_from(self.retry_count).unwrap_or(u32::MAX),
            error: self.error,
        })
    }
}

fn query_entries(
    conn: &Connection,
    filter: &str,
    args: impl rusqlite::Params,
) -> Result<Vec<OutboxEntry>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM outbox {} ORDER BY timestamp, seq",
        ENTRY_COLUMNS, filter
    ))?;
    let rows = stmt
        .query_map(args, read_entry_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    rows.into_iter().map(EntryRow::into_entry).collect()
}

const CONFLICT_COLUMNS: &str = "id, collection, record_id, local_version, remote_version, \
     detected_at, resolved, resolved_at, resolution";

struct ConflictRow {
    id: String,
    collection: String,
    record_id: String,
    local_version: Option<Vec<u8>>,
    remote_version: Vec<u8>,
    detected_at: i64,
    resolved: bool,
    resolved_at: Option<i64>,
    resolution: Option<String>,
}

fn read_conflict_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<ConflictRow> {
    Ok(ConflictRow {
        id: row.get(0)?,
        collection: row.get(1)?,
        record_id: row.get(2)?,
        local_version: row.get(3)?,
        remote_version: row.get(4)?,
        detected_at: row.get(5)?,
        resolved: row.get(6)?,
        resolved_at: row.get(7)?,
        resolution: row.get(8)?,
    })
}

impl ConflictRow {
    fn into_conflict(self) -> Result<Conflict> {
        Ok(Conflict {
            id: ConflictId::new(self.id),
            collection: self.collection,
            record_id: self.record_id,
            local_version: self.local_version.as_deref().map(decode_record).transpose()?,
            remote_version: decode_record(&self.remote_version)?,
            detected_at: self.detected_at,
            resolved: self.resolved,
            resolved_at: self.resolved_at,
            resolution: self
                .resolution
                .as_deref()
                .map(parse::<Resolution>)
                .transpose()?,
        })
    }
}

fn query_conflicts(
    conn: &Connection,
    filter: &str,
    args: impl rusqlite::Params,
) -> Result<Vec<Conflict>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM conflict_log {} ORDER BY detected_at, id",
        CONFLICT_COLUMNS, filter
    ))?;
    let rows = stmt
        .query_map(args, read_conflict_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    rows.into_iter().map(ConflictRow::into_conflict).collect()
}

#[async_trait]
impl RecordStore for SqliteStore {
    fn schema(&self) -> &Schema {
        &self.schema
    }

    async fn get(&self, collection: &str, id: &str) -> Result<Option<Record>> {
        self.check(collection)?;
        let collection = collection.to_string();
        let id = id.to_string();
        self.run(move |conn, _| load_record(conn, &collection, &id))
            .await
    }

    async fn get_all(&self, collection: &str) -> Result<Vec<Record>> {
        self.check(collection)?;
        let collection = collection.to_string();
        self.run(move |conn, _| load_all(conn, &collection)).await
    }

    async fn get_all_by_index(
        &self,
        collection: &str,
        index: &str,
        value: &Value,
    ) -> Result<Vec<Record>> {
        self.check(collection)?;
        let collection = collection.to_string();
        let index = index.to_string();
        let key = index_key(value);

        self.run(move |conn, schema| {
            let declared = schema
                .get(&collection)
                .and_then(|c| c.find_index(&index))
                .is_some();

            if !declared {
                tracing::trace!(%collection, %index, "undeclared index, scanning");
                let mut records = load_all(conn, &collection)?;
                records.retain(|r| matches_key(r, &index, &key));
                return Ok(records);
            }

            let mut stmt = conn.prepare(
                "SELECT r.id, r.updated_at, r.sync_status, r.fields
                 FROM record_index i
                 JOIN records r ON r.collection = i.collection AND r.id = i.record_id
                 WHERE i.collection = ?1 AND i.index_name = ?2 AND i.key = ?3
                 ORDER BY r.id",
            )?;
            let rows = stmt
                .query_map(params![collection, index, key], read_record_row)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            rows.into_iter().map(record_from_row).collect()
        })
        .await
    }

    async fn put(&self, collection: &str, record: Record, origin: Origin) -> Result<Record> {
        self.check(collection)?;
        record.validate()?;
        let collection = collection.to_string();

        self.run(move |conn, schema| {
            let tx = conn.transaction()?;

            let existing = load_record(&tx, &collection, &record.id)?;
            let (stored, op) = plan_put(existing.as_ref(), record, origin);

            upsert_record(&tx, schema, &collection, &stored)?;
            if let Some(op) = op {
                enqueue(&tx, &collection, &stored.id, op, Some(&stored))?;
            }

            tx.commit()?;
            Ok(stored)
        })
        .await
    }

    async fn put_if_unchanged(
        &self,
        collection: &str,
        record: Record,
        expected: Option<&Record>,
    ) -> Result<bool> {
        self.check(collection)?;
        record.validate()?;
        let collection = collection.to_string();
        let expected = expected.cloned();

        self.run(move |conn, schema| {
            let tx = conn.transaction()?;

            let existing = load_record(&tx, &collection, &record.id)?;
            if existing != expected {
                return Ok(false);
            }
            let (stored, _) = plan_put(existing.as_ref(), record, Origin::Sync);
            upsert_record(&tx, schema, &collection, &stored)?;

            tx.commit()?;
            Ok(true)
        })
        .await
    }

    async fn delete(&self, collection: &str, id: &str, origin: Origin) -> Result<bool> {
        self.check(collection)?;
        let collection = collection.to_string();
        let id = id.to_string();

        self.run(move |conn, _| {
            let tx = conn.transaction()?;

            let Some(removed) = load_record(&tx, &collection, &id)? else {
                return Ok(false);
            };
            tx.execute(
                "DELETE FROM records WHERE collection = ?1 AND id = ?2",
                params![collection, id],
            )?;
            tx.execute(
                "DELETE FROM record_index WHERE collection = ?1 AND record_id = ?2",
                params![collection, id],
            )?;
            if origin == Origin::Local {
                enqueue(&tx, &collection, &id, Operation::Delete, Some(&removed))?;
            }

            tx.commit()?;
            Ok(true)
        })
        .await
    }

    async fn set_sync_status(
        &self,
        collection: &str,
        id: &str,
        status: SyncStatus,
    ) -> Result<bool> {
        self.check(collection)?;
        let collection = collection.to_string();
        let id = id.to_string();

        self.run(move |conn, schema| {
            let tx = conn.transaction()?;
            let updated = update_status(&tx, schema, &collection, &id, status)?;
            tx.commit()?;
            Ok(updated)
        })
        .await
    }

    async fn mark_synced(&self, collection: &str, id: &str) -> Result<bool> {
        self.check(collection)?;
        let collection = collection.to_string();
        let id = id.to_string();

        self.run(move |conn, schema| {
            let tx = conn.transaction()?;
            let outstanding: i64 = tx.query_row(
                "SELECT COUNT(*) FROM outbox WHERE collection = ?1 AND record_id = ?2",
                params![collection, id],
                |row| row.get(0),
            )?;
            if outstanding > 0 {
                return Ok(false);
            }
            let updated = update_status(&tx, schema, &collection, &id, SyncStatus::Synced)?;
            tx.commit()?;
            Ok(updated)
        })
        .await
    }
}

#[async_trait]
impl Outbox for SqliteStore {
    async fn enumerate_pending(&self) -> Result<Vec<OutboxEntry>> {
        self.run(|conn, _| query_entries(conn, "", [])).await
    }

    async fn get_entry(&self, id: &EntryId) -> Result<Option<OutboxEntry>> {
        let id = id.clone();
        self.run(move |conn, _| {
            let mut entries = query_entries(conn, "WHERE id = ?1", params![id.as_str()])?;
            Ok(entries.pop())
        })
        .await
    }

    async fn entries_for(&self, collection: &str, record_id: &str) -> Result<Vec<OutboxEntry>> {
        let collection = collection.to_string();
        let record_id = record_id.to_string();
        self.run(move |conn, _| {
            query_entries(
                conn,
                "WHERE collection = ?1 AND record_id = ?2",
                params![collection, record_id],
            )
        })
        .await
    }

    async fn mark_processing(&self, id: &EntryId) -> Result<bool> {
        let id = id.clone();
        self.run(move |conn, _| {
            let n = conn.execute(
                "UPDATE outbox SET status = ?2 WHERE id = ?1",
                params![id.as_str(), EntryStatus::Processing.as_str()],
            )?;
            Ok(n > 0)
        })
        .await
    }

    async fn mark_failed(&self, id: &EntryId, error: &str) -> Result<bool> {
        let id = id.clone();
        let error = error.to_string();
        self.run(move |conn, _| {
            let n = conn.execute(
                "UPDATE outbox SET status = ?2, retry_count = retry_count + 1, error = ?3
                 WHERE id = ?1",
                params![id.as_str(), EntryStatus::Failed.as_str(), error],
            )?;
            Ok(n > 0)
        })
        .await
    }

    async fn remove_entry(&self, id: &EntryId) -> Result<bool> {
        let id = id.clone();
        self.run(move |conn, _| {
            let n = conn.execute("DELETE FROM outbox WHERE id = ?1", params![id.as_str()])?;
            Ok(n > 0)
        })
        .await
    }

    async fn remove_entries_through(&self, entry: &OutboxEntry) -> Result<usize> {
        let collection = entry.collection.clone();
        let record_id = entry.record_id.clone();
        let (timestamp, seq) = entry.order_key();
        let seq = i64::try_from(seq)
            .map_err(|_| StoreError::InvalidData(format!("seq {} out of range", seq)))?;
        self.run(move |conn, _| {
            Ok(conn.execute(
                "DELETE FROM outbox WHERE collection = ?1 AND record_id = ?2
                 AND (timestamp < ?3 OR (timestamp = ?3 AND seq <= ?4))",
                params![collection, record_id, timestamp, seq],
            )?)
        })
        .await
    }

    async fn remove_entries_for(&self, collection: &str, record_id: &str) -> Result<usize> {
        let collection = collection.to_string();
        let record_id = record_id.to_string();
        self.run(move |conn, _| {
            Ok(conn.execute(
                "DELETE FROM outbox WHERE collection = ?1 AND record_id = ?2",
                params![collection, record_id],
            )?)
        })
        .await
    }

    async fn requeue_processing(&self) -> Result<usize> {
        self.run(|conn, _| {
            Ok(conn.execute(
                "UPDATE outbox SET status = ?1 WHERE status = ?2",
                params![
                    EntryStatus::Pending.as_str(),
                    EntryStatus::Processing.as_str()
                ],
            )?)
        })
        .await
    }

    async fn entry_counts(&self) -> Result<(usize, usize)> {
        self.run(|conn, _| {
            let (total, failed): (i64, i64) = conn.query_row(
                "SELECT COUNT(*), COALESCE(SUM(status = ?1), 0) FROM outbox",
                params![EntryStatus::Failed.as_str()],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )?;
            Ok(((total - failed) as usize, failed as usize))
        })
        .await
    }
}

#[async_trait]
impl ConflictLog for SqliteStore {
    async fn save_conflict(&self, conflict: &Conflict) -> Result<()> {
        let conflict = conflict.clone();
        self.run(move |conn, _| {
            let local = conflict.local_version.as_ref().map(encode_record).transpose()?;
            let remote = encode_record(&conflict.remote_version)?;
            conn.execute(
                "INSERT OR REPLACE INTO conflict_log (
                    id, collection, record_id, local_version, remote_version,
                    detected_at, resolved, resolved_at, resolution
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                params![
                    conflict.id.as_str(),
                    conflict.collection,
                    conflict.record_id,
                    local,
                    remote,
                    conflict.detected_at,
                    conflict.resolved,
                    conflict.resolved_at,
                    conflict.resolution.map(|r| r.as_str()),
                ],
            )?;
            Ok(())
        })
        .await
    }

    async fn get_conflict(&self, id: &ConflictId) -> Result<Option<Conflict>> {
        let id = id.clone();
        self.run(move |conn, _| {
            let mut found = query_conflicts(conn, "WHERE id = ?1", params![id.as_str()])?;
            Ok(found.pop())
        })
        .await
    }

    async fn open_conflict_for(
        &self,
        collection: &str,
        record_id: &str,
    ) -> Result<Option<Conflict>> {
        let collection = collection.to_string();
        let record_id = record_id.to_string();
        self.run(move |conn, _| {
            let found = query_conflicts(
                conn,
                "WHERE resolved = 0 AND collection = ?1 AND record_id = ?2",
                params![collection, record_id],
            )?;
            Ok(found.into_iter().next())
        })
        .await
    }

    async fn list_conflicts(&self, include_resolved: bool) -> Result<Vec<Conflict>> {
        self.run(move |conn, _| {
            let filter = if include_resolved {
                ""
            } else {
                "WHERE resolved = 0"
            };
            query_conflicts(conn, filter, [])
        })
        .await
    }

    async fn mark_resolved(
        &self,
        id: &ConflictId,
        resolution: Resolution,
        at: i64,
    ) -> Result<bool> {
        let id = id.clone();
        self.run(move |conn, _| {
            let tx = conn.transaction()?;

            let resolved: Option<bool> = tx
                .query_row(
                    "SELECT resolved FROM conflict_log WHERE id = ?1",
                    params![id.as_str()],
                    |row| row.get(0),
                )
                .optional()?;

            match resolved {
                None => Err(StoreError::NotFound(format!("conflict {}", id))),
                Some(true) => Ok(false),
                Some(false) => {
                    tx.execute(
                        "UPDATE conflict_log SET resolved = 1, resolved_at = ?2, resolution = ?3
                         WHERE id = ?1",
                        params![id.as_str(), at, resolution.as_str()],
                    )?;
                    tx.commit()?;
                    Ok(true)
                }
            }
        })
        .await
    }

    async fn count_open_conflicts(&self) -> Result<usize> {
        self.run(|conn, _| {
            let n: i64 = conn.query_row(
                "SELECT COUNT(*) FROM conflict_log WHERE resolved = 0",
                [],
                |row| row.get(0),
            )?;
            Ok(n as usize)
        })
        .await
    }
}

#[async_trait]
impl Store for SqliteStore {
    async fn get_meta(&self, key: &str) -> Result<Option<String>> {
        let key = key.to_string();
        self.run(move |conn, _| {
            conn.query_row(
                "SELECT value FROM sync_meta WHERE key = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()
            .map_err(StoreError::from)
        })
        .await
    }

    async fn set_meta(&self, key: &str, value: &str) -> Result<()> {
        let key = key.to_string();
        let value = value.to_string();
        self.run(move |conn, _| {
            conn.execute(
                "INSERT INTO sync_meta (key, value) VALUES (?1, ?2)
                 ON CONFLICT (key) DO UPDATE SET value = excluded.value",
                params![key, value],
            )?;
            Ok(())
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use driftsync_core::IndexDef;
    use serde_json::json;

    fn schema() -> Schema {
        Schema::new()
            .collection(CollectionSchema::new("expenses").index(IndexDef::on("category")))
            .collection(CollectionSchema::new("beds"))
    }

    fn make_store() -> SqliteStore {
        SqliteStore::open_memory(schema()).unwrap()
    }

    #[tokio::test]
    async fn test_local_put_writes_record_and_entry() {
        let store = make_store();
        let record = Record::new("e1", 100)
            .with_field("amount", 10)
            .with_field("note", json!({"tags": ["fuel", 1.5]}));

        let stored = store.put("expenses", record, Origin::Local).await.unwrap();
        assert_eq!(stored.sync_status, SyncStatus::Pending);

        let got = store.get("expenses", "e1").await.unwrap().unwrap();
        assert_eq!(got, stored);

        let pending = store.enumerate_pending().await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].operation, Operation::Create);
        assert_eq!(pending[0].payload.as_ref(), Some(&stored));
        assert!(pending[0].seq > 0);
    }

    #[tokio::test]
    async fn test_sync_put_skips_outbox() {
        let store = make_store();
        let record = Record::new("e1", 100).with_status(SyncStatus::Synced);
        store.put("expenses", record, Origin::Sync).await.unwrap();

        assert!(store.enumerate_pending().await.unwrap().is_empty());
        let got = store.get("expenses", "e1").await.unwrap().unwrap();
        assert_eq!(got.sync_status, SyncStatus::Synced);
    }

    #[tokio::test]
    async fn test_failed_outbox_insert_rolls_back_record() {
        let store = make_store();
        store
            .conn
            .lock()
            .unwrap()
            .execute_batch(
                "CREATE TRIGGER reject_outbox BEFORE INSERT ON outbox
                 BEGIN SELECT RAISE(ABORT, 'outbox unavailable'); END;",
            )
            .unwrap();

        let record = Record::new("e1", 100).with_field("category", "fuel");
        let err = store.put("expenses", record, Origin::Local).await.unwrap_err();
        assert!(matches!(err, StoreError::Database(_)));

        assert!(store.get("expenses", "e1").await.unwrap().is_none());
        assert!(store
            .get_all_by_index("expenses", "category", &json!("fuel"))
            .await
            .unwrap()
            .is_empty());

        // Sync-origin writes never touch the outbox, so they still land.
        let record = Record::new("e2", 100).with_status(SyncStatus::Synced);
        store.put("expenses", record, Origin::Sync).await.unwrap();
        assert!(store.get("expenses", "e2").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_delete() {
        let store = make_store();
        assert!(!store.delete("expenses", "nope", Origin::Local).await.unwrap());

        let record = Record::new("e1", 1).with_field("category", "food");
        store.put("expenses", record, Origin::Local).await.unwrap();
        assert!(store.delete("expenses", "e1", Origin::Local).await.unwrap());

        let ops: Vec<Operation> = store
            .enumerate_pending()
            .await
            .unwrap()
            .iter()
            .map(|e| e.operation)
            .collect();
        assert_eq!(ops, vec![Operation::Create, Operation::Delete]);
        assert!(store
            .get_all_by_index("expenses", "category", &json!("food"))
            .await
            .unwrap()
            .is_empty());

        let entries = store.entries_for("expenses", "e1").await.unwrap();
        let removed = entries[1].payload.as_ref().unwrap();
        assert_eq!(removed.updated_at, 1);
        assert_eq!(removed.get("category"), Some(&json!("food")));
    }

    #[tokio::test]
    async fn test_put_if_unchanged_checks_stored_row() {
        let store = make_store();
        let clean = Record::new("e1", 100)
            .with_field("category", "food")
            .with_status(SyncStatus::Synced);
        store.put("expenses", clean, Origin::Sync).await.unwrap();
        let seen = store.get("expenses", "e1").await.unwrap();

        store
            .put("expenses", Record::new("e1", 150).with_field("category", "fuel"), Origin::Local)
            .await
            .unwrap();

        let remote = Record::new("e1", 200)
            .with_field("category", "seed")
            .with_status(SyncStatus::Synced);
        assert!(!store
            .put_if_unchanged("expenses", remote.clone(), seen.as_ref())
            .await
            .unwrap());
        let fuel = store
            .get_all_by_index("expenses", "category", &json!("fuel"))
            .await
            .unwrap();
        assert_eq!(fuel.len(), 1);

        let current = store.get("expenses", "e1").await.unwrap();
        assert!(store
            .put_if_unchanged("expenses", remote, current.as_ref())
            .await
            .unwrap());
        let seed = store
            .get_all_by_index("expenses", "category", &json!("seed"))
            .await
            .unwrap();
        assert_eq!(seed.len(), 1);
        assert_eq!(seed[0].sync_status, SyncStatus::Synced);
    }

    #[tokio::test]
    async fn test_reserved_field_name_is_rejected() {
        let store = make_store();
        let shadowed = Record::new("e1", 1).with_field("updatedAt", 99);
        let err = store
            .put("expenses", shadowed, Origin::Local)
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Rejected(_)));
        assert!(store.enumerate_pending().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_declared_index_and_fallback_agree() {
        let store = make_store();
        for (id, category, amount) in [("c", "food", 3), ("a", "fuel", 1), ("b", "food", 2)] {
            let record = Record::new(id, 1)
                .with_field("category", category)
                .with_field("amount", amount);
            store.put("expenses", record, Origin::Local).await.unwrap();
        }

        let declared = store
            .get_all_by_index("expenses", "category", &json!("food"))
            .await
            .unwrap();
        let ids: Vec<&str> = declared.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["b", "c"]);

        // Same collection, same attribute, but through an undeclared name.
        let reopened = SqliteStore::open_memory(
            Schema::new()
                .collection(CollectionSchema::new("expenses"))
                .collection(CollectionSchema::new("beds")),
        )
        .unwrap();
        for record in store.get_all("expenses").await.unwrap() {
            reopened.put("expenses", record, Origin::Sync).await.unwrap();
        }
        let scanned = reopened
            .get_all_by_index("expenses", "category", &json!("food"))
            .await
            .unwrap();
        assert_eq!(declared, scanned);

        let by_amount = store
            .get_all_by_index("expenses", "amount", &json!(1))
            .await
            .unwrap();
        assert_eq!(by_amount.len(), 1);
        assert_eq!(by_amount[0].id, "a");
    }

    #[tokio::test]
    async fn test_outbox_lifecycle() {
        let store = make_store();
        store
            .put("expenses", Record::new("e1", 1), Origin::Local)
            .await
            .unwrap();
        let entry = store.enumerate_pending().await.unwrap().remove(0);

        assert!(store.mark_processing(&entry.id).await.unwrap());
        assert_eq!(store.requeue_processing().await.unwrap(), 1);
        assert_eq!(store.entry_counts().await.unwrap(), (1, 0));

        assert!(store.mark_failed(&entry.id, "503").await.unwrap());
        assert!(store.mark_failed(&entry.id, "504").await.unwrap());
        let failed = store.get_entry(&entry.id).await.unwrap().unwrap();
        assert_eq!(failed.status, EntryStatus::Failed);
        assert_eq!(failed.retry_count, 2);
        assert_eq!(failed.error.as_deref(), Some("504"));
        assert_eq!(store.entry_counts().await.unwrap(), (0, 1));

        assert!(store.remove_entry(&entry.id).await.unwrap());
        assert!(!store.remove_entry(&entry.id).await.unwrap());
        assert!(store.get_entry(&entry.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_entries_for_record() {
        let store = make_store();
        for ts in 1..=3 {
            store
                .put("beds", Record::new("north", ts), Origin::Local)
                .await
                .unwrap();
        }
        store
            .put("beds", Record::new("south", 1), Origin::Local)
            .await
            .unwrap();

        let entries = store.entries_for("beds", "north").await.unwrap();
        let ops: Vec<Operation> = entries.iter().map(|e| e.operation).collect();
        assert_eq!(
            ops,
            vec![Operation::Create, Operation::Update, Operation::Update]
        );

        assert_eq!(store.remove_entries_through(&entries[1]).await.unwrap(), 2);
        let left = store.entries_for("beds", "north").await.unwrap();
        assert_eq!(left.len(), 1);
        assert_eq!(left[0].id, entries[2].id);

        assert_eq!(store.remove_entries_for("beds", "north").await.unwrap(), 1);
        assert_eq!(store.enumerate_pending().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_mark_synced_waits_for_drained_outbox() {
        let store = make_store();
        let record = Record::new("e1", 5).with_field("category", "fuel");
        store.put("expenses", record, Origin::Local).await.unwrap();

        assert!(!store.mark_synced("expenses", "e1").await.unwrap());
        let entry = store.enumerate_pending().await.unwrap().remove(0);
        store.remove_entry(&entry.id).await.unwrap();
        assert!(store.mark_synced("expenses", "e1").await.unwrap());

        let synced = store
            .get_all_by_index("expenses", "syncStatus", &json!("synced"))
            .await
            .unwrap();
        assert_eq!(synced.len(), 1);
        assert_eq!(synced[0].updated_at, 5);
        assert!(!store.mark_synced("expenses", "nope").await.unwrap());
    }

    #[tokio::test]
    async fn test_conflict_log() {
        let store = make_store();
        let conflict = Conflict::new(
            "expenses",
            Some(Record::new("e1", 1).with_field("amount", 5)),
            Record::new("e1", 2).with_status(SyncStatus::Synced),
            7,
        );
        store.save_conflict(&conflict).await.unwrap();

        let loaded = store.get_conflict(&conflict.id).await.unwrap().unwrap();
        assert_eq!(loaded, conflict);
        let open = store.open_conflict_for("expenses", "e1").await.unwrap();
        assert_eq!(open.map(|c| c.id), Some(conflict.id.clone()));

        assert!(store
            .mark_resolved(&conflict.id, Resolution::LocalWins, 9)
            .await
            .unwrap());
        assert!(!store
            .mark_resolved(&conflict.id, Resolution::RemoteWins, 10)
            .await
            .unwrap());

        let loaded = store.get_conflict(&conflict.id).await.unwrap().unwrap();
        assert_eq!(loaded.resolution, Some(Resolution::LocalWins));
        assert_eq!(loaded.resolved_at, Some(9));
        assert!(store.open_conflict_for("expenses", "e1").await.unwrap().is_none());
        assert_eq!(store.count_open_conflicts().await.unwrap(), 0);
        assert_eq!(store.list_conflicts(true).await.unwrap().len(), 1);

        let missing = store
            .mark_resolved(&ConflictId::new("nope"), Resolution::LocalWins, 1)
            .await;
        assert!(matches!(missing, Err(StoreError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("replica.db");

        {
            let store = SqliteStore::open(&path, schema()).unwrap();
            let record = Record::new("e1", 10).with_field("category", "fuel");
            store.put("expenses", record, Origin::Local).await.unwrap();
            store.set_meta("pull_watermark", "10").await.unwrap();
        }

        let store = SqliteStore::open(&path, schema()).unwrap();
        assert!(store.get("expenses", "e1").await.unwrap().is_some());
        assert_eq!(store.enumerate_pending().await.unwrap().len(), 1);
        assert_eq!(
            store.get_meta("pull_watermark").await.unwrap().as_deref(),
            Some("10")
        );
        let fuel = store
            .get_all_by_index("expenses", "category", &json!("fuel"))
            .await
            .unwrap();
        assert_eq!(fuel.len(), 1);
    }

    #[tokio::test]
    async fn test_index_declared_after_data_is_rebuilt() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("replica.db");

        {
            let bare = Schema::new().collection(CollectionSchema::new("beds"));
            let store = SqliteStore::open(&path, bare).unwrap();
            let record = Record::new("b1", 1).with_field("zone", "north");
            store.put("beds", record, Origin::Local).await.unwrap();
        }

        let indexed =
            Schema::new().collection(CollectionSchema::new("beds").index(IndexDef::on("zone")));
        let store = SqliteStore::open(&path, indexed).unwrap();
        let north = store
            .get_all_by_index("beds", "zone", &json!("north"))
            .await
            .unwrap();
        assert_eq!(north.len(), 1);
    }

    #[tokio::test]
    async fn test_open_discovered_declares_persisted_collections() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("replica.db");

        {
            let store = SqliteStore::open(&path, schema()).unwrap();
            let record = Record::new("e1", 10).with_field("category", "fuel");
            store.put("expenses", record, Origin::Local).await.unwrap();
        }

        let store = SqliteStore::open_discovered(&path).unwrap();
        assert_eq!(store.schema().names(), vec!["expenses".to_string()]);
        let fuel = store
            .get_all_by_index("expenses", "category", &json!("fuel"))
            .await
            .unwrap();
        assert_eq!(fuel.len(), 1);
        assert_eq!(store.enumerate_pending().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_unknown_collection_is_an_error() {
        let store = make_store();
        let err = store
            .put("livestock", Record::new("x", 1), Origin::Local)
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::UnknownCollection(_)));
        assert!(store.enumerate_pending().await.unwrap().is_empty());
    }
}
