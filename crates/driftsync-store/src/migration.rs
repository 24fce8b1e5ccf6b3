//! Database schema migrations for SQLite.
//!
//! We use a simple versioned migration system. Each migration is a SQL batch
//! that transforms the schema from version N to N+1.

use rusqlite::Connection;

use driftsync_core::now_millis;

use crate::error::{Result, StoreError};

/// Current schema version.
pub const CURRENT_VERSION: u32 = 1;

/// Initialize or migrate the database schema.
///
/// This function is idempotent - it can be called multiple times safely.
pub fn migrate(conn: &mut Connection) -> Result<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS schema_migrations (
            version INTEGER PRIMARY KEY,
            applied_at INTEGER NOT NULL
        )",
        [],
    )?;

    let current: u32 = conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM schema_migrations",
        [],
        |row| row.get(0),
    )?;

    if current > CURRENT_VERSION {
        return Err(StoreError::Migration(format!(
            "database schema version {} is newer than supported version {}",
            current, CURRENT_VERSION
        )));
    }

    if current < CURRENT_VERSION {
        let tx = conn.transaction()?;

        for version in (current + 1)..=CURRENT_VERSION {
            apply_migration(&tx, version)?;

            tx.execute(
                "INSERT INTO schema_migrations (version, applied_at) VALUES (?1, ?2)",
                rusqlite::params![version, now_millis()],
            )?;
            tracing::info!(version, "applied schema migration");
        }

        tx.commit()?;
    }

    Ok(())
}

/// Apply a specific migration version.
fn apply_migration(conn: &Connection, version: u32) -> Result<()> {
    match version {
        1 => apply_v1(conn),
        _ => Err(StoreError::Migration(format!(
            "unknown migration version: {}",
            version
        ))),
    }
}

/// Migration v1: Initial schema.
fn apply_v1(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        -- Domain records, partitioned by collection
        CREATE TABLE records (
            collection TEXT NOT NULL,
            id TEXT NOT NULL,
            updated_at INTEGER NOT NULL,      -- Unix ms, never decreases per record
            sync_status TEXT NOT NULL,        -- synced | pending | failed
            fields BLOB NOT NULL,             -- CBOR map of domain fields
            PRIMARY KEY (collection, id)
        );

        -- Maintained keys for declared secondary indices
        CREATE TABLE record_index (
            collection TEXT NOT NULL,
            index_name TEXT NOT NULL,
            key TEXT NOT NULL,                -- canonical JSON of the attribute
            record_id TEXT NOT NULL,
            PRIMARY KEY (collection, index_name, key, record_id)
        );

        -- Pending local mutations
        CREATE TABLE outbox (
            seq INTEGER PRIMARY KEY AUTOINCREMENT,
            id TEXT NOT NULL UNIQUE,
            collection TEXT NOT NULL,
            record_id TEXT NOT NULL,
            operation TEXT NOT NULL,          -- create | update | delete
            payload BLOB,                     -- CBOR record, NULL for deletes
            timestamp INTEGER NOT NULL,
            status TEXT NOT NULL,             -- pending | processing | failed
            retry_count INTEGER NOT NULL DEFAULT 0,
            error TEXT
        );

        -- Unresolved and resolved push/pull collisions
        CREATE TABLE conflict_log (
            id TEXT PRIMARY KEY,
            collection TEXT NOT NULL,
            record_id TEXT NOT NULL,
            local_version BLOB,               -- CBOR record, NULL if deleted locally
            remote_version BLOB NOT NULL,     -- CBOR record
            detected_at INTEGER NOT NULL,
            resolved INTEGER NOT NULL DEFAULT 0,
            resolved_at INTEGER,
            resolution TEXT                   -- local_wins | remote_wins | manual_merge
        );

        -- Engine bookkeeping (pull watermark)
        CREATE TABLE sync_meta (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL
        );

        -- Indexes for common queries
        CREATE INDEX idx_records_status ON records(collection, sync_status);
        CREATE INDEX idx_record_index_record ON record_index(collection, record_id);
        CREATE INDEX idx_outbox_order ON outbox(timestamp, seq);
        CREATE INDEX idx_outbox_status ON outbox(status);
        CREATE INDEX idx_outbox_record ON outbox(collection, record_id);
        CREATE INDEX idx_conflict_open ON conflict_log(resolved, collection, record_id);
        "#,
    )?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_migration_creates_tables() {
        let mut conn = Connection::open_in_memory().unwrap();
        migrate(&mut conn).unwrap();

        let tables: Vec<String> = conn
            .prepare("SELECT name FROM sqlite_master WHERE type='table' ORDER BY name")
            .unwrap()
            .query_map([], |row| row.get(0))
            .unwrap()
            .collect::<std::result::Result<Vec<_>, _>>()
            .unwrap();

        for table in [
            "records",
            "record_index",
            "outbox",
            "conflict_log",
            "sync_meta",
            "schema_migrations",
        ] {
            assert!(tables.contains(&table.to_string()), "missing {}", table);
        }
    }

    #[test]
    fn test_migration_idempotent() {
        let mut conn = Connection::open_in_memory().unwrap();
        migrate(&mut conn).unwrap();
        migrate(&mut conn).unwrap();
        migrate(&mut conn).unwrap();

        let version: u32 = conn
            .query_row("SELECT MAX(version) FROM schema_migrations", [], |row| {
                row.get(0)
            })
            .unwrap();
        assert_eq!(version, CURRENT_VERSION);
    }

    #[test]
    fn test_migration_rejects_newer_schema() {
        let mut conn = Connection::open_in_memory().unwrap();
        migrate(&mut conn).unwrap();
        conn.execute(
            "INSERT INTO schema_migrations (version, applied_at) VALUES (99, 0)",
            [],
        )
        .unwrap();

        assert!(matches!(migrate(&mut conn), Err(StoreError::Migration(_))));
    }
}
