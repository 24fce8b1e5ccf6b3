//! # Driftsync
//!
//! An offline-first local store with a durable outbox and push/pull sync.
//!
//! ## Overview
//!
//! Driftsync lets an application read and write domain records locally at
//! all times and reconcile with a remote authority when connectivity allows:
//!
//! - **Records**: Keyed entities grouped in collections, with secondary indices
//! - **Outbox**: Every local write appends a pending mutation atomically
//! - **Sync**: Push drains the outbox FIFO, pull merges the remote delta
//! - **Conflicts**: A newer remote version of a locally dirty record is
//!   logged, never silently applied, until resolved
//!
//! ## Usage
//!
//! ```rust,no_run
//! use driftsync::{Replica, SyncConfig};
//! use driftsync::core::{CollectionSchema, IndexDef, Record, Schema};
//! use driftsync::sync::MemoryRemote;
//!
//! async fn example() {
//!     let schema = Schema::new()
//!         .collection(CollectionSchema::new("expenses").index(IndexDef::on("category")));
//!     let replica =
//!         Replica::open_sqlite("replica.db", schema, MemoryRemote::new(), SyncConfig::default())
//!             .unwrap();
//!
//!     let expense = Record::new("e1", 100).with_field("amount", 10);
//!     replica.put("expenses", expense).await.unwrap();
//!
//!     let report = replica.sync().await.unwrap();
//!     println!("pushed {}, {} conflicts", report.processed, report.conflicts);
//! }
//! ```
//!
//! ## Re-exports
//!
//! This crate re-exports the component crates for convenience:
//!
//! - `driftsync::core` - Records, outbox entries, conflicts, schemas
//! - `driftsync::store` - Storage traits, SQLite and in-memory backends
//! - `driftsync::sync` - Sync engine, transport, scheduler

pub mod error;
pub mod replica;

// Re-export component crates
pub use driftsync_core as core;
pub use driftsync_store as store;
pub use driftsync_sync as sync;

// Re-export main types for convenience
pub use error::{ReplicaError, Result};
pub use replica::Replica;

// Re-export commonly used types
pub use driftsync_core::{
    CollectionSchema, Conflict, ConflictId, IndexDef, QueueStats, Record, Resolution, Schema,
    SyncStatus,
};
pub use driftsync_sync::{RemoteTransport, SyncConfig, SyncReport};
