//! # Driftsync Store
//!
//! Local persistence for the offline-first engine: a multi-collection record
//! store, the outbox of pending mutations, and the conflict log.
//!
//! ## Overview
//!
//! The three concerns are separate async traits, [`RecordStore`],
//! [`Outbox`], and [`ConflictLog`], bundled as [`Store`]. Two backends
//! implement all of them with identical semantics: [`SqliteStore`] for real
//! persistence and [`MemoryStore`] for tests and ephemeral replicas.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use driftsync_core::{CollectionSchema, IndexDef, Origin, Record, Schema};
//! use driftsync_store::{RecordStore, SqliteStore};
//!
//! async fn example() {
//!     let schema = Schema::new()
//!         .collection(CollectionSchema::new("expenses").index(IndexDef::on("category")));
//!     let store = SqliteStore::open("replica.db", schema).unwrap();
//!
//!     let expense = Record::new("e1", 100).with_field("amount", 10);
//!     // Writes the record and its outbox entry in one transaction.
//!     store.put("expenses", expense, Origin::Local).await.unwrap();
//! }
//! ```
//!
//! ## Design Notes
//!
//! - **Dual write**: a `put`/`delete` with [`Origin::Local`] appends an
//!   outbox entry in the same unit of work; [`Origin::Sync`] never does.
//! - **FIFO**: outbox entries enumerate by `(timestamp, seq)`.
//! - **Index fallback**: querying an undeclared index scans and filters,
//!   returning exactly what a declared index would.
//!
//! [`Origin::Local`]: driftsync_core::Origin::Local
//! [`Origin::Sync`]: driftsync_core::Origin::Sync

pub mod error;
pub mod index;
pub mod memory;
pub mod migration;
pub mod sqlite;
pub mod traits;

mod write;

pub use error::{Result, StoreError};
pub use index::{matches_key, HashIndex, Index, ScanIndex};
pub use memory::MemoryStore;
pub use sqlite::SqliteStore;
pub use traits::{ConflictLog, Outbox, RecordStore, Store, WATERMARK_KEY};
