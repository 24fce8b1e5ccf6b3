//! # Driftsync Core
//!
//! Pure types for the driftsync offline-first store: records, outbox
//! entries, conflicts, and collection schemas.
//!
//! This crate contains no I/O, no storage, no networking. Everything here is
//! plain data plus the predicates the sync engine uses to make decisions.
//!
//! ## Key Types
//!
//! - [`Record`] - Any domain entity: an id, an `updatedAt` stamp, a
//!   [`SyncStatus`], and arbitrary JSON fields
//! - [`OutboxEntry`] - One pending local mutation awaiting push
//! - [`Conflict`] - A same-id divergence between a dirty local record and a
//!   newer remote one
//! - [`Schema`] - Declared collections and their secondary indices
//! - [`ConflictPolicy`] - The single predicate deciding "newer" and "conflict"

pub mod conflict;
pub mod error;
pub mod outbox;
pub mod record;
pub mod schema;
pub mod time;
pub mod types;

pub use conflict::{Conflict, ConflictPolicy, Resolution, TimestampPolicy};
pub use error::{CoreError, Result};
pub use outbox::{EntryStatus, Operation, OutboxEntry, QueueStats};
pub use record::{Fields, Origin, Record, SyncStatus};
pub use schema::{index_key, CollectionSchema, IndexDef, Schema, CONFLICT_LOG, OUTBOX};
pub use time::now_millis;
pub use types::{ConflictId, EntryId};
