//! # Driftsync Sync
//!
//! Push/pull reconciliation between a local [`Store`] and a remote
//! authority.
//!
//! ## Overview
//!
//! The engine treats the remote as an idempotent keyed upsert/delete
//! endpoint plus a delta feed. Local mutations are already durable in the
//! outbox before the engine sees them, so offline is a normal state: a cycle
//! against an unreachable remote does nothing and reports it.
//!
//! ## Key Properties
//!
//! - **Push before pull**: a cycle drains the outbox first, so freshly
//!   pushed records come back from pull as unchanged, not as conflicts
//! - **FIFO replay**: entries are applied in enqueue order
//! - **At-least-once**: an entry is removed only after the remote confirms
//! - **Dirty gating**: a newer remote record overwrites a local one only if
//!   the local copy has no unpushed change; otherwise it becomes a conflict
//! - **No silent resolution**: conflicts stay open until resolved explicitly
//!
//! ## Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use driftsync_core::{CollectionSchema, Schema};
//! use driftsync_store::MemoryStore;
//! use driftsync_sync::{MemoryRemote, SyncConfig, SyncEngine};
//!
//! async fn example() {
//!     let schema = Schema::new().collection(CollectionSchema::new("expenses"));
//!     let store = Arc::new(MemoryStore::new(schema).unwrap());
//!     let engine = SyncEngine::new(store, MemoryRemote::new(), SyncConfig::default());
//!
//!     let report = engine.run_sync_cycle().await.unwrap();
//!     println!("pushed {}, pulled {}", report.processed, report.pulled);
//! }
//! ```
//!
//! ## Cycle
//!
//! ```text
//! reachable? ──no──> offline report
//!     │
//!    yes
//!     │
//! push: outbox (FIFO) ──upsert/delete──> remote
//!     │
//! pull: remote ──delta──> newer & clean? ──yes──> put (sync origin)
//!                              │
//!                              no ──dirty──> conflict log
//! ```
//!
//! [`Store`]: driftsync_store::Store

pub mod config;
pub mod convergence;
pub mod engine;
pub mod error;
pub mod report;
pub mod resolve;
pub mod scheduler;
pub mod transport;

pub use config::SyncConfig;
pub use convergence::{compute_state_hash, verify_convergence, ConvergenceResult};
pub use engine::SyncEngine;
pub use error::{Result, SyncError, TransportError};
pub use report::{PullReport, PushReport, SyncReport};
pub use scheduler::SyncScheduler;
pub use transport::{
    memory::{AppliedOp, MemoryRemote},
    RemoteDelta, RemoteTransport,
};
