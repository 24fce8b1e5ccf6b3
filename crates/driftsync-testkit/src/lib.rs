//! # Driftsync Testkit
//!
//! Testing utilities for driftsync.
//!
//! ## Overview
//!
//! This crate provides:
//!
//! - **Scenarios**: Canned pull situations with known outcomes
//! - **Generators**: Proptest strategies for property-based testing
//! - **Fixtures**: Helper structs for setting up replicas and remotes
//!
//! ## Scenarios
//!
//! Every scenario must produce exactly its expected pull report:
//!
//! ```rust,no_run
//! use driftsync_testkit::scenarios::verify_all_scenarios;
//!
//! async fn example() {
//!     for (name, matches, outcome) in verify_all_scenarios().await {
//!         println!("{}: {} {:?}", name, matches, outcome.report);
//!     }
//! }
//! ```
//!
//! ## Property Testing
//!
//! Use the generators with proptest:
//!
//! ```rust,ignore
//! use proptest::prelude::*;
//! use driftsync_testkit::generators::write_ops;
//!
//! proptest! {
//!     #[test]
//!     fn every_write_is_queued(ops in write_ops(20)) {
//!         // apply ops to a replica, check the outbox
//!     }
//! }
//! ```
//!
//! ## Test Fixtures
//!
//! Quickly set up test scenarios:
//!
//! ```rust,no_run
//! use driftsync_testkit::fixtures::{expense, TestFixture};
//!
//! async fn example() {
//!     let fixture = TestFixture::new();
//!     fixture.local("expenses", expense("e1", 100, 10)).await;
//!     fixture.seed_remote("expenses", expense("e1", 200, 99)).await;
//! }
//! ```

pub mod fixtures;
pub mod generators;
pub mod scenarios;

pub use fixtures::{expense, farm_schema, multi_replica_fixtures, TestFixture, TestReplica};
pub use generators::{write_ops, WriteOp};
pub use scenarios::{all_scenarios, run_scenario, verify_all_scenarios, PullScenario};
