//! Counters returned by push, pull, and full cycles.

use serde::Serialize;

/// Result of draining the outbox.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PushReport {
    /// Entries the remote confirmed and that were removed.
    pub processed: usize,
    /// Entries whose remote call failed this time.
    pub errors: usize,
    /// Entries dropped without a remote call because the record's current
    /// state already made them moot.
    pub superseded: usize,
    /// Entries skipped for exceeding the retry budget.
    pub parked: usize,
}

/// Result of merging a remote delta.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PullReport {
    /// Remote records written locally.
    pub pulled: usize,
    /// Remote records held back by a conflict.
    pub conflicts: usize,
    /// Remote records that were not newer than the local copy.
    pub unchanged: usize,
    /// Remote records in collections this replica does not declare.
    pub skipped: usize,
}

/// Merged counters of one sync cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SyncReport {
    /// The remote was unreachable and nothing ran.
    pub offline: bool,
    pub processed: usize,
    pub errors: usize,
    pub pulled: usize,
    pub conflicts: usize,
    /// Why pull did not complete, if it didn't. Push results still stand.
    pub pull_error: Option<String>,
}

impl SyncReport {
    /// The zero report of a cycle skipped for being offline.
    pub fn offline() -> Self {
        Self {
            offline: true,
            ..Self::default()
        }
    }

    pub(crate) fn merge(push: &PushReport, pull: Option<&PullReport>) -> Self {
        Self {
            offline: false,
            processed: push.processed,
            errors: push.errors,
            pulled: pull.map_or(0, |p| p.pulled),
            conflicts: pull.map_or(0, |p| p.conflicts),
            pull_error: None,
        }
    }
}
