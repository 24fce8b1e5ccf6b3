//! Conflicts and the policy that detects them.
//!
//! A conflict is created when a pull observes a remote record newer than the
//! local copy while the local copy still holds an undrained mutation. It is
//! never resolved automatically.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{CoreError, Result};
use crate::record::Record;
use crate::types::ConflictId;

/// How a conflict was settled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Resolution {
    LocalWins,
    RemoteWins,
    ManualMerge,
}

impl Resolution {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Resolution::LocalWins => "local_wins",
            Resolution::RemoteWins => "remote_wins",
            Resolution::ManualMerge => "manual_merge",
        }
    }
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Resolution {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "local_wins" | "local" => Ok(Resolution::LocalWins),
            "remote_wins" | "remote" => Ok(Resolution::RemoteWins),
            "manual_merge" | "merge" => Ok(Resolution::ManualMerge),
            other => Err(CoreError::UnknownResolution(other.to_string())),
        }
    }
}

/// A recorded push/pull collision awaiting a decision.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Conflict {
    pub id: ConflictId,
    pub collection: String,
    pub record_id: String,
    /// Local state at detection time. `None` when the record was deleted
    /// locally and the delete has not been pushed yet.
    pub local_version: Option<Record>,
    /// The newer remote state that was not applied.
    pub remote_version: Record,
    /// Detection time (Unix ms).
    pub detected_at: i64,
    pub resolved: bool,
    pub resolved_at: Option<i64>,
    pub resolution: Option<Resolution>,
}

impl Conflict {
    /// Open a new unresolved conflict.
    pub fn new(
        collection: impl Into<String>,
        local_version: Option<Record>,
        remote_version: Record,
        detected_at: i64,
    ) -> Self {
        Self {
            id: ConflictId::generate(),
            collection: collection.into(),
            record_id: remote_version.id.clone(),
            local_version,
            remote_version,
            detected_at,
            resolved: false,
            resolved_at: None,
            resolution: None,
        }
    }

    /// Transition to the resolved state. Resolution is terminal: a second
    /// call is rejected and leaves the conflict untouched.
    pub fn mark_resolved(&mut self, resolution: Resolution, at: i64) -> Result<()> {
        if self.resolved {
            return Err(CoreError::AlreadyResolved(self.id.to_string()));
        }
        self.resolved = true;
        self.resolved_at = Some(at);
        self.resolution = Some(resolution);
        Ok(())
    }
}

/// Decides when a remote record supersedes a local one and when that is a
/// conflict.
///
/// Pull and resolution only talk to this trait, so timestamp comparison can
/// be replaced with vector clocks or server sequence numbers without touching
/// their control flow.
pub trait ConflictPolicy: Send + Sync + fmt::Debug {
    /// True when `remote` carries a strictly newer version than `local`.
    fn remote_is_newer(&self, local: &Record, remote: &Record) -> bool;

    /// True when applying `remote` would discard an unpushed local mutation.
    ///
    /// Newer-ness is necessary but not sufficient: the local dirty flag gates
    /// the decision.
    fn is_conflict(&self, local: &Record, remote: &Record) -> bool {
        local.is_dirty() && self.remote_is_newer(local, remote)
    }

    /// True when `remote` is newer than `deleted`, the last local version of
    /// a record whose delete has not been pushed yet.
    fn is_delete_conflict(&self, deleted: &Record, remote: &Record) -> bool {
        self.remote_is_newer(deleted, remote)
    }

    /// Stamp to give a record re-asserted as authoritative over `remote`.
    fn supersede(&self, remote: &Record, now: i64) -> i64 {
        now.max(remote.updated_at.saturating_add(1))
    }
}

/// Plain `updatedAt` comparison.
#[derive(Debug, Clone, Copy, Default)]
pub struct TimestampPolicy;

impl ConflictPolicy for TimestampPolicy {
    fn remote_is_newer(&self, local: &Record, remote: &Record) -> bool {
        remote.updated_at > local.updated_at
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::SyncStatus;

    #[test]
    fn test_conflict_requires_dirty_local() {
        let policy = TimestampPolicy;
        let remote = Record::new("e1", 200).with_status(SyncStatus::Synced);

        let dirty = Record::new("e1", 100);
        assert!(policy.is_conflict(&dirty, &remote));

        let clean = Record::new("e1", 100).with_status(SyncStatus::Synced);
        assert!(!policy.is_conflict(&clean, &remote));
        assert!(policy.remote_is_newer(&clean, &remote));
    }

    #[test]
    fn test_equal_timestamps_are_not_newer() {
        let policy = TimestampPolicy;
        let local = Record::new("e1", 100);
        let remote = Record::new("e1", 100);
        assert!(!policy.remote_is_newer(&local, &remote));
        assert!(!policy.is_conflict(&local, &remote));
    }

    #[test]
    fn test_delete_conflict_needs_later_remote_write() {
        let policy = TimestampPolicy;
        let deleted = Record::new("e1", 10).with_status(SyncStatus::Synced);
        assert!(policy.is_delete_conflict(&deleted, &Record::new("e1", 11)));
        assert!(!policy.is_delete_conflict(&deleted, &Record::new("e1", 10)));
    }

    #[test]
    fn test_supersede_beats_remote_clock_skew() {
        let policy = TimestampPolicy;
        let remote = Record::new("e1", 5_000);
        assert_eq!(policy.supersede(&remote, 1_000), 5_001);
        assert_eq!(policy.supersede(&remote, 9_000), 9_000);
    }

    #[test]
    fn test_resolution_is_terminal() {
        let mut conflict = Conflict::new("c", Some(Record::new("r", 1)), Record::new("r", 2), 3);
        assert_eq!(conflict.record_id, "r");
        conflict.mark_resolved(Resolution::RemoteWins, 10).unwrap();
        assert!(conflict.resolved);
        assert_eq!(conflict.resolved_at, Some(10));

        let err = conflict.mark_resolved(Resolution::LocalWins, 20).unwrap_err();
        assert!(matches!(err, CoreError::AlreadyResolved(_)));
        assert_eq!(conflict.resolution, Some(Resolution::RemoteWins));
        assert_eq!(conflict.resolved_at, Some(10));
    }

    #[test]
    fn test_resolution_parse_accepts_short_forms() {
        assert_eq!("local".parse::<Resolution>().unwrap(), Resolution::LocalWins);
        assert_eq!("remote_wins".parse::<Resolution>().unwrap(), Resolution::RemoteWins);
        assert!("both".parse::<Resolution>().is_err());
    }
}
