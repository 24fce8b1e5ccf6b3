//! Canned pull scenarios with known outcomes.
//!
//! Each scenario places one expense record locally and/or remotely, runs a
//! single pull, and states what pull must report and what the local copy
//! must hold afterwards. Local copies carry `amount = 1`, remote copies
//! `amount = 2`, so the surviving amount shows which side won.

use driftsync_core::{Origin, Record, SyncStatus};
use driftsync_store::{ConflictLog, RecordStore};
use driftsync_sync::PullReport;

use crate::fixtures::{expense, TestFixture};

const COLLECTION: &str = "expenses";
const ID: &str = "e1";
const LOCAL_AMOUNT: i64 = 1;
const REMOTE_AMOUNT: i64 = 2;

/// Local state before the pull.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LocalState {
    /// No local record and no queued mutation.
    Absent,
    /// Delivered by an earlier pull, untouched since.
    Synced(i64),
    /// Written locally, not yet pushed.
    Pending(i64),
    /// Written locally, push failed.
    Failed(i64),
    /// Synced at the given stamp, then deleted locally, delete not pushed.
    PendingDelete(i64),
}

/// Expected result of the pull.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Expected {
    pub pulled: usize,
    pub conflicts: usize,
    pub unchanged: usize,
    /// `amount` of the local record afterwards; `None` if it is absent.
    pub local_amount: Option<i64>,
}

/// A pull scenario.
#[derive(Debug, Clone)]
pub struct PullScenario {
    /// Human-readable name for the scenario.
    pub name: &'static str,
    pub local: LocalState,
    /// Remote `updatedAt`, or `None` if the remote has no such record.
    pub remote: Option<i64>,
    pub expected: Expected,
}

/// What actually happened.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScenarioOutcome {
    pub report: PullReport,
    pub local_amount: Option<i64>,
    pub open_conflicts: usize,
}

impl ScenarioOutcome {
    pub fn matches(&self, expected: &Expected) -> bool {
        self.report.pulled == expected.pulled
            && self.report.conflicts == expected.conflicts
            && self.report.unchanged == expected.unchanged
            && self.local_amount == expected.local_amount
            && self.open_conflicts == expected.conflicts
    }
}

fn expect(pulled: usize, conflicts: usize, unchanged: usize, local: Option<i64>) -> Expected {
    Expected {
        pulled,
        conflicts,
        unchanged,
        local_amount: local,
    }
}

/// Get all pull scenarios.
pub fn all_scenarios() -> Vec<PullScenario> {
    vec![
        PullScenario {
            name: "new remote record is pulled",
            local: LocalState::Absent,
            remote: Some(100),
            expected: expect(1, 0, 0, Some(REMOTE_AMOUNT)),
        },
        PullScenario {
            name: "newer remote overwrites clean local",
            local: LocalState::Synced(100),
            remote: Some(200),
            expected: expect(1, 0, 0, Some(REMOTE_AMOUNT)),
        },
        PullScenario {
            name: "newer remote against pending local is a conflict",
            local: LocalState::Pending(100),
            remote: Some(200),
            expected: expect(0, 1, 0, Some(LOCAL_AMOUNT)),
        },
        PullScenario {
            name: "newer remote against failed local is a conflict",
            local: LocalState::Failed(100),
            remote: Some(200),
            expected: expect(0, 1, 0, Some(LOCAL_AMOUNT)),
        },
        PullScenario {
            name: "older remote leaves pending local alone",
            local: LocalState::Pending(200),
            remote: Some(100),
            expected: expect(0, 0, 1, Some(LOCAL_AMOUNT)),
        },
        PullScenario {
            name: "equal stamps are not newer",
            local: LocalState::Synced(100),
            remote: Some(100),
            expected: expect(0, 0, 1, Some(LOCAL_AMOUNT)),
        },
        PullScenario {
            name: "missing remote record changes nothing",
            local: LocalState::Synced(100),
            remote: None,
            expected: expect(0, 0, 0, Some(LOCAL_AMOUNT)),
        },
        PullScenario {
            name: "pending delete is not resurrected",
            local: LocalState::PendingDelete(100),
            remote: Some(100),
            expected: expect(0, 0, 1, None),
        },
        PullScenario {
            name: "newer remote against pending delete is a conflict",
            local: LocalState::PendingDelete(10),
            remote: Some(11),
            expected: expect(0, 1, 0, None),
        },
    ]
}

async fn prepare(fixture: &TestFixture, local: LocalState) {
    match local {
        LocalState::Absent => {}
        LocalState::Synced(at) => {
            fixture
                .synced(COLLECTION, expense(ID, at, LOCAL_AMOUNT))
                .await;
        }
        LocalState::Pending(at) => {
            fixture.local(COLLECTION, expense(ID, at, LOCAL_AMOUNT)).await;
        }
        LocalState::Failed(at) => {
            fixture.local(COLLECTION, expense(ID, at, LOCAL_AMOUNT)).await;
            fixture
                .replica
                .store()
                .set_sync_status(COLLECTION, ID, SyncStatus::Failed)
                .await
                .expect("set status");
        }
        LocalState::PendingDelete(at) => {
            fixture
                .synced(COLLECTION, expense(ID, at, LOCAL_AMOUNT))
                .await;
            fixture
                .replica
                .store()
                .delete(COLLECTION, ID, Origin::Local)
                .await
                .expect("local delete");
        }
    }
}

/// Run one scenario on a fresh replica.
pub async fn run_scenario(scenario: &PullScenario) -> ScenarioOutcome {
    let fixture = TestFixture::new();
    prepare(&fixture, scenario.local).await;
    if let Some(at) = scenario.remote {
        fixture
            .seed_remote(COLLECTION, expense(ID, at, REMOTE_AMOUNT))
            .await;
    }

    let report = fixture.replica.pull().await.expect("pull");
    let local_amount = fixture
        .get(COLLECTION, ID)
        .await
        .as_ref()
        .and_then(|r: &Record| r.get("amount"))
        .and_then(|v| v.as_i64());
    let open_conflicts = fixture
        .replica
        .store()
        .count_open_conflicts()
        .await
        .expect("count conflicts");

    ScenarioOutcome {
        report,
        local_amount,
        open_conflicts,
    }
}

/// Run every scenario. Returns `(name, matches, outcome)` per scenario.
pub async fn verify_all_scenarios() -> Vec<(String, bool, ScenarioOutcome)> {
    let mut results = Vec::new();
    for scenario in all_scenarios() {
        let outcome = run_scenario(&scenario).await;
        let matches = outcome.matches(&scenario.expected);
        results.push((scenario.name.to_string(), matches, outcome));
    }
    results
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_all_scenarios_hold() {
        for (name, matches, outcome) in verify_all_scenarios().await {
            assert!(matches, "scenario '{}' produced {:?}", name, outcome);
        }
    }

    #[tokio::test]
    async fn test_scenarios_are_deterministic() {
        for scenario in all_scenarios() {
            let first = run_scenario(&scenario).await;
            let second = run_scenario(&scenario).await;
            assert_eq!(first, second, "scenario '{}' is not deterministic", scenario.name);
        }
    }
}
