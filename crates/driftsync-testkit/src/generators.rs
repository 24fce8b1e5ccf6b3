//! Proptest generators for property-based testing.

use proptest::prelude::*;
use serde_json::Value;

use driftsync_core::{Record, SyncStatus};

/// Generate a record id from a small pool, so generated writes collide.
pub fn record_id() -> impl Strategy<Value = String> {
    "[a-e][0-9]".prop_map(String::from)
}

/// Generate a reasonable `updatedAt`.
pub fn timestamp() -> impl Strategy<Value = i64> {
    0i64..=1_700_000_000_000i64
}

/// Two timestamps with `t1 < t2`.
pub fn ordered_timestamps() -> impl Strategy<Value = (i64, i64)> {
    (timestamp(), 1i64..=1_000_000i64).prop_map(|(t1, gap)| (t1, t1 + gap))
}

/// Generate a scalar JSON value.
pub fn scalar() -> impl Strategy<Value = Value> {
    prop_oneof![
        any::<bool>().prop_map(Value::from),
        any::<i64>().prop_map(Value::from),
        "[a-z ]{0,12}".prop_map(Value::from),
        Just(Value::Null),
    ]
}

/// Generate a record with up to four scalar fields.
pub fn record(id: impl Strategy<Value = String>) -> impl Strategy<Value = Record> {
    (
        id,
        timestamp(),
        prop::collection::btree_map("f_[a-z]{1,6}", scalar(), 0..=4),
    )
        .prop_map(|(id, updated_at, fields)| {
            let mut record = Record::new(id, updated_at);
            record.fields.extend(fields);
            record
        })
}

/// Generate a sync status.
pub fn sync_status() -> impl Strategy<Value = SyncStatus> {
    prop_oneof![
        Just(SyncStatus::Pending),
        Just(SyncStatus::Synced),
        Just(SyncStatus::Failed),
    ]
}

/// A local mutation issued by domain code.
#[derive(Debug, Clone, PartialEq)]
pub enum WriteOp {
    Put { id: String, amount: i64 },
    Delete { id: String },
}

impl WriteOp {
    pub fn id(&self) -> &str {
        match self {
            WriteOp::Put { id, .. } | WriteOp::Delete { id } => id,
        }
    }
}

impl Arbitrary for WriteOp {
    type Parameters = ();
    type Strategy = BoxedStrategy<Self>;

    fn arbitrary_with(_: Self::Parameters) -> Self::Strategy {
        prop_oneof![
            3 => (record_id(), any::<i64>()).prop_map(|(id, amount)| WriteOp::Put { id, amount }),
            1 => record_id().prop_map(|id| WriteOp::Delete { id }),
        ]
        .boxed()
    }
}

/// Generate a sequence of local mutations.
pub fn write_ops(max_len: usize) -> impl Strategy<Value = Vec<WriteOp>> {
    prop::collection::vec(any::<WriteOp>(), 1..=max_len)
}
