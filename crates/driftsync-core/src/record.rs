//! Records: the unit of storage and sync.
//!
//! The store is agnostic to a record's domain fields. It only relies on the
//! three envelope attributes every record carries: `id`, `updatedAt`, and
//! `syncStatus`.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{CoreError, Result};

/// Domain fields of a record, as a JSON object.
pub type Fields = Map<String, Value>;

/// Synchronization state of a single record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncStatus {
    /// The record matches what the remote last accepted.
    Synced,
    /// A local mutation has not been confirmed by the remote yet.
    #[default]
    Pending,
    /// The last push attempt for this record failed.
    Failed,
}

impl SyncStatus {
    /// Stable string form used in storage and on the wire.
    pub const fn as_str(&self) -> &'static str {
        match self {
            SyncStatus::Synced => "synced",
            SyncStatus::Pending => "pending",
            SyncStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SyncStatus {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "synced" => Ok(SyncStatus::Synced),
            "pending" => Ok(SyncStatus::Pending),
            "failed" => Ok(SyncStatus::Failed),
            other => Err(CoreError::UnknownSyncStatus(other.to_string())),
        }
    }
}

/// Who initiated a write.
///
/// Local writes come from domain code and are recorded in the outbox. Sync
/// writes come from the engine itself (pulled records, status bookkeeping)
/// and must never re-enter the outbox.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Origin {
    Local,
    Sync,
}

/// A domain entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Record {
    /// Stable identifier, unique within its collection.
    pub id: String,
    /// Logical or wall-clock timestamp of the last write (Unix ms).
    pub updated_at: i64,
    /// Whether the remote has confirmed this version.
    #[serde(default)]
    pub sync_status: SyncStatus,
    /// Everything else. Opaque to the store.
    #[serde(flatten)]
    pub fields: Fields,
}

impl Record {
    /// Name of the built-in id attribute, usable as an index key path.
    pub const ID: &'static str = "id";
    /// Name of the built-in timestamp attribute.
    pub const UPDATED_AT: &'static str = "updatedAt";
    /// Name of the built-in sync status attribute.
    pub const SYNC_STATUS: &'static str = "syncStatus";

    /// Create an empty pending record.
    pub fn new(id: impl Into<String>, updated_at: i64) -> Self {
        Self {
            id: id.into(),
            updated_at,
            sync_status: SyncStatus::Pending,
            fields: Fields::new(),
        }
    }

    /// Builder-style field setter.
    ///
    /// Envelope attribute names are not valid field names; a record carrying
    /// one is rejected by [`Record::validate`] when it is stored.
    pub fn with_field(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(name.into(), value.into());
        self
    }

    /// Builder-style status setter.
    pub fn with_status(mut self, status: SyncStatus) -> Self {
        self.sync_status = status;
        self
    }

    /// Set a domain field in place.
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<Value>) -> Result<()> {
        let name = name.into();
        if Self::is_reserved(&name) {
            return Err(CoreError::InvalidRecord(format!(
                "field name {} is reserved",
                name
            )));
        }
        self.fields.insert(name, value.into());
        Ok(())
    }

    /// True for the envelope attribute names.
    pub fn is_reserved(name: &str) -> bool {
        matches!(name, Self::ID | Self::UPDATED_AT | Self::SYNC_STATUS)
    }

    /// Check the record can be stored and read back unchanged.
    pub fn validate(&self) -> Result<()> {
        if self.id.is_empty() {
            return Err(CoreError::InvalidRecord("record id must not be empty".into()));
        }
        if let Some(name) = self.fields.keys().find(|k| Self::is_reserved(k)) {
            return Err(CoreError::InvalidRecord(format!(
                "field name {} is reserved",
                name
            )));
        }
        Ok(())
    }

    /// Borrow a domain field.
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.fields.get(name)
    }

    /// Resolve an attribute by key path, including the envelope attributes.
    ///
    /// This is what secondary indices and full-scan fallbacks both compare
    /// against, so the two paths can never disagree.
    pub fn attribute(&self, key_path: &str) -> Option<Value> {
        match key_path {
            Self::ID => Some(Value::String(self.id.clone())),
            Self::UPDATED_AT => Some(Value::from(self.updated_at)),
            Self::SYNC_STATUS => Some(Value::String(self.sync_status.as_str().to_string())),
            other => self.fields.get(other).cloned(),
        }
    }

    /// True when the record holds a local mutation the remote has not accepted.
    pub fn is_dirty(&self) -> bool {
        !matches!(self.sync_status, SyncStatus::Synced)
    }

    /// Parse a record from a JSON object.
    pub fn from_json(value: Value) -> Result<Self> {
        let record: Record =
            serde_json::from_value(value).map_err(|e| CoreError::InvalidRecord(e.to_string()))?;
        record.validate()?;
        Ok(record)
    }

    /// Render the record as a JSON object.
    pub fn to_json(&self) -> Value {
        let mut obj = self.fields.clone();
        obj.insert(Self::ID.into(), Value::String(self.id.clone()));
        obj.insert(Self::UPDATED_AT.into(), Value::from(self.updated_at));
        obj.insert(
            Self::SYNC_STATUS.into(),
            Value::String(self.sync_status.as_str().to_string()),
        );
        Value::Object(obj)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_record_json_shape() {
        let record = Record::new("e1", 100).with_field("amount", 10);
        let value = serde_json::to_value(&record).unwrap();
        assert_eq!(
            value,
            json!({"id": "e1", "updatedAt": 100, "syncStatus": "pending", "amount": 10})
        );
    }

    #[test]
    fn test_record_from_json_defaults_to_pending() {
        let record = Record::from_json(json!({"id": "a", "updatedAt": 5, "name": "x"})).unwrap();
        assert_eq!(record.sync_status, SyncStatus::Pending);
        assert_eq!(record.get("name"), Some(&json!("x")));
        assert_eq!(record.to_json()["syncStatus"], json!("pending"));
    }

    #[test]
    fn test_record_from_json_rejects_empty_id() {
        let err = Record::from_json(json!({"id": "", "updatedAt": 1})).unwrap_err();
        assert!(matches!(err, CoreError::InvalidRecord(_)));
    }

    #[test]
    fn test_reserved_field_names_are_rejected() {
        let mut record = Record::new("e1", 1);
        assert!(matches!(
            record.set("updatedAt", 5),
            Err(CoreError::InvalidRecord(_))
        ));
        assert!(record.set("amount", 5).is_ok());
        assert!(record.validate().is_ok());

        let shadowed = Record::new("e1", 1).with_field("id", "other");
        assert!(matches!(shadowed.validate(), Err(CoreError::InvalidRecord(_))));
    }

    #[test]
    fn test_attribute_resolves_envelope_fields() {
        let record = Record::new("r", 7)
            .with_status(SyncStatus::Synced)
            .with_field("bed", "north");
        assert_eq!(record.attribute("id"), Some(json!("r")));
        assert_eq!(record.attribute("updatedAt"), Some(json!(7)));
        assert_eq!(record.attribute("syncStatus"), Some(json!("synced")));
        assert_eq!(record.attribute("bed"), Some(json!("north")));
        assert_eq!(record.attribute("missing"), None);
    }

    #[test]
    fn test_dirty_flag() {
        assert!(Record::new("a", 1).is_dirty());
        assert!(Record::new("a", 1).with_status(SyncStatus::Failed).is_dirty());
        assert!(!Record::new("a", 1).with_status(SyncStatus::Synced).is_dirty());
    }

    #[test]
    fn test_sync_status_parse() {
        assert_eq!("failed".parse::<SyncStatus>().unwrap(), SyncStatus::Failed);
        assert!("bogus".parse::<SyncStatus>().is_err());
    }
}
