//! Collection and index declarations.
//!
//! Collections are declared once, when a store is opened. Each may carry
//! secondary indices; querying an undeclared index is not an error and falls
//! back to a filtered full scan with identical results.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{CoreError, Result};
use crate::record::Record;

/// Engine-owned store holding outbox entries.
pub const OUTBOX: &str = "outbox";

/// Engine-owned store holding conflicts.
pub const CONFLICT_LOG: &str = "conflict_log";

/// A secondary index on one record attribute.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexDef {
    /// Name used in `get_all_by_index` lookups.
    pub name: String,
    /// Attribute the index is keyed on (see [`Record::attribute`]).
    pub key_path: String,
}

impl IndexDef {
    pub fn new(name: impl Into<String>, key_path: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            key_path: key_path.into(),
        }
    }

    /// An index whose name is also its key path.
    pub fn on(key_path: impl Into<String>) -> Self {
        let key_path = key_path.into();
        Self {
            name: key_path.clone(),
            key_path,
        }
    }

    /// The index key of `record`, if it has the attribute.
    pub fn key_of(&self, record: &Record) -> Option<String> {
        record.attribute(&self.key_path).map(|v| index_key(&v))
    }
}

/// A named partition of records.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectionSchema {
    pub name: String,
    pub indexes: Vec<IndexDef>,
}

impl CollectionSchema {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            indexes: Vec::new(),
        }
    }

    /// Declare a secondary index.
    pub fn index(mut self, index: IndexDef) -> Self {
        self.indexes.push(index);
        self
    }

    pub fn find_index(&self, name: &str) -> Option<&IndexDef> {
        self.indexes.iter().find(|i| i.name == name)
    }
}

/// The set of domain collections a store serves.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Schema {
    collections: Vec<CollectionSchema>,
}

impl Schema {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a collection declaration.
    pub fn collection(mut self, collection: CollectionSchema) -> Self {
        self.collections.push(collection);
        self
    }

    /// Check names: non-empty, unique, not colliding with engine stores, and
    /// index names unique per collection.
    pub fn validate(&self) -> Result<()> {
        let mut seen = std::collections::HashSet::new();
        for c in &self.collections {
            if c.name.is_empty() {
                return Err(CoreError::InvalidSchema("empty collection name".into()));
            }
            if c.name == OUTBOX || c.name == CONFLICT_LOG {
                return Err(CoreError::InvalidSchema(format!(
                    "collection name {} is reserved",
                    c.name
                )));
            }
            if !seen.insert(c.name.as_str()) {
                return Err(CoreError::InvalidSchema(format!(
                    "duplicate collection {}",
                    c.name
                )));
            }
            let mut index_names = std::collections::HashSet::new();
            for index in &c.indexes {
                if index.name.is_empty() || index.key_path.is_empty() {
                    return Err(CoreError::InvalidSchema(format!(
                        "empty index name or key path in {}",
                        c.name
                    )));
                }
                if !index_names.insert(index.name.as_str()) {
                    return Err(CoreError::InvalidSchema(format!(
                        "duplicate index {} in {}",
                        index.name, c.name
                    )));
                }
            }
        }
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&CollectionSchema> {
        self.collections.iter().find(|c| c.name == name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn collections(&self) -> impl Iterator<Item = &CollectionSchema> {
        self.collections.iter()
    }

    pub fn names(&self) -> Vec<String> {
        self.collections.iter().map(|c| c.name.clone()).collect()
    }
}

/// Canonical string key for an indexed attribute value.
///
/// Both the maintained-index path and the full-scan fallback compare through
/// this function. JSON number representation is preserved, so `10` and
/// `10.0` are different keys, exactly as `Value` equality treats them.
pub fn index_key(value: &Value) -> String {
    value.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample() -> Schema {
        Schema::new()
            .collection(CollectionSchema::new("expenses").index(IndexDef::on("category")))
            .collection(CollectionSchema::new("beds"))
    }

    #[test]
    fn test_schema_lookup() {
        let schema = sample();
        schema.validate().unwrap();
        assert!(schema.contains("expenses"));
        assert!(!schema.contains("outbox"));
        assert!(schema.get("expenses").unwrap().find_index("category").is_some());
        assert_eq!(schema.names(), vec!["expenses", "beds"]);
    }

    #[test]
    fn test_schema_rejects_reserved_and_duplicates() {
        let reserved = Schema::new().collection(CollectionSchema::new(OUTBOX));
        assert!(reserved.validate().is_err());

        let dup = Schema::new()
            .collection(CollectionSchema::new("a"))
            .collection(CollectionSchema::new("a"));
        assert!(dup.validate().is_err());

        let dup_index = Schema::new().collection(
            CollectionSchema::new("a")
                .index(IndexDef::on("x"))
                .index(IndexDef::new("x", "y")),
        );
        assert!(dup_index.validate().is_err());
    }

    #[test]
    fn test_index_key_distinguishes_types() {
        assert_ne!(index_key(&json!("1")), index_key(&json!(1)));
        assert_ne!(index_key(&json!(1)), index_key(&json!(1.0)));
        assert_eq!(index_key(&json!("north")), "\"north\"");
    }

    fn scalar() -> impl proptest::strategy::Strategy<Value = Value> {
        use proptest::prelude::*;
        prop_oneof![
            Just(Value::Null),
            any::<bool>().prop_map(Value::from),
            any::<i64>().prop_map(Value::from),
            "[a-z0-9]{0,6}".prop_map(Value::from),
        ]
    }

    proptest::proptest! {
        #[test]
        fn test_index_key_agrees_with_value_equality(a in scalar(), b in scalar()) {
            proptest::prop_assert_eq!(index_key(&a) == index_key(&b), a == b);
        }
    }

    #[test]
    fn test_index_key_of_record() {
        let index = IndexDef::new("byStatus", "syncStatus");
        let record = Record::new("a", 1);
        assert_eq!(index.key_of(&record), Some("\"pending\"".to_string()));
        assert_eq!(IndexDef::on("nope").key_of(&record), None);
    }
}
