//! Secondary index abstraction.
//!
//! An [`Index`] answers "which record ids have this attribute key". The
//! default `lookup` is a filtered full scan, so a collection with no
//! maintained index still answers every query completely. [`HashIndex`]
//! overrides it with a maintained key map.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;

use driftsync_core::{index_key, IndexDef, Record};

/// Whether `record`'s attribute at `key_path` has index key `key`.
///
/// The single equality used by every lookup path.
pub fn matches_key(record: &Record, key_path: &str, key: &str) -> bool {
    record
        .attribute(key_path)
        .map(|v| index_key(&v) == key)
        .unwrap_or(false)
}

/// Lookup capability over one collection.
pub trait Index: Send + Sync + fmt::Debug {
    /// Attribute the index is keyed on.
    fn key_path(&self) -> &str;

    /// Ids of records whose key equals `key`, ascending.
    fn lookup(&self, records: &BTreeMap<String, Record>, key: &str) -> Vec<String> {
        records
            .values()
            .filter(|r| matches_key(r, self.key_path(), key))
            .map(|r| r.id.clone())
            .collect()
    }

    /// Keep the index current after `record` was stored.
    fn insert(&mut self, _record: &Record) {}

    /// Keep the index current after `record` was removed or replaced.
    fn remove(&mut self, _record: &Record) {}
}

/// Full-scan fallback for undeclared indices.
#[derive(Debug, Clone)]
pub struct ScanIndex {
    key_path: String,
}

impl ScanIndex {
    pub fn new(key_path: impl Into<String>) -> Self {
        Self {
            key_path: key_path.into(),
        }
    }
}

impl Index for ScanIndex {
    fn key_path(&self) -> &str {
        &self.key_path
    }
}

/// Maintained key → ids map.
#[derive(Debug, Clone)]
pub struct HashIndex {
    def: IndexDef,
    entries: HashMap<String, BTreeSet<String>>,
}

impl HashIndex {
    pub fn new(def: IndexDef) -> Self {
        Self {
            def,
            entries: HashMap::new(),
        }
    }
}

impl Index for HashIndex {
    fn key_path(&self) -> &str {
        &self.def.key_path
    }

    fn lookup(&self, _records: &BTreeMap<String, Record>, key: &str) -> Vec<String> {
        self.entries
            .get(key)
            .map(|ids| ids.iter().cloned().collect())
            .unwrap_or_default()
    }

    fn insert(&mut self, record: &Record) {
        if let Some(key) = self.def.key_of(record) {
            self.entries.entry(key).or_default().insert(record.id.clone());
        }
    }

    fn remove(&mut self, record: &Record) {
        if let Some(key) = self.def.key_of(record) {
            if let Some(ids) = self.entries.get_mut(&key) {
                ids.remove(&record.id);
                if ids.is_empty() {
                    self.entries.remove(&key);
                }
            }
        }
    }
}
