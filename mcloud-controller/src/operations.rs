//! Tracking of provider long-running operations.
//!
//! Every mutating call that the provider accepts leaves an
//! [`OperationRecord`] in the object's status. Records are only ever
//! appended; polling flips them to done. The log keeps insertion order for
//! auditing and an index by operation name for lookups.

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// What a tracked operation does to the remote resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationKind {
    Create,
    Update,
    Delete,
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            OperationKind::Create => "create",
            OperationKind::Update => "update",
            OperationKind::Delete => "delete",
        };
        f.write_str(s)
    }
}

/// A provider operation the reconciler started.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OperationRecord {
    /// Provider-assigned operation name.
    pub name: String,
    #[serde(rename = "operationType")]
    pub kind: OperationKind,
    #[serde(default)]
    pub done: bool,
    /// Set when the operation finished unsuccessfully.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl OperationRecord {
    pub fn is_pending(&self) -> bool {
        !self.done
    }

    pub fn succeeded(&self) -> bool {
        self.done && self.error.is_none()
    }
}

/// Append-only, ordered log of operation records.
///
/// Serializes as a plain list of records.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(from = "Vec<OperationRecord>", into = "Vec<OperationRecord>")]
pub struct OperationLog {
    records: Vec<OperationRecord>,
    index: HashMap<String, usize>,
}

impl PartialEq for OperationLog {
    fn eq(&self, other: &Self) -> bool {
        self.records == other.records
    }
}

impl From<Vec<OperationRecord>> for OperationLog {
    fn from(records: Vec<OperationRecord>) -> Self {
        let mut log = OperationLog::default();
        for record in records {
            log.push(record);
        }
        log
    }
}

impl From<OperationLog> for Vec<OperationRecord> {
    fn from(log: OperationLog) -> Self {
        log.records
    }
}

impl OperationLog {
    fn push(&mut self, record: OperationRecord) -> bool {
        if self.index.contains_key(&record.name) {
            return false;
        }
        self.index.insert(record.name.clone(), self.records.len());
        self.records.push(record);
        true
    }

    /// Append a pending record. Returns false if the name is already known.
    pub fn record(&mut self, kind: OperationKind, name: impl Into<String>) -> bool {
        self.push(OperationRecord {
            name: name.into(),
            kind,
            done: false,
            error: None,
        })
    }

    /// Append a record for a call the provider finished synchronously.
    pub fn record_completed(&mut self, kind: OperationKind, name: impl Into<String>) -> bool {
        self.push(OperationRecord {
            name: name.into(),
            kind,
            done: true,
            error: None,
        })
    }

    /// Log with the named record's done flag set to `done`.
    ///
    /// Unknown names leave the log unchanged.
    pub fn resolve(&self, name: &str, done: bool) -> OperationLog {
        self.with_record(name, |record| record.done = done)
    }

    /// Log with the named record marked done with an error.
    pub fn fail(&self, name: &str, error: impl Into<String>) -> OperationLog {
        let error = error.into();
        self.with_record(name, |record| {
            record.done = true;
            record.error = Some(error);
        })
    }

    fn with_record(&self, name: &str, f: impl FnOnce(&mut OperationRecord)) -> OperationLog {
        let mut log = self.clone();
        if let Some(&i) = log.index.get(name) {
            if let Some(record) = log.records.get_mut(i) {
                f(record);
            }
        }
        log
    }

    pub fn get(&self, name: &str) -> Option<&OperationRecord> {
        self.index.get(name).and_then(|&i| self.records.get(i))
    }

    pub fn iter(&self) -> impl Iterator<Item = &OperationRecord> {
        self.records.iter()
    }

    pub fn pending(&self) -> impl Iterator<Item = &OperationRecord> {
        self.records.iter().filter(|r| r.is_pending())
    }

    pub fn pending_of_kind(&self, kind: OperationKind) -> impl Iterator<Item = &OperationRecord> {
        self.pending().filter(move |r| r.kind == kind)
    }

    pub fn has_pending(&self) -> bool {
        self.pending().next().is_some()
    }

    /// Most recently started record of a kind.
    pub fn latest_of_kind(&self, kind: OperationKind) -> Option<&OperationRecord> {
        self.records.iter().rev().find(|r| r.kind == kind)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}
