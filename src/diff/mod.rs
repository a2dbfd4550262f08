//! Schema and data diffs between two database snapshots.
//!
//! A diff is always read as "what changed going from `from` to `to`": objects
//! or rows only in `from` are deletes, only in `to` are adds.

mod engine;
mod rows;
mod sql;

use serde::{Deserialize, Serialize};

pub use engine::diff_snapshots;
pub use rows::{compare_keys, diff_rows};

use crate::graph::Tree;
use crate::storage::{CellValue, ContentHash, RowIdentity};

/// Kind of change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DiffType {
    Add,
    Delete,
    Modify,
}

impl DiffType {
    pub fn as_str(&self) -> &'static str {
        match self {
            DiffType::Add => "add",
            DiffType::Delete => "delete",
            DiffType::Modify => "modify",
        }
    }
}

/// How a diff is going to be used.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MergeStrategy {
    /// display only
    #[default]
    NoMerge,
    /// attach SQL that replays each change, keeping primary keys, and compare licences
    PreservePk,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DiffOptions {
    pub merge: MergeStrategy,
    /// read rows and diff table contents
    pub include_data: bool,
}

impl DiffOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn merge(mut self, merge: MergeStrategy) -> Self {
        self.merge = merge;
        self
    }

    pub fn include_data(mut self, include_data: bool) -> Self {
        self.include_data = include_data;
        self
    }

    fn with_sql(&self) -> bool {
        self.merge == MergeStrategy::PreservePk
    }
}

/// Schema side of an object change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchemaDiff {
    pub action_type: DiffType,
    /// CREATE statement in `from`
    pub before: Option<String>,
    /// CREATE statement in `to`
    pub after: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sql: Option<String>,
}

/// One changed row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataDiff {
    pub action_type: DiffType,
    /// identifying key values
    pub pk: Vec<CellValue>,
    pub data_before: Option<Vec<CellValue>>,
    pub data_after: Option<Vec<CellValue>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sql: Option<String>,
}

/// Every change to one schema object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiffObjectChangeset {
    pub object_name: String,
    pub object_type: String,
    pub action_type: DiffType,
    pub schema: Option<SchemaDiff>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub data: Vec<DataDiff>,
    /// how rows were matched, for tables whose rows were read
    #[serde(skip_serializing_if = "Option::is_none")]
    pub row_identity: Option<RowIdentity>,
}

/// Licence of the snapshot before and after.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LicenceChange {
    pub before: Option<ContentHash>,
    pub after: Option<ContentHash>,
}

/// Full diff result.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Diffs {
    pub diff: Vec<DiffObjectChangeset>,
    /// only computed for merges
    #[serde(skip_serializing_if = "Option::is_none")]
    pub licence_change: Option<LicenceChange>,
}

impl Diffs {
    pub fn is_empty(&self) -> bool {
        self.diff.is_empty() && self.licence_change.is_none()
    }

    /// Names of objects with the given action.
    pub fn objects_with(&self, action: DiffType) -> Vec<&str> {
        self.diff
            .iter()
            .filter(|d| d.action_type == action)
            .map(|d| d.object_name.as_str())
            .collect()
    }
}

/// Compare the licence at tree entry 0.
pub fn licence_change(from: &Tree, to: &Tree) -> Option<LicenceChange> {
    let before = from.licence_sha();
    let after = to.licence_sha();
    if before == after {
        return None;
    }
    Some(LicenceChange {
        before: before.cloned(),
        after: after.cloned(),
    })
}
