//! Row-level diff of one table.

use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};

use crate::diff::{DataDiff, DiffType};
use crate::storage::{CellValue, SnapshotRow};

fn key_of(row: &SnapshotRow) -> Vec<String> {
    row.key.iter().map(CellValue::to_sql_literal).collect()
}

fn storage_class(value: &CellValue) -> u8 {
    match value {
        CellValue::Null => 0,
        CellValue::Integer(_) | CellValue::Real(_) => 1,
        CellValue::Text(_) => 2,
        CellValue::Blob(_) => 3,
    }
}

fn compare_cells(a: &CellValue, b: &CellValue) -> Ordering {
    match (a, b) {
        (CellValue::Integer(x), CellValue::Integer(y)) => x.cmp(y),
        (CellValue::Integer(x), CellValue::Real(y)) => (*x as f64).total_cmp(y),
        (CellValue::Real(x), CellValue::Integer(y)) => x.total_cmp(&(*y as f64)),
        (CellValue::Real(x), CellValue::Real(y)) => x.total_cmp(y),
        (CellValue::Text(x), CellValue::Text(y)) => x.as_bytes().cmp(y.as_bytes()),
        (CellValue::Blob(x), CellValue::Blob(y)) => x.cmp(y),
        _ => storage_class(a).cmp(&storage_class(b)),
    }
}

/// Order keys the way SQLite's default collation does.
pub fn compare_keys(a: &[CellValue], b: &[CellValue]) -> Ordering {
    a.iter()
        .zip(b.iter())
        .map(|(x, y)| compare_cells(x, y))
        .find(|o| o.is_ne())
        .unwrap_or_else(|| a.len().cmp(&b.len()))
}

/// Whether every row has a non-NULL key that no other row shares.
///
/// SQLite lets NULLs into most primary key columns, and NULLs never compare
/// equal, so such keys cannot be used to pair rows across snapshots.
pub fn keys_are_unique(rows: &[SnapshotRow]) -> bool {
    let mut seen = HashSet::with_capacity(rows.len());
    rows.iter()
        .all(|row| !row.key.iter().any(CellValue::is_null) && seen.insert(key_of(row)))
}

/// Diff the rows of a table between two snapshots.
///
/// Rows are matched on their key, which must be unique on each side (see
/// [`keys_are_unique`]). Identical rows are left out; the result is ordered by
/// key.
pub fn diff_rows(from: &[SnapshotRow], to: &[SnapshotRow]) -> Vec<DataDiff> {
    let to_by_key: HashMap<Vec<String>, &SnapshotRow> = to.iter().map(|r| (key_of(r), r)).collect();
    let from_by_key: HashMap<Vec<String>, &SnapshotRow> = from.iter().map(|r| (key_of(r), r)).collect();

    let mut changes = Vec::new();

    for before in from {
        match to_by_key.get(&key_of(before)) {
            None => changes.push(DataDiff {
                action_type: DiffType::Delete,
                pk: before.key.clone(),
                data_before: Some(before.values.clone()),
                data_after: None,
                sql: None,
            }),
            Some(after) if after.values != before.values => changes.push(DataDiff {
                action_type: DiffType::Modify,
                pk: before.key.clone(),
                data_before: Some(before.values.clone()),
                data_after: Some(after.values.clone()),
                sql: None,
            }),
            Some(_) => {}
        }
    }

    for after in to {
        if !from_by_key.contains_key(&key_of(after)) {
            changes.push(DataDiff {
                action_type: DiffType::Add,
                pk: after.key.clone(),
                data_before: None,
                data_after: Some(after.values.clone()),
                sql: None,
            });
        }
    }

    changes.sort_by(|a, b| compare_keys(&a.pk, &b.pk));
    changes
}
