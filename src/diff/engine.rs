//! Snapshot differ.

use std::collections::BTreeMap;

use crate::diff::rows::{diff_rows, keys_are_unique};
use crate::diff::sql;
use crate::diff::{DataDiff, DiffObjectChangeset, DiffOptions, DiffType, SchemaDiff};
use crate::storage::{RowIdentity, SchemaObject, Snapshot, SnapshotRow, StorageResult, TableLayout};

const TABLE: &str = "table";
const TRIGGER: &str = "trigger";

/// tables first, triggers last
fn rank(object_type: &str) -> u8 {
    match object_type {
        TABLE => 0,
        TRIGGER => 2,
        _ => 1,
    }
}

fn index_objects(objects: Vec<SchemaObject>) -> BTreeMap<(String, String), SchemaObject> {
    objects
        .into_iter()
        .map(|o| ((o.name.clone(), o.object_type.clone()), o))
        .collect()
}

/// Read a table keyed by its primary key, or by rowid when that key can't
/// tell rows apart.
fn read_table(snapshot: &Snapshot, table: &str) -> StorageResult<(TableLayout, Vec<SnapshotRow>)> {
    let layout = snapshot.table_layout(table)?;
    let rows = snapshot.rows(table, &layout)?;
    if layout.identity == RowIdentity::PrimaryKey && !keys_are_unique(&rows) {
        tracing::debug!(table, "primary key holds NULLs or duplicates, matching rows by rowid");
        return read_by_rowid(snapshot, table);
    }
    Ok((layout, rows))
}

fn read_by_rowid(snapshot: &Snapshot, table: &str) -> StorageResult<(TableLayout, Vec<SnapshotRow>)> {
    let layout = snapshot.rowid_layout(table)?;
    let rows = snapshot.rows(table, &layout)?;
    Ok((layout, rows))
}

fn all_rows(
    table: &str,
    layout: &TableLayout,
    rows: Vec<SnapshotRow>,
    action: DiffType,
    with_sql: bool,
) -> Vec<DataDiff> {
    rows.into_iter()
        .map(|row| {
            let sql = (with_sql && action == DiffType::Add)
                .then(|| sql::insert_row(table, &layout.columns, &row.values));
            let (data_before, data_after) = match action {
                DiffType::Add => (None, Some(row.values)),
                _ => (Some(row.values), None),
            };
            DataDiff {
                action_type: action,
                pk: row.key,
                data_before,
                data_after,
                sql,
            }
        })
        .collect()
}

fn attach_row_sql(table: &str, layout: &TableLayout, changes: &mut [DataDiff]) {
    for change in changes {
        change.sql = match (&change.data_before, &change.data_after) {
            (None, Some(after)) => Some(sql::insert_row(table, &layout.columns, after)),
            (Some(_), None) => Some(sql::delete_row(table, &layout.key_columns, &change.pk)),
            (Some(before), Some(after)) => Some(sql::update_row(
                table,
                &layout.columns,
                &layout.key_columns,
                &change.pk,
                before,
                after,
            )),
            (None, None) => None,
        };
    }
}

/// Diff two snapshots, going from `from` to `to`.
pub fn diff_snapshots(
    from: &Snapshot,
    to: &Snapshot,
    options: &DiffOptions,
) -> StorageResult<Vec<DiffObjectChangeset>> {
    let with_sql = options.with_sql();
    let before = index_objects(from.objects()?);
    let after = index_objects(to.objects()?);

    let mut keys: Vec<&(String, String)> = before.keys().chain(after.keys()).collect();
    keys.sort();
    keys.dedup();

    let mut changes = Vec::new();

    for key in keys {
        let (name, object_type) = key;
        let is_table = object_type == TABLE;

        match (before.get(key), after.get(key)) {
            (Some(old), None) => {
                let mut data = Vec::new();
                let mut row_identity = None;
                if is_table && options.include_data {
                    let (layout, rows) = read_table(from, name)?;
                    row_identity = Some(layout.identity);
                    data = all_rows(name, &layout, rows, DiffType::Delete, with_sql);
                }
                changes.push(DiffObjectChangeset {
                    object_name: name.clone(),
                    object_type: object_type.clone(),
                    action_type: DiffType::Delete,
                    schema: Some(SchemaDiff {
                        action_type: DiffType::Delete,
                        before: Some(old.sql.clone()),
                        after: None,
                        sql: with_sql.then(|| sql::drop_object(object_type, name)),
                    }),
                    data,
                    row_identity,
                });
            }
            (None, Some(new)) => {
                let mut data = Vec::new();
                let mut row_identity = None;
                if is_table && options.include_data {
                    let (layout, rows) = read_table(to, name)?;
                    row_identity = Some(layout.identity);
                    data = all_rows(name, &layout, rows, DiffType::Add, with_sql);
                }
                changes.push(DiffObjectChangeset {
                    object_name: name.clone(),
                    object_type: object_type.clone(),
                    action_type: DiffType::Add,
                    schema: Some(SchemaDiff {
                        action_type: DiffType::Add,
                        before: None,
                        after: Some(new.sql.clone()),
                        sql: with_sql.then(|| sql::create_object(&new.sql)),
                    }),
                    data,
                    row_identity,
                });
            }
            (Some(old), Some(new)) if old.sql != new.sql => {
                // schema changed: the table is dropped and rebuilt with every row
                let mut data = Vec::new();
                let mut row_identity = None;
                if is_table && options.include_data {
                    let (old_layout, old_rows) = read_table(from, name)?;
                    let (new_layout, new_rows) = read_table(to, name)?;
                    row_identity = Some(new_layout.identity);
                    data = all_rows(name, &old_layout, old_rows, DiffType::Delete, with_sql);
                    data.extend(all_rows(name, &new_layout, new_rows, DiffType::Add, with_sql));
                }
                let rebuild = with_sql.then(|| {
                    format!(
                        "{}{}",
                        sql::drop_object(object_type, name),
                        sql::create_object(&new.sql)
                    )
                });
                changes.push(DiffObjectChangeset {
                    object_name: name.clone(),
                    object_type: object_type.clone(),
                    action_type: DiffType::Modify,
                    schema: Some(SchemaDiff {
                        action_type: DiffType::Modify,
                        before: Some(old.sql.clone()),
                        after: Some(new.sql.clone()),
                        sql: rebuild,
                    }),
                    data,
                    row_identity,
                });
            }
            (Some(_), Some(_)) if is_table && options.include_data => {
                let (mut layout, mut old_rows) = read_table(from, name)?;
                let (new_layout, mut new_rows) = read_table(to, name)?;
                // both sides must be matched the same way
                if layout.identity != new_layout.identity {
                    if layout.identity == RowIdentity::PrimaryKey {
                        (layout, old_rows) = read_by_rowid(from, name)?;
                    } else {
                        (_, new_rows) = read_by_rowid(to, name)?;
                    }
                }
                let mut data = diff_rows(&old_rows, &new_rows);
                if data.is_empty() {
                    continue;
                }
                if with_sql {
                    attach_row_sql(name, &layout, &mut data);
                }
                changes.push(DiffObjectChangeset {
                    object_name: name.clone(),
                    object_type: object_type.clone(),
                    action_type: DiffType::Modify,
                    schema: None,
                    data,
                    row_identity: Some(layout.identity),
                });
            }
            _ => {}
        }
    }

    changes.sort_by_key(|c| rank(&c.object_type));
    tracing::debug!(objects = changes.len(), "computed snapshot diff");
    Ok(changes)
}
