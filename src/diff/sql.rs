//! SQL statements that replay a diff on top of the `from` snapshot.

use crate::storage::{quote_ident, CellValue};

pub(crate) fn create_object(create_sql: &str) -> String {
    format!("{};", create_sql.trim_end().trim_end_matches(';'))
}

pub(crate) fn drop_object(object_type: &str, name: &str) -> String {
    format!("DROP {} IF EXISTS {};", object_type.to_uppercase(), quote_ident(name))
}

fn where_clause(key_columns: &[String], key: &[CellValue]) -> String {
    key_columns
        .iter()
        .zip(key)
        .map(|(column, value)| match value {
            CellValue::Null => format!("{} IS NULL", quote_ident(column)),
            value => format!("{}={}", quote_ident(column), value.to_sql_literal()),
        })
        .collect::<Vec<_>>()
        .join(" AND ")
}

pub(crate) fn insert_row(table: &str, columns: &[String], values: &[CellValue]) -> String {
    let columns: Vec<String> = columns.iter().map(|c| quote_ident(c)).collect();
    let values: Vec<String> = values.iter().map(CellValue::to_sql_literal).collect();
    format!(
        "INSERT INTO {}({}) VALUES({});",
        quote_ident(table),
        columns.join(","),
        values.join(",")
    )
}

pub(crate) fn delete_row(table: &str, key_columns: &[String], key: &[CellValue]) -> String {
    format!("DELETE FROM {} WHERE {};", quote_ident(table), where_clause(key_columns, key))
}

/// Only the columns whose value changed are set.
pub(crate) fn update_row(
    table: &str,
    columns: &[String],
    key_columns: &[String],
    key: &[CellValue],
    before: &[CellValue],
    after: &[CellValue],
) -> String {
    let assignments: Vec<String> = columns
        .iter()
        .zip(before.iter().zip(after))
        .filter(|(_, (old, new))| old != new)
        .map(|(column, (_, new))| format!("{}={}", quote_ident(column), new.to_sql_literal()))
        .collect();
    format!(
        "UPDATE {} SET {} WHERE {};",
        quote_ident(table),
        assignments.join(","),
        where_clause(key_columns, key)
    )
}
