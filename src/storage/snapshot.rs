//! Read-only access to a stored SQLite database snapshot.
//!
//! Snapshots are opaque bytes in the blob store. To query one we materialise
//! the bytes into a temporary file and open it read-only; the file lives as
//! long as the `Snapshot` does.

use std::fmt;
use std::io::Write;

use rusqlite::types::ValueRef;
use rusqlite::{Connection, OpenFlags};
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;

use crate::storage::error::{StorageError, StorageResult};

/// A single SQLite value read from a snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CellValue {
    Null,
    Integer(i64),
    Real(f64),
    Text(String),
    Blob(Vec<u8>),
}

impl CellValue {
    /// Render as a SQL literal.
    pub fn to_sql_literal(&self) -> String {
        match self {
            CellValue::Null => "NULL".to_string(),
            CellValue::Integer(i) => i.to_string(),
            CellValue::Real(r) => format!("{:?}", r),
            CellValue::Text(s) => format!("'{}'", s.replace('\'', "''")),
            CellValue::Blob(b) => format!("X'{}'", hex::encode(b)),
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, CellValue::Null)
    }
}

impl From<ValueRef<'_>> for CellValue {
    fn from(value: ValueRef<'_>) -> Self {
        match value {
            ValueRef::Null => CellValue::Null,
            ValueRef::Integer(i) => CellValue::Integer(i),
            ValueRef::Real(r) => CellValue::Real(r),
            ValueRef::Text(t) => CellValue::Text(String::from_utf8_lossy(t).into_owned()),
            ValueRef::Blob(b) => CellValue::Blob(b.to_vec()),
        }
    }
}

impl fmt::Display for CellValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CellValue::Null => write!(f, "NULL"),
            CellValue::Integer(i) => write!(f, "{}", i),
            CellValue::Real(r) => write!(f, "{}", r),
            CellValue::Text(s) => write!(f, "{}", s),
            CellValue::Blob(b) => write!(f, "<{} bytes>", b.len()),
        }
    }
}

/// A schema object (table, view, index, trigger) listed in `sqlite_master`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemaObject {
    pub name: String,
    pub object_type: String,
    /// the full CREATE statement
    pub sql: String,
}

/// How rows of a table are identified when matching across snapshots.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RowIdentity {
    /// the declared primary key
    PrimaryKey,
    /// no primary key declared; the rowid stands in. Rowids can be reused
    /// after deletes, so matches are only as good as the rowid.
    Rowid,
}

/// Column layout of a table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableLayout {
    /// every column, in declaration order
    pub columns: Vec<String>,
    /// columns identifying a row (primary key order, or a rowid alias)
    pub key_columns: Vec<String>,
    pub identity: RowIdentity,
}

/// One row: identifying key values, then every column value.
#[derive(Debug, Clone, PartialEq)]
pub struct SnapshotRow {
    pub key: Vec<CellValue>,
    pub values: Vec<CellValue>,
}

/// A queryable, read-only SQLite snapshot.
pub struct Snapshot {
    // declared before `_file` so the connection closes first
    conn: Connection,
    _file: NamedTempFile,
}

impl Snapshot {
    /// Materialise snapshot bytes and open them read-only.
    pub fn from_bytes(bytes: &[u8]) -> StorageResult<Self> {
        let mut file = tempfile::Builder::new()
            .prefix("snapshot-")
            .suffix(".sqlite")
            .tempfile()?;
        file.write_all(bytes)?;
        file.flush()?;

        let conn = Connection::open_with_flags(
            file.path(),
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;

        // fails with "file is not a database" for garbage input
        conn.query_row("SELECT count(*) FROM sqlite_master", [], |row| row.get::<_, i64>(0))?;

        Ok(Self { conn, _file: file })
    }

    /// List user objects ordered by name, skipping SQLite internals and virtual tables.
    pub fn objects(&self) -> StorageResult<Vec<SchemaObject>> {
        let mut stmt = self.conn.prepare(
            "SELECT name, type, sql FROM sqlite_master \
             WHERE name NOT LIKE 'sqlite_%' \
               AND sql IS NOT NULL \
               AND (type != 'table' OR sql NOT LIKE 'CREATE VIRTUAL%') \
             ORDER BY name, type",
        )?;

        let objects = stmt
            .query_map([], |row| {
                Ok(SchemaObject {
                    name: row.get(0)?,
                    object_type: row.get(1)?,
                    sql: row.get(2)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(objects)
    }

    fn table_info(&self, table: &str) -> StorageResult<Vec<(String, i64)>> {
        let mut stmt = self
            .conn
            .prepare("SELECT name, pk FROM pragma_table_info(?1) ORDER BY cid")?;
        let info = stmt
            .query_map([table], |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)))?
            .collect::<Result<Vec<_>, _>>()?;

        if info.is_empty() {
            return Err(StorageError::CorruptedData {
                key: table.to_string(),
                reason: "table has no columns".to_string(),
            });
        }
        Ok(info)
    }

    /// Work out the columns and row identity of a table.
    pub fn table_layout(&self, table: &str) -> StorageResult<TableLayout> {
        let info = self.table_info(table)?;
        let columns: Vec<String> = info.iter().map(|(name, _)| name.clone()).collect();

        let mut pk: Vec<(i64, String)> = info
            .iter()
            .filter(|(_, pk)| *pk > 0)
            .map(|(name, pk)| (*pk, name.clone()))
            .collect();
        pk.sort();

        if !pk.is_empty() {
            return Ok(TableLayout {
                columns,
                key_columns: pk.into_iter().map(|(_, name)| name).collect(),
                identity: RowIdentity::PrimaryKey,
            });
        }

        Self::by_rowid(table, columns)
    }

    /// Layout that matches rows by rowid even when the table declares a
    /// primary key. Used when the declared key holds NULLs or duplicates.
    pub fn rowid_layout(&self, table: &str) -> StorageResult<TableLayout> {
        let columns = self.table_info(table)?.into_iter().map(|(name, _)| name).collect();
        Self::by_rowid(table, columns)
    }

    fn by_rowid(table: &str, columns: Vec<String>) -> StorageResult<TableLayout> {
        let alias = ["rowid", "_rowid_", "oid"]
            .into_iter()
            .find(|alias| !columns.iter().any(|c| c.eq_ignore_ascii_case(alias)))
            .ok_or_else(|| StorageError::CorruptedData {
                key: table.to_string(),
                reason: "no usable primary key and every rowid alias is shadowed by a column".to_string(),
            })?;

        Ok(TableLayout {
            columns,
            key_columns: vec![alias.to_string()],
            identity: RowIdentity::Rowid,
        })
    }

    /// Read every row of a table, ordered by its key columns.
    pub fn rows(&self, table: &str, layout: &TableLayout) -> StorageResult<Vec<SnapshotRow>> {
        let select: Vec<String> = layout
            .key_columns
            .iter()
            .chain(layout.columns.iter())
            .map(|c| quote_ident(c))
            .collect();
        let order: Vec<String> = layout.key_columns.iter().map(|c| quote_ident(c)).collect();
        let query = format!(
            "SELECT {} FROM {} ORDER BY {}",
            select.join(","),
            quote_ident(table),
            order.join(",")
        );

        let width = select.len();
        let key_len = layout.key_columns.len();

        let mut stmt = self.conn.prepare(&query)?;
        let rows = stmt
            .query_map([], |row| {
                let mut cells = Vec::with_capacity(width);
                for i in 0..width {
                    cells.push(CellValue::from(row.get_ref(i)?));
                }
                let values = cells.split_off(key_len);
                Ok(SnapshotRow { key: cells, values })
            })?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(rows)
    }
}

/// Quote a SQL identifier.
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}
