//! Read-only structural inspection of SQLite database files.
//!
//! Used both for the live database (as the comparison baseline) and for
//! uploaded backup files of unknown provenance. Inspection never mutates
//! the file: uploads are opened read-only after a magic-byte check, so a
//! random binary is rejected before SQLite parses anything.

use rusqlite::{Connection, OpenFlags};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::io::Read;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// First 16 bytes of every SQLite database file.
pub const SQLITE_MAGIC: &[u8; 16] = b"SQLite format 3\0";

#[derive(Debug, Error)]
pub enum InspectError {
    /// Missing magic bytes, unreadable file, or a file SQLite refuses to open.
    #[error("{path}: not a readable SQLite database ({reason})", path = .path.display())]
    UnreadableDatabase { path: PathBuf, reason: String },

    #[error("schema enumeration failed for {path}", path = .path.display())]
    Schema {
        path: PathBuf,
        #[source]
        source: rusqlite::Error,
    },
}

/// One column as reported by `PRAGMA table_info`. Only `name` takes part
/// in compatibility decisions; the rest is carried for display.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ColumnInfo {
    pub name: String,
    pub decl_type: String,
    pub notnull: bool,
    pub pk: bool,
}

/// A single user table: name plus declared columns in declaration order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TableDescriptor {
    pub name: String,
    pub columns: Vec<ColumnInfo>,
}

impl TableDescriptor {
    pub fn column_names(&self) -> BTreeSet<String> {
        self.columns.iter().map(|c| c.name.clone()).collect()
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.columns.iter().any(|c| c.name == name)
    }
}

/// The structural shape of one database file at one instant. Immutable
/// once built; row counts are best-effort and carried for display.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SchemaSnapshot {
    tables: BTreeMap<String, TableDescriptor>,
    row_counts: BTreeMap<String, i64>,
}

impl SchemaSnapshot {
    pub fn new(tables: Vec<TableDescriptor>, row_counts: BTreeMap<String, i64>) -> Self {
        let tables = tables.into_iter().map(|t| (t.name.clone(), t)).collect();
        Self { tables, row_counts }
    }

    pub fn table(&self, name: &str) -> Option<&TableDescriptor> {
        self.tables.get(name)
    }

    pub fn table_names(&self) -> BTreeSet<String> {
        self.tables.keys().cloned().collect()
    }

    pub fn tables(&self) -> impl Iterator<Item = &TableDescriptor> {
        self.tables.values()
    }

    pub fn table_count(&self) -> usize {
        self.tables.len()
    }

    pub fn row_counts(&self) -> &BTreeMap<String, i64> {
        &self.row_counts
    }

    pub fn total_rows(&self) -> i64 {
        self.row_counts.values().sum()
    }
}

/// Check whether a file starts with the SQLite file-format signature.
pub fn has_sqlite_magic(path: &Path) -> std::io::Result<bool> {
    let mut file = std::fs::File::open(path)?;
    let mut header = [0u8; 16];
    match file.read_exact(&mut header) {
        Ok(()) => Ok(&header == SQLITE_MAGIC),
        // Shorter than 16 bytes cannot be a database
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => Ok(false),
        Err(e) => Err(e),
    }
}

/// Inspect a database file on disk without mutating it.
///
/// The magic bytes are validated before SQLite is allowed to touch the
/// file, and the connection is opened read-only.
pub fn inspect(path: &Path) -> Result<SchemaSnapshot, InspectError> {
    let unreadable = |reason: String| InspectError::UnreadableDatabase {
        path: path.to_path_buf(),
        reason,
    };

    match has_sqlite_magic(path) {
        Ok(true) => {}
        Ok(false) => return Err(unreadable("missing SQLite file header".into())),
        Err(e) => return Err(unreadable(e.to_string())),
    }

    let conn = Connection::open_with_flags(path, OpenFlags::SQLITE_OPEN_READ_ONLY)
        .map_err(|e| unreadable(e.to_string()))?;

    snapshot_from_conn(&conn).map_err(|e| InspectError::Schema {
        path: path.to_path_buf(),
        source: e,
    })
}

/// Build a snapshot from an already-open connection. Shared between file
/// inspection and the live-database baseline.
pub fn snapshot_from_conn(conn: &Connection) -> rusqlite::Result<SchemaSnapshot> {
    let mut stmt = conn.prepare(
        "SELECT name FROM sqlite_master
         WHERE type = 'table' AND name NOT LIKE 'sqlite_%'
         ORDER BY name",
    )?;
    let names: Vec<String> = stmt
        .query_map([], |row| row.get::<_, String>(0))?
        .collect::<rusqlite::Result<_>>()?;

    let mut tables = Vec::with_capacity(names.len());
    let mut row_counts = BTreeMap::new();
    for name in names {
        let mut col_stmt = conn.prepare(
            "SELECT name, type, \"notnull\", pk FROM pragma_table_info(?)",
        )?;
        let columns: Vec<ColumnInfo> = col_stmt
            .query_map([&name], |row| {
                Ok(ColumnInfo {
                    name: row.get(0)?,
                    decl_type: row.get(1)?,
                    notnull: row.get::<_, i64>(2)? != 0,
                    pk: row.get::<_, i64>(3)? != 0,
                })
            })?
            .collect::<rusqlite::Result<_>>()?;

        row_counts.insert(name.clone(), count_rows(conn, &name));
        tables.push(TableDescriptor { name, columns });
    }

    Ok(SchemaSnapshot::new(tables, row_counts))
}

/// Best-effort row count; a table that fails to count contributes zero
/// rather than aborting the whole analysis.
fn count_rows(conn: &Connection, table: &str) -> i64 {
    let sql = format!("SELECT COUNT(*) FROM \"{}\"", table.replace('"', "\"\""));
    conn.query_row(&sql, [], |row| row.get(0)).unwrap_or(0)
}
