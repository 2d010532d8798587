//! SQLite backend implementation.

use anyhow::{Context, Result};
use chrono::{Duration, Utc};
use rusqlite::{params, Connection};
use std::path::{Path, PathBuf};

use super::schema::{EXPECTED_COLUMNS, MIGRATIONS, SCHEMA};
use super::seed::seed_defaults;
use super::settings::{Setting, SettingType};
use super::{ActivityDay, TableStat};
use crate::inspect::{snapshot_from_conn, SchemaSnapshot};

pub struct SqliteDb {
    pub(crate) conn: Connection,
    path: PathBuf,
}

impl SqliteDb {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)
            .with_context(|| format!("failed to open database at {}", path.display()))?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        Ok(Self {
            conn,
            path: path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Create missing tables and columns, apply legacy migrations, and
    /// re-seed defaults. Idempotent; existing data is never touched. The
    /// restore orchestrator runs this against freshly restored files.
    pub fn initialize(&self) -> Result<()> {
        self.conn.execute_batch(SCHEMA)?;
        self.heal_columns()?;
        self.run_migrations();
        seed_defaults(&self.conn)?;
        Ok(())
    }

    /// Add any expected column absent from an existing table. CREATE TABLE
    /// IF NOT EXISTS covers missing tables but not columns dropped by an
    /// older backup, so those are patched one ALTER at a time.
    fn heal_columns(&self) -> Result<()> {
        let snapshot = self.schema_snapshot()?;
        for (table, columns) in EXPECTED_COLUMNS {
            let Some(descriptor) = snapshot.table(table) else {
                continue; // just created by SCHEMA, already complete
            };
            for (column, ddl) in *columns {
                if !descriptor.has_column(column) {
                    let sql = format!("ALTER TABLE {table} ADD COLUMN {column} {ddl}");
                    match self.conn.execute(&sql, []) {
                        Ok(_) => tracing::info!(table, column, "added missing column"),
                        Err(e) => tracing::warn!(table, column, error = %e, "column heal failed"),
                    }
                }
            }
        }
        Ok(())
    }

    fn run_migrations(&self) {
        for migration in MIGRATIONS {
            let _ = self.conn.execute(migration, []);
        }
    }

    /// Close the underlying connection. Must be called before the database
    /// file is replaced or copied over; an open handle on some platforms
    /// keeps stale pages alive across the swap.
    pub fn dispose(self) -> Result<()> {
        self.conn
            .close()
            .map_err(|(_, e)| anyhow::anyhow!("failed to close database: {e}"))
    }

    // ========================================================================
    // Schema / statistics
    // ========================================================================

    pub fn schema_snapshot(&self) -> Result<SchemaSnapshot> {
        Ok(snapshot_from_conn(&self.conn)?)
    }

    /// Per-table row counts, largest first.
    pub fn table_row_counts(&self) -> Result<Vec<TableStat>> {
        let snapshot = self.schema_snapshot()?;
        let mut stats: Vec<TableStat> = snapshot
            .row_counts()
            .iter()
            .map(|(name, rows)| TableStat {
                name: name.clone(),
                rows: *rows,
            })
            .collect();
        stats.sort_by(|a, b| b.rows.cmp(&a.rows).then(a.name.cmp(&b.name)));
        Ok(stats)
    }

    pub fn file_size(&self) -> Option<u64> {
        std::fs::metadata(&self.path).map(|m| m.len()).ok()
    }

    // ========================================================================
    // Settings
    // ========================================================================

    pub fn get_setting(&self, key: &str) -> Result<Option<Setting>> {
        let result = self.conn.query_row(
            "SELECT id, key, value, type, description, category, options
             FROM settings WHERE key = ?",
            [key],
            row_to_setting,
        );
        match result {
            Ok(setting) => Ok(Some(setting)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    pub fn all_settings(&self) -> Result<Vec<Setting>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, key, value, type, description, category, options
             FROM settings ORDER BY category, key",
        )?;
        let settings = stmt
            .query_map([], row_to_setting)?
            .collect::<rusqlite::Result<_>>()?;
        Ok(settings)
    }

    /// Upsert a setting. Existing rows keep their declared type and
    /// description; only the value changes.
    pub fn upsert_setting(
        &self,
        key: &str,
        value: &str,
        setting_type: SettingType,
        description: &str,
        category: &str,
    ) -> Result<()> {
        self.conn.execute(
            "INSERT INTO settings (key, value, type, description, category)
             VALUES (?, ?, ?, ?, ?)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            params![key, value, setting_type.as_str(), description, category],
        )?;
        Ok(())
    }

    // ========================================================================
    // Audit trail
    // ========================================================================

    /// Append an audit entry. Attribution (user, IP) is the web layer's
    /// concern and stays empty for operations performed by the core.
    pub fn log_audit(&self, action: &str, resource: &str, details: &str) -> Result<()> {
        self.conn.execute(
            "INSERT INTO audit_logs (action, resource, details, created_at)
             VALUES (?, ?, ?, ?)",
            params![action, resource, details, now_utc()],
        )?;
        Ok(())
    }

    /// Audit entries per day for the last `days` days, oldest first.
    pub fn audit_activity(&self, days: u32) -> Result<Vec<ActivityDay>> {
        let today = Utc::now().date_naive();
        let mut result = Vec::with_capacity(days as usize);
        for i in (0..days as i64).rev() {
            let day = today - Duration::days(i);
            let start = format!("{} 00:00:00", day.format("%Y-%m-%d"));
            let end = format!("{} 00:00:00", (day + Duration::days(1)).format("%Y-%m-%d"));
            let count: i64 = self.conn.query_row(
                "SELECT COUNT(*) FROM audit_logs WHERE created_at >= ? AND created_at < ?",
                params![start, end],
                |row| row.get(0),
            )?;
            result.push(ActivityDay {
                date: day.format("%b %d").to_string(),
                count,
            });
        }
        Ok(result)
    }
}

fn row_to_setting(row: &rusqlite::Row<'_>) -> rusqlite::Result<Setting> {
    let type_str: String = row.get(3)?;
    Ok(Setting {
        id: row.get(0)?,
        key: row.get(1)?,
        value: row.get(2)?,
        setting_type: SettingType::parse(&type_str),
        description: row.get(4)?,
        category: row.get(5)?,
        options: row.get(6)?,
    })
}

fn now_utc() -> String {
    Utc::now().format("%Y-%m-%d %H:%M:%S").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::settings::SettingValue;

    fn open_temp() -> (tempfile::TempDir, SqliteDb) {
        let dir = tempfile::tempdir().unwrap();
        let db = SqliteDb::open(&dir.path().join("test.db")).unwrap();
        db.initialize().unwrap();
        (dir, db)
    }

    #[test]
    fn test_initialize_is_idempotent() {
        let (_dir, db) = open_temp();
        db.initialize().unwrap();
        db.initialize().unwrap();

        let snapshot = db.schema_snapshot().unwrap();
        assert!(snapshot.table_names().contains("users"));
        assert!(snapshot.table_names().contains("service_items"));
    }

    #[test]
    fn test_heal_recreates_dropped_column() {
        let (_dir, db) = open_temp();
        db.conn
            .execute("ALTER TABLE customers DROP COLUMN phone", [])
            .unwrap();

        db.initialize().unwrap();

        let snapshot = db.schema_snapshot().unwrap();
        assert!(snapshot.table("customers").unwrap().has_column("phone"));
    }

    #[test]
    fn test_setting_upsert_and_typed_read() {
        let (_dir, db) = open_temp();
        db.upsert_setting("items_per_page", "50", SettingType::Number, "", "general")
            .unwrap();

        let setting = db.get_setting("items_per_page").unwrap().unwrap();
        // Seeded row declared number; upsert must not clobber the type
        assert_eq!(setting.setting_type, SettingType::Number);
        assert_eq!(setting.typed_value(), SettingValue::Integer(50));
    }

    #[test]
    fn test_audit_entries_show_in_activity() {
        let (_dir, db) = open_temp();
        db.log_audit("backup", "database", "file=test.db").unwrap();
        db.log_audit("restore", "database", "safety_copy=x.db").unwrap();

        let activity = db.audit_activity(7).unwrap();
        assert_eq!(activity.len(), 7);
        assert_eq!(activity.last().unwrap().count, 2);
    }

    #[test]
    fn test_expected_columns_match_schema() {
        // EXPECTED_COLUMNS drives column healing; it must stay in lockstep
        // with the canonical DDL.
        let (_dir, db) = open_temp();
        let snapshot = db.schema_snapshot().unwrap();

        for (table, columns) in EXPECTED_COLUMNS {
            let descriptor = snapshot
                .table(table)
                .unwrap_or_else(|| panic!("{table} missing from SCHEMA"));
            let declared = descriptor.column_names();
            let listed: std::collections::BTreeSet<String> =
                columns.iter().map(|(c, _)| c.to_string()).collect();
            assert_eq!(declared, listed, "column drift in {table}");
        }
    }
}
