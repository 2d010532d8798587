//! PostgreSQL backend implementation.
//!
//! The external backend supports configuration, statistics, and auditing.
//! File-level backup/restore is SQLite-only and rejected upstream; server
//! backups belong to pg_dump.

use anyhow::Result;
use postgres::NoTls;
use r2d2::Pool;
use r2d2_postgres::PostgresConnectionManager;
use std::collections::BTreeMap;

use super::postgres_schema::POSTGRES_SCHEMA;
use super::seed::{DEFAULT_SETTINGS, PERMISSIONS, ROLE_ADMIN, ROLE_STANDARD};
use super::settings::{Setting, SettingType};
use super::{ActivityDay, TableStat};
use crate::inspect::{ColumnInfo, SchemaSnapshot, TableDescriptor};

const PG_MIGRATIONS: &[&str] = &[
    "ALTER TABLE users ADD COLUMN IF NOT EXISTS theme TEXT NOT NULL DEFAULT 'light'",
];

pub struct PgDb {
    pool: Pool<PostgresConnectionManager<NoTls>>,
    url: String,
}

impl PgDb {
    pub fn open(url: &str, pool_size: u32) -> Result<Self> {
        let manager = PostgresConnectionManager::new(url.parse()?, NoTls);
        let pool = Pool::builder().max_size(pool_size).build(manager)?;
        Ok(Self {
            pool,
            url: url.to_string(),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn initialize(&self) -> Result<()> {
        let mut client = self.pool.get()?;
        client.batch_execute(POSTGRES_SCHEMA)?;
        for migration in PG_MIGRATIONS {
            let _ = client.execute(*migration, &[]);
        }
        seed_defaults_pg(&mut client)?;
        Ok(())
    }

    // ========================================================================
    // Schema / statistics
    // ========================================================================

    pub fn schema_snapshot(&self) -> Result<SchemaSnapshot> {
        let mut client = self.pool.get()?;
        let rows = client.query(
            "SELECT table_name FROM information_schema.tables
             WHERE table_schema = 'public' AND table_type = 'BASE TABLE'
             ORDER BY table_name",
            &[],
        )?;

        let mut tables = Vec::with_capacity(rows.len());
        let mut row_counts = BTreeMap::new();
        for row in rows {
            let name: String = row.get(0);
            let col_rows = client.query(
                "SELECT column_name, data_type, is_nullable
                 FROM information_schema.columns
                 WHERE table_schema = 'public' AND table_name = $1
                 ORDER BY ordinal_position",
                &[&name],
            )?;
            let columns = col_rows
                .iter()
                .map(|r| ColumnInfo {
                    name: r.get(0),
                    decl_type: r.get(1),
                    notnull: r.get::<_, String>(2) == "NO",
                    // primary-key flags are display-only and not reported
                    // by information_schema.columns
                    pk: false,
                })
                .collect();

            let count_sql = format!("SELECT COUNT(*) FROM \"{}\"", name.replace('"', "\"\""));
            let count: i64 = client
                .query_one(&count_sql, &[])
                .map(|r| r.get(0))
                .unwrap_or(0);

            row_counts.insert(name.clone(), count);
            tables.push(TableDescriptor { name, columns });
        }

        Ok(SchemaSnapshot::new(tables, row_counts))
    }

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

    // ========================================================================
    // Settings
    // ========================================================================

    pub fn get_setting(&self, key: &str) -> Result<Option<Setting>> {
        let mut client = self.pool.get()?;
        let row = client.query_opt(
            "SELECT id, key, value, type, description, category, options
             FROM settings WHERE key = $1",
            &[&key],
        )?;
        Ok(row.map(|r| row_to_setting(&r)))
    }

    pub fn all_settings(&self) -> Result<Vec<Setting>> {
        let mut client = self.pool.get()?;
        let rows = client.query(
            "SELECT id, key, value, type, description, category, options
             FROM settings ORDER BY category, key",
            &[],
        )?;
        Ok(rows.iter().map(row_to_setting).collect())
    }

    pub fn upsert_setting(
        &self,
        key: &str,
        value: &str,
        setting_type: SettingType,
        description: &str,
        category: &str,
    ) -> Result<()> {
        let mut client = self.pool.get()?;
        client.execute(
            "INSERT INTO settings (key, value, type, description, category)
             VALUES ($1, $2, $3, $4, $5)
             ON CONFLICT (key) DO UPDATE SET value = EXCLUDED.value",
            &[&key, &value, &setting_type.as_str(), &description, &category],
        )?;
        Ok(())
    }

    // ========================================================================
    // Audit trail
    // ========================================================================

    pub fn log_audit(&self, action: &str, resource: &str, details: &str) -> Result<()> {
        let mut client = self.pool.get()?;
        client.execute(
            "INSERT INTO audit_logs (action, resource, details) VALUES ($1, $2, $3)",
            &[&action, &resource, &details],
        )?;
        Ok(())
    }

    pub fn audit_activity(&self, days: u32) -> Result<Vec<ActivityDay>> {
        use chrono::{Duration, Utc};

        let mut client = self.pool.get()?;
        let today = Utc::now().date_naive();
        let mut result = Vec::with_capacity(days as usize);
        for i in (0..days as i64).rev() {
            let day = today - Duration::days(i);
            let start = format!("{} 00:00:00+00", day.format("%Y-%m-%d"));
            let end = format!("{} 00:00:00+00", (day + Duration::days(1)).format("%Y-%m-%d"));
            let row = client.query_one(
                "SELECT COUNT(*) FROM audit_logs
                 WHERE created_at >= $1::timestamptz AND created_at < $2::timestamptz",
                &[&start, &end],
            )?;
            result.push(ActivityDay {
                date: day.format("%b %d").to_string(),
                count: row.get(0),
            });
        }
        Ok(result)
    }
}

fn row_to_setting(row: &postgres::Row) -> Setting {
    let type_str: String = row.get(3);
    Setting {
        id: row.get(0),
        key: row.get(1),
        value: row.get(2),
        setting_type: SettingType::parse(&type_str),
        description: row.get(4),
        category: row.get(5),
        options: row.get(6),
    }
}

fn seed_defaults_pg(client: &mut postgres::Client) -> Result<()> {
    for (name, description) in PERMISSIONS {
        client.execute(
            "INSERT INTO permissions (name, description) VALUES ($1, $2)
             ON CONFLICT DO NOTHING",
            &[name, description],
        )?;
    }

    client.execute(
        "INSERT INTO roles (name, description) VALUES ($1, $2) ON CONFLICT DO NOTHING",
        &[&ROLE_ADMIN, &"Full system access"],
    )?;
    client.execute(
        "INSERT INTO roles (name, description) VALUES ($1, $2) ON CONFLICT DO NOTHING",
        &[&ROLE_STANDARD, &"Basic read-only access"],
    )?;

    client.execute(
        "INSERT INTO role_permissions (role_id, permission_id)
         SELECT r.id, p.id FROM roles r, permissions p WHERE r.name = $1
         ON CONFLICT DO NOTHING",
        &[&ROLE_ADMIN],
    )?;
    client.execute(
        "INSERT INTO role_permissions (role_id, permission_id)
         SELECT r.id, p.id FROM roles r, permissions p
         WHERE r.name = $1 AND p.name = 'dashboard.view'
         ON CONFLICT DO NOTHING",
        &[&ROLE_STANDARD],
    )?;

    for (key, value, setting_type, description, category, options) in DEFAULT_SETTINGS {
        client.execute(
            "INSERT INTO settings (key, value, type, description, category, options)
             VALUES ($1, $2, $3, $4, $5, $6)
             ON CONFLICT DO NOTHING",
            &[key, value, setting_type, description, category, options],
        )?;
    }

    Ok(())
}
