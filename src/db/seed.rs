//! Default data the application needs to boot.
//!
//! Seeding is idempotent (INSERT OR IGNORE) so the restore orchestrator
//! can re-run it against a freshly restored database without overwriting
//! rows the backup brought along. User accounts are never seeded here;
//! provisioning the first admin is the web layer's job.

use anyhow::Result;
use rusqlite::{params, Connection};

/// Permission catalog. Names follow the `resource.action` convention.
pub const PERMISSIONS: &[(&str, &str)] = &[
    ("admin.full_access", "Full admin panel access"),
    ("dashboard.view", "View dashboard"),
    ("users.view", "View user list"),
    ("users.create", "Create users"),
    ("users.edit", "Edit users"),
    ("users.delete", "Delete users"),
    ("roles.view", "View roles"),
    ("roles.create", "Create roles"),
    ("roles.edit", "Edit roles"),
    ("roles.delete", "Delete roles"),
    ("settings.view", "View settings"),
    ("settings.edit", "Edit settings"),
    ("audit.view", "View audit log"),
    ("database.view", "View database management"),
    ("database.backup", "Download database backups"),
    ("database.configure", "Configure database connection"),
];

pub const ROLE_ADMIN: &str = "Administrator";
pub const ROLE_STANDARD: &str = "Standard User";

/// Default settings: (key, value, type, description, category, options).
pub const DEFAULT_SETTINGS: &[(&str, &str, &str, &str, &str, Option<&str>)] = &[
    (
        "app_name",
        "LocalVibe",
        "text",
        "Application display name",
        "general",
        None,
    ),
    (
        "app_tagline",
        "Your Local Network Hub",
        "text",
        "Tagline shown on the login page",
        "general",
        None,
    ),
    (
        "app_icon",
        "bi-lightning-charge-fill",
        "text",
        "Bootstrap Icons class for the sidebar logo",
        "appearance",
        None,
    ),
    (
        "footer_text",
        "LocalVibe — Built with Rust",
        "text",
        "Footer copyright text",
        "general",
        None,
    ),
    (
        "primary_color",
        "#2563eb",
        "color",
        "Primary brand/accent colour",
        "appearance",
        None,
    ),
    (
        "default_theme",
        "light",
        "select",
        "Default colour theme for new users",
        "appearance",
        Some(r#"["light","dark","terminal"]"#),
    ),
    (
        "allow_registration",
        "false",
        "boolean",
        "Allow new visitors to self-register",
        "security",
        None,
    ),
    (
        "maintenance_mode",
        "false",
        "boolean",
        "Show maintenance page to non-admin users",
        "general",
        None,
    ),
    (
        "items_per_page",
        "20",
        "number",
        "Rows shown per page in data tables",
        "general",
        None,
    ),
    (
        "session_timeout",
        "480",
        "number",
        "Session idle timeout in minutes (0 = never)",
        "security",
        None,
    ),
];

/// Seed the permission catalog, default roles with their grants, and
/// default settings. Existing rows are left untouched.
pub fn seed_defaults(conn: &Connection) -> Result<()> {
    for (name, description) in PERMISSIONS {
        conn.execute(
            "INSERT OR IGNORE INTO permissions (name, description) VALUES (?, ?)",
            params![name, description],
        )?;
    }

    conn.execute(
        "INSERT OR IGNORE INTO roles (name, description) VALUES (?, ?)",
        params![ROLE_ADMIN, "Full system access"],
    )?;
    conn.execute(
        "INSERT OR IGNORE INTO roles (name, description) VALUES (?, ?)",
        params![ROLE_STANDARD, "Basic read-only access"],
    )?;

    // Administrator holds every permission, Standard User only the dashboard
    conn.execute(
        "INSERT OR IGNORE INTO role_permissions (role_id, permission_id)
         SELECT r.id, p.id FROM roles r, permissions p WHERE r.name = ?",
        params![ROLE_ADMIN],
    )?;
    conn.execute(
        "INSERT OR IGNORE INTO role_permissions (role_id, permission_id)
         SELECT r.id, p.id FROM roles r, permissions p
         WHERE r.name = ? AND p.name = 'dashboard.view'",
        params![ROLE_STANDARD],
    )?;

    for (key, value, setting_type, description, category, options) in DEFAULT_SETTINGS {
        conn.execute(
            "INSERT OR IGNORE INTO settings (key, value, type, description, category, options)
             VALUES (?, ?, ?, ?, ?, ?)",
            params![key, value, setting_type, description, category, options],
        )?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::SCHEMA;

    fn fresh_conn() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(SCHEMA).unwrap();
        conn
    }

    fn count(conn: &Connection, table: &str) -> i64 {
        conn.query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |r| r.get(0))
            .unwrap()
    }

    #[test]
    fn test_seed_populates_catalog() {
        let conn = fresh_conn();
        seed_defaults(&conn).unwrap();

        assert_eq!(count(&conn, "permissions"), PERMISSIONS.len() as i64);
        assert_eq!(count(&conn, "roles"), 2);
        assert_eq!(count(&conn, "settings"), DEFAULT_SETTINGS.len() as i64);
        // Administrator gets the full catalog, Standard User one grant
        assert_eq!(count(&conn, "role_permissions"), PERMISSIONS.len() as i64 + 1);
        // No user accounts are ever seeded
        assert_eq!(count(&conn, "users"), 0);
    }

    #[test]
    fn test_seed_is_idempotent() {
        let conn = fresh_conn();
        seed_defaults(&conn).unwrap();
        seed_defaults(&conn).unwrap();

        assert_eq!(count(&conn, "permissions"), PERMISSIONS.len() as i64);
        assert_eq!(count(&conn, "settings"), DEFAULT_SETTINGS.len() as i64);
    }

    #[test]
    fn test_seed_never_overwrites_existing_rows() {
        let conn = fresh_conn();
        conn.execute(
            "INSERT INTO settings (key, value, type) VALUES ('app_name', 'Acme Invoicing', 'text')",
            [],
        )
        .unwrap();

        seed_defaults(&conn).unwrap();

        let value: String = conn
            .query_row("SELECT value FROM settings WHERE key = 'app_name'", [], |r| r.get(0))
            .unwrap();
        assert_eq!(value, "Acme Invoicing");
    }
}
