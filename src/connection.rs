//! Connection target registry.
//!
//! The live database is either an embedded SQLite file or an external
//! PostgreSQL server. Exactly one target is active at a time; changing it
//! is staged here (settings table, TOML config, .env file) and takes
//! effect at the next process start. Nothing in this module hot-swaps the
//! live connection.

use anyhow::{bail, Context, Result};
use serde::Serialize;
use std::path::{Path, PathBuf};

use crate::config::{Config, DatabaseConfig, DatabaseType};
use crate::db::{mask_db_url, Database, SettingType};

/// URI schemes accepted for external targets.
pub const EXTERNAL_SCHEMES: &[&str] = &["postgresql://", "postgres://"];

const SQLITE_SCHEME: &str = "sqlite:///";

#[cfg(feature = "postgres")]
const VALIDATE_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(5);

/// Where the live database lives. Parsed from and rendered to the same
/// URI form the DATABASE_URI environment entry uses.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionTarget {
    Embedded { path: PathBuf },
    External { url: String },
}

impl ConnectionTarget {
    pub fn parse_uri(uri: &str) -> Result<Self> {
        if let Some(path) = uri.strip_prefix(SQLITE_SCHEME) {
            if path.is_empty() {
                bail!("sqlite URI is missing a file path");
            }
            return Ok(ConnectionTarget::Embedded {
                path: PathBuf::from(path),
            });
        }
        if is_external_uri(uri) {
            return Ok(ConnectionTarget::External {
                url: uri.to_string(),
            });
        }
        bail!("unsupported connection URI scheme: {}", mask_db_url(uri));
    }

    pub fn to_uri(&self) -> String {
        match self {
            ConnectionTarget::Embedded { path } => format!("{SQLITE_SCHEME}{}", path.display()),
            ConnectionTarget::External { url } => url.clone(),
        }
    }

    pub fn backend(&self) -> DatabaseType {
        match self {
            ConnectionTarget::Embedded { .. } => DatabaseType::Sqlite,
            ConnectionTarget::External { .. } => DatabaseType::Postgresql,
        }
    }

    /// Project this target onto a database configuration.
    pub fn apply(&self, config: &mut DatabaseConfig) {
        match self {
            ConnectionTarget::Embedded { path } => {
                config.backend = DatabaseType::Sqlite;
                config.sqlite_path = path.clone();
            }
            ConnectionTarget::External { url } => {
                config.backend = DatabaseType::Postgresql;
                config.postgresql_url = Some(url.clone());
            }
        }
    }
}

pub fn is_external_uri(uri: &str) -> bool {
    EXTERNAL_SCHEMES.iter().any(|scheme| uri.starts_with(scheme))
}

/// Line breaks or NUL bytes in a URI could smuggle extra lines into the
/// env file; reject them before anything is written anywhere.
fn has_control_chars(s: &str) -> bool {
    s.contains(['\n', '\r', '\0'])
}

/// Probe a candidate external target with a short-lived connection.
///
/// Never touches persisted state or the live pool: the probe runs on its
/// own single-connection pool with a hard 5 second timeout. The scheme is
/// checked before any network I/O happens.
#[cfg(feature = "postgres")]
pub fn validate_external(uri: &str) -> Result<()> {
    if !is_external_uri(uri) {
        bail!("URI must start with postgresql://");
    }
    if has_control_chars(uri) {
        bail!("connection URI must not contain newline or null characters");
    }

    let mut pg_config: postgres::Config =
        uri.parse().context("invalid PostgreSQL connection URI")?;
    pg_config.connect_timeout(VALIDATE_TIMEOUT);

    let manager = r2d2_postgres::PostgresConnectionManager::new(pg_config, postgres::NoTls);
    let pool = r2d2::Pool::builder()
        .max_size(1)
        .connection_timeout(VALIDATE_TIMEOUT)
        .build(manager)
        .context("connection failed")?;

    let mut client = pool.get().context("connection failed")?;
    client.query_one("SELECT 1", &[]).context("test query failed")?;

    tracing::debug!(url = %mask_db_url(uri), "connection test succeeded");
    Ok(())
}

/// Result of staging a new connection target.
#[derive(Debug, Clone, Serialize)]
pub struct SaveOutcome {
    /// Whether the env file existed and its DATABASE_URI entry was written.
    /// When false the operator must update it by hand.
    pub env_updated: bool,
    /// Always true: the staged target only takes effect after the process
    /// restarts. The caller must surface this rather than pretend the
    /// connection switched.
    pub restart_required: bool,
}

/// Stage a new connection target: upsert the pending choice into the
/// settings table, project it onto `config`, and rewrite the env file's
/// DATABASE_URI entry. The caller persists the updated `Config` and
/// communicates the required restart.
pub fn save_target(
    db: &Database,
    config: &mut Config,
    target: &ConnectionTarget,
) -> Result<SaveOutcome> {
    let uri = target.to_uri();
    if has_control_chars(&uri) {
        bail!("connection URI must not contain newline or null characters");
    }
    if let ConnectionTarget::External { url } = target {
        if !is_external_uri(url) {
            bail!("URI must start with postgresql://");
        }
    }

    target.apply(&mut config.database);

    db.upsert_setting(
        "db_type",
        target.backend().as_str(),
        SettingType::Text,
        "Active database type",
        "database",
    )?;
    let external_uri = match target {
        ConnectionTarget::External { url } => url.as_str(),
        ConnectionTarget::Embedded { .. } => "",
    };
    db.upsert_setting(
        "external_db_uri",
        external_uri,
        SettingType::Text,
        "External database connection URI",
        "database",
    )?;

    let env_updated = update_env_uri(&config.env_file, &uri)?;

    db.log_audit(
        "updated",
        "database_config",
        &format!("db_type={}", target.backend().as_str()),
    )?;
    tracing::info!(
        backend = target.backend().as_str(),
        env_updated,
        "connection target staged; restart required to apply"
    );

    Ok(SaveOutcome {
        env_updated,
        restart_required: true,
    })
}

/// Rewrite the DATABASE_URI entry of an env file, preserving every other
/// line and appending the entry when absent. Returns false without
/// touching anything if the file does not exist.
pub fn update_env_uri(env_path: &Path, new_uri: &str) -> Result<bool> {
    if has_control_chars(new_uri) {
        bail!("connection URI must not contain newline or null characters");
    }
    if !env_path.is_file() {
        return Ok(false);
    }

    let content = std::fs::read_to_string(env_path)
        .with_context(|| format!("reading {}", env_path.display()))?;
    let mut lines: Vec<String> = Vec::new();
    let mut updated = false;
    for line in content.lines() {
        if line.starts_with("DATABASE_URI=") {
            lines.push(format!("DATABASE_URI={new_uri}"));
            updated = true;
        } else {
            lines.push(line.to_string());
        }
    }
    if !updated {
        lines.push(format!("DATABASE_URI={new_uri}"));
    }

    std::fs::write(env_path, lines.join("\n") + "\n")
        .with_context(|| format!("writing {}", env_path.display()))?;
    Ok(true)
}

/// Read the DATABASE_URI entry from an env file, if any.
pub fn read_env_uri(env_path: &Path) -> Option<String> {
    let content = std::fs::read_to_string(env_path).ok()?;
    content
        .lines()
        .find_map(|line| line.strip_prefix("DATABASE_URI="))
        .map(|uri| uri.trim().to_string())
        .filter(|uri| !uri.is_empty())
}

/// Resolve the target to use at process start. The process environment
/// wins over the env file, which wins over the TOML config.
pub fn startup_target(config: &Config) -> ConnectionTarget {
    if let Ok(uri) = std::env::var("DATABASE_URI") {
        match ConnectionTarget::parse_uri(&uri) {
            Ok(target) => return target,
            Err(e) => tracing::warn!(error = %e, "ignoring DATABASE_URI environment variable"),
        }
    }
    if let Some(uri) = read_env_uri(&config.env_file) {
        match ConnectionTarget::parse_uri(&uri) {
            Ok(target) => return target,
            Err(e) => tracing::warn!(error = %e, "ignoring DATABASE_URI env file entry"),
        }
    }

    match config.database.backend {
        DatabaseType::Postgresql => match &config.database.postgresql_url {
            Some(url) => ConnectionTarget::External { url: url.clone() },
            None => ConnectionTarget::Embedded {
                path: config.database.sqlite_path.clone(),
            },
        },
        DatabaseType::Sqlite => ConnectionTarget::Embedded {
            path: config.database.sqlite_path.clone(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_uri_round_trip() {
        let embedded = ConnectionTarget::parse_uri("sqlite:///var/lib/localvibe/app.db").unwrap();
        assert_eq!(
            embedded,
            ConnectionTarget::Embedded {
                path: PathBuf::from("var/lib/localvibe/app.db")
            }
        );
        assert_eq!(embedded.to_uri(), "sqlite:///var/lib/localvibe/app.db");

        let external = ConnectionTarget::parse_uri("postgresql://vibe@db.local/lv").unwrap();
        assert_eq!(external.backend(), DatabaseType::Postgresql);
    }

    #[test]
    fn test_parse_uri_rejects_unknown_schemes() {
        assert!(ConnectionTarget::parse_uri("mysql://db.local/lv").is_err());
        assert!(ConnectionTarget::parse_uri("sqlite:///").is_err());
        assert!(ConnectionTarget::parse_uri("just-a-path").is_err());
    }

    #[cfg(feature = "postgres")]
    #[test]
    fn test_validate_external_rejects_scheme_before_io() {
        let err = validate_external("mysql://db.local/lv").unwrap_err();
        assert!(err.to_string().contains("postgresql://"));
    }

    #[test]
    fn test_update_env_preserves_other_lines() {
        let dir = tempfile::tempdir().unwrap();
        let env = dir.path().join(".env");
        std::fs::write(&env, "SECRET_KEY=abc\nDATABASE_URI=sqlite:///old.db\nDEBUG=1\n").unwrap();

        let updated = update_env_uri(&env, "postgresql://vibe@db.local/lv").unwrap();
        assert!(updated);

        let content = std::fs::read_to_string(&env).unwrap();
        assert_eq!(
            content,
            "SECRET_KEY=abc\nDATABASE_URI=postgresql://vibe@db.local/lv\nDEBUG=1\n"
        );
    }

    #[test]
    fn test_update_env_appends_when_absent() {
        let dir = tempfile::tempdir().unwrap();
        let env = dir.path().join(".env");
        std::fs::write(&env, "SECRET_KEY=abc\n").unwrap();

        update_env_uri(&env, "sqlite:///new.db").unwrap();
        let content = std::fs::read_to_string(&env).unwrap();
        assert!(content.ends_with("DATABASE_URI=sqlite:///new.db\n"));
    }

    #[test]
    fn test_update_env_missing_file_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let updated = update_env_uri(&dir.path().join(".env"), "sqlite:///x.db").unwrap();
        assert!(!updated);
    }

    #[test]
    fn test_update_env_rejects_control_characters() {
        let dir = tempfile::tempdir().unwrap();
        let env = dir.path().join(".env");
        std::fs::write(&env, "DATABASE_URI=sqlite:///old.db\n").unwrap();

        for bad in ["evil\nINJECTED=1", "evil\rX=1", "evil\0"] {
            assert!(update_env_uri(&env, bad).is_err());
        }
        // Nothing was written
        let content = std::fs::read_to_string(&env).unwrap();
        assert_eq!(content, "DATABASE_URI=sqlite:///old.db\n");
    }

    #[test]
    fn test_save_target_stages_everything() {
        let dir = tempfile::tempdir().unwrap();
        let env = dir.path().join(".env");
        std::fs::write(&env, "SECRET_KEY=abc\n").unwrap();

        let db = Database::open_sqlite(&dir.path().join("live.db")).unwrap();
        db.initialize().unwrap();

        let mut config = Config::default();
        config.env_file = env.clone();

        let target = ConnectionTarget::External {
            url: "postgresql://vibe@db.local/lv".to_string(),
        };
        let outcome = save_target(&db, &mut config, &target).unwrap();
        assert!(outcome.env_updated);
        assert!(outcome.restart_required);

        // Pending choice is visible in the settings table
        let db_type = db.get_setting("db_type").unwrap().unwrap();
        assert_eq!(db_type.value.as_deref(), Some("postgresql"));
        let ext = db.get_setting("external_db_uri").unwrap().unwrap();
        assert_eq!(ext.value.as_deref(), Some("postgresql://vibe@db.local/lv"));

        // Config mutated in memory, env file rewritten
        assert_eq!(config.database.backend, DatabaseType::Postgresql);
        assert!(std::fs::read_to_string(&env)
            .unwrap()
            .contains("DATABASE_URI=postgresql://vibe@db.local/lv"));

        // The change is audited
        assert_eq!(db.audit_activity(1).unwrap().last().unwrap().count, 1);
    }

    #[test]
    fn test_save_target_rejects_control_characters() {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::open_sqlite(&dir.path().join("live.db")).unwrap();
        db.initialize().unwrap();
        let mut config = Config::default();
        config.env_file = dir.path().join(".env");

        let target = ConnectionTarget::External {
            url: "postgresql://vibe@db.local/lv\nINJECTED=1".to_string(),
        };
        assert!(save_target(&db, &mut config, &target).is_err());
        assert!(db.get_setting("db_type").unwrap().is_none());
    }

    #[test]
    fn test_startup_target_prefers_env_file_over_config() {
        let dir = tempfile::tempdir().unwrap();
        let env = dir.path().join(".env");
        std::fs::write(&env, "DATABASE_URI=sqlite:///from-env.db\n").unwrap();

        let mut config = Config::default();
        config.env_file = env;
        config.database.backend = DatabaseType::Postgresql;
        config.database.postgresql_url = Some("postgresql://vibe@db.local/lv".into());

        let target = startup_target(&config);
        assert_eq!(
            target,
            ConnectionTarget::Embedded {
                path: PathBuf::from("from-env.db")
            }
        );
    }

    #[test]
    fn test_startup_target_falls_back_to_config() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.env_file = dir.path().join("missing.env");
        config.database.sqlite_path = PathBuf::from("fallback.db");

        let target = startup_target(&config);
        assert_eq!(
            target,
            ConnectionTarget::Embedded {
                path: PathBuf::from("fallback.db")
            }
        );
    }
}
