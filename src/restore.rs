//! In-place restore of the live database from an uploaded backup file.
//!
//! A restore walks a strictly ordered sequence of steps:
//!
//! ```text
//! Uploaded -> MagicByteValidated -> Analyzed -> [Incompatible: abort]
//!          -> SafetyCopyTaken -> Swapped -> SchemaHealed -> Committed
//!                                        \-> (failure) -> RolledBack
//! ```
//!
//! Everything before the swap can abort for free; everything after it is
//! covered by the safety copy taken right before. This module is the only
//! code allowed to replace or delete the live database file.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use thiserror::Error;

use anyhow::Context;

use crate::backup::{self, BackupArtifact, BackupError};
use crate::compat::{self, CompatibilityReport, CompatibilityTier};
use crate::db::{Database, CRITICAL_TABLES};
use crate::inspect::{self, InspectError};

#[derive(Debug, Error)]
pub enum RestoreError {
    /// The upload does not carry the SQLite file-format signature.
    #[error("uploaded file is not a SQLite database")]
    NotAnEmbeddedDatabase,

    /// Restores are destructive and require an explicit confirmation flag.
    #[error("restore requires explicit confirmation")]
    ConfirmationRequired,

    /// The classifier rejected the upload; the full report is attached so
    /// the caller can render what exactly is missing.
    #[error("{}", .0.summary)]
    Incompatible(Box<CompatibilityReport>),

    /// Restores are serialized; a second attempt while one runs is refused.
    #[error("another restore is already in progress")]
    RestoreInProgress,

    /// Only the embedded SQLite backend supports file-level restore.
    #[error("restore requires the embedded SQLite backend; restore external servers with their native tools")]
    UnsupportedBackend,

    #[error("failed to analyze uploaded file")]
    Analysis(#[source] anyhow::Error),

    /// Taking the pre-restore safety copy failed. The live database has
    /// not been altered in any way.
    #[error("could not take pre-restore safety copy")]
    SafetyCopyFailed(#[source] BackupError),

    /// The live handle refused to close before the swap. The live database
    /// has not been altered.
    #[error("could not release the live database handle")]
    DisposeFailed(#[source] anyhow::Error),

    /// The restore failed after the swap and the live file was restored
    /// from the safety copy.
    #[error("restore failed and the live database was rolled back from {}", .safety_copy.display())]
    RolledBack {
        safety_copy: PathBuf,
        #[source]
        source: anyhow::Error,
    },

    /// Both the restore and the rollback failed. Operator escalation:
    /// the live file must be recovered manually from the safety copy.
    #[error(
        "restore failed AND rollback failed; recover manually from safety copy at {} \
         (restore error: {restore_error}; rollback error: {rollback_error})",
        .safety_copy.display()
    )]
    DoubleFault {
        safety_copy: PathBuf,
        restore_error: String,
        rollback_error: String,
    },
}

/// Outcome of a committed restore. The pre-swap live handle was consumed;
/// `db` is a fresh handle onto the restored file.
pub struct RestoreSuccess {
    pub db: Database,
    pub safety_copy: PathBuf,
    pub safety_copy_name: String,
    pub analysis: CompatibilityReport,
}

static RESTORE_ACTIVE: AtomicBool = AtomicBool::new(false);

/// Held for the duration of one restore attempt. Concurrent attempts fail
/// fast instead of interleaving.
struct RestoreGuard;

impl RestoreGuard {
    fn acquire() -> Result<Self, RestoreError> {
        if RESTORE_ACTIVE
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
        {
            Ok(Self)
        } else {
            Err(RestoreError::RestoreInProgress)
        }
    }
}

impl Drop for RestoreGuard {
    fn drop(&mut self) {
        RESTORE_ACTIVE.store(false, Ordering::SeqCst);
    }
}

/// Analyze an uploaded backup against the live schema.
///
/// Read-only and side-effect free: safe to call repeatedly, touches
/// neither the upload nor the live database. Returns the report for every
/// tier, including `Incompatible`.
pub fn analyze_upload(db: &Database, upload: &Path) -> Result<CompatibilityReport, RestoreError> {
    validate_magic(upload)?;
    analyze(db, upload)
}

/// Run the full restore state machine.
///
/// Consumes the live handle: on success a fresh handle onto the restored
/// database is returned; on any error the handle has been released and the
/// caller reopens with [`Database::open`]. Errors up to and including
/// `SafetyCopyFailed` leave the live database untouched.
pub fn restore_upload(
    db: Database,
    upload: &Path,
    confirmed: bool,
) -> Result<RestoreSuccess, RestoreError> {
    restore_inner(db, upload, confirmed, |db| db.initialize())
}

fn restore_inner(
    db: Database,
    upload: &Path,
    confirmed: bool,
    heal: impl FnOnce(&Database) -> anyhow::Result<()>,
) -> Result<RestoreSuccess, RestoreError> {
    let _guard = RestoreGuard::acquire()?;

    let Some(live_path) = db.sqlite_path().map(Path::to_path_buf) else {
        return Err(RestoreError::UnsupportedBackend);
    };

    // Uploaded -> MagicByteValidated
    validate_magic(upload)?;

    // Destructive from here on: require the explicit flag before doing
    // any further work.
    if !confirmed {
        return Err(RestoreError::ConfirmationRequired);
    }

    // MagicByteValidated -> Analyzed (the upload only; live file untouched)
    let analysis = analyze(&db, upload)?;
    if analysis.tier == CompatibilityTier::Incompatible {
        tracing::warn!(summary = %analysis.summary, "restore aborted: incompatible upload");
        return Err(RestoreError::Incompatible(Box::new(analysis)));
    }

    // Analyzed -> SafetyCopyTaken
    let safety = backup::capture_safety_copy(&live_path).map_err(RestoreError::SafetyCopyFailed)?;
    tracing::info!(safety_copy = %safety.path.display(), "pre-restore safety copy taken");

    // SafetyCopyTaken -> Swapped: the live handle must be closed before
    // the file underneath it is replaced.
    db.dispose().map_err(RestoreError::DisposeFailed)?;

    let healed = swap_in(upload, &live_path).and_then(|_| {
        // Swapped -> SchemaHealed
        let new_db = Database::open_sqlite(&live_path)
            .context("reopening restored database")?;
        heal(&new_db).context("schema heal after swap")?;
        Ok(new_db)
    });

    match healed {
        Ok(new_db) => {
            // SchemaHealed -> Committed
            let details = format!("safety_copy={}", safety.filename);
            if let Err(e) = new_db.log_audit("restore", "database", &details) {
                tracing::warn!(error = %e, "restore committed but audit entry failed");
            }
            tracing::info!(safety_copy = %safety.filename, "database restore committed");
            Ok(RestoreSuccess {
                db: new_db,
                safety_copy: safety.path.clone(),
                safety_copy_name: safety.filename,
                analysis,
            })
        }
        Err(restore_error) => roll_back(&live_path, &safety, restore_error),
    }
}

fn validate_magic(upload: &Path) -> Result<(), RestoreError> {
    match inspect::has_sqlite_magic(upload) {
        Ok(true) => Ok(()),
        _ => Err(RestoreError::NotAnEmbeddedDatabase),
    }
}

fn analyze(db: &Database, upload: &Path) -> Result<CompatibilityReport, RestoreError> {
    let foreign = inspect::inspect(upload).map_err(|e| match e {
        InspectError::UnreadableDatabase { .. } => RestoreError::NotAnEmbeddedDatabase,
        other => RestoreError::Analysis(other.into()),
    })?;
    let expected = db.schema_snapshot().map_err(RestoreError::Analysis)?;
    Ok(compat::classify(&foreign, &expected, CRITICAL_TABLES))
}

/// Copy the upload over the live path. The only irreversible step.
fn swap_in(upload: &Path, live_path: &Path) -> anyhow::Result<()> {
    remove_sidecars(live_path);
    std::fs::copy(upload, live_path)
        .with_context(|| format!("copying upload over {}", live_path.display()))?;
    Ok(())
}

/// Stale WAL/SHM/journal files from the previous database must not be
/// replayed into the file that replaces it.
fn remove_sidecars(live_path: &Path) {
    for suffix in ["-wal", "-shm", "-journal"] {
        let mut sidecar = live_path.as_os_str().to_os_string();
        sidecar.push(suffix);
        let sidecar = PathBuf::from(sidecar);
        if sidecar.exists() {
            let _ = std::fs::remove_file(&sidecar);
        }
    }
}

fn roll_back(
    live_path: &Path,
    safety: &BackupArtifact,
    restore_error: anyhow::Error,
) -> Result<RestoreSuccess, RestoreError> {
    tracing::error!(
        error = %format!("{restore_error:#}"),
        safety_copy = %safety.path.display(),
        "restore failed after swap; rolling back"
    );
    remove_sidecars(live_path);
    match std::fs::copy(&safety.path, live_path) {
        Ok(_) => Err(RestoreError::RolledBack {
            safety_copy: safety.path.clone(),
            source: restore_error,
        }),
        Err(rollback_error) => Err(RestoreError::DoubleFault {
            safety_copy: safety.path.clone(),
            restore_error: format!("{restore_error:#}"),
            rollback_error: rollback_error.to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rusqlite::Connection;
    use std::sync::{Mutex, MutexGuard};

    // The restore lock is process-wide; tests that exercise it must not
    // overlap or they would see each other as "in progress".
    static TEST_LOCK: Mutex<()> = Mutex::new(());

    fn serial() -> MutexGuard<'static, ()> {
        TEST_LOCK.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn live_database(dir: &Path) -> (PathBuf, Database) {
        let path = dir.join("live.db");
        let db = Database::open_sqlite(&path).unwrap();
        db.initialize().unwrap();
        db.log_audit("login", "user", "fixture").unwrap();
        (path, db)
    }

    /// A complete, compatible backup file carrying one marker customer.
    fn backup_file(dir: &Path, marker: &str) -> PathBuf {
        let path = dir.join("upload.db");
        let db = Database::open_sqlite(&path).unwrap();
        db.initialize().unwrap();
        db.dispose().unwrap();
        let conn = Connection::open(&path).unwrap();
        conn.execute("INSERT INTO customers (name) VALUES (?)", [marker])
            .unwrap();
        drop(conn);
        path
    }

    fn customer_names(path: &Path) -> Vec<String> {
        let conn = Connection::open(path).unwrap();
        let mut stmt = conn.prepare("SELECT name FROM customers ORDER BY name").unwrap();
        let names = stmt
            .query_map([], |r| r.get(0))
            .unwrap()
            .collect::<rusqlite::Result<_>>()
            .unwrap();
        names
    }

    #[test]
    fn test_rejects_upload_without_magic() {
        let _s = serial();
        let dir = tempfile::tempdir().unwrap();
        let (live, db) = live_database(dir.path());
        let upload = dir.path().join("junk.db");
        std::fs::write(&upload, b"not a database at all").unwrap();

        let before = std::fs::read(&live).unwrap();
        let err = restore_upload(db, &upload, true).map(|_| ()).unwrap_err();
        assert!(matches!(err, RestoreError::NotAnEmbeddedDatabase));
        assert_eq!(std::fs::read(&live).unwrap(), before);
    }

    #[test]
    fn test_requires_confirmation() {
        let _s = serial();
        let dir = tempfile::tempdir().unwrap();
        let (_live, db) = live_database(dir.path());
        let upload = backup_file(dir.path(), "Acme");

        let err = restore_upload(db, &upload, false).map(|_| ()).unwrap_err();
        assert!(matches!(err, RestoreError::ConfirmationRequired));
    }

    #[test]
    fn test_incompatible_upload_is_a_hard_stop() {
        let _s = serial();
        let dir = tempfile::tempdir().unwrap();
        let (live, db) = live_database(dir.path());

        // Upload missing the users table entirely
        let upload = dir.path().join("broken.db");
        let conn = Connection::open(&upload).unwrap();
        conn.execute_batch(
            "CREATE TABLE settings (id INTEGER PRIMARY KEY, key TEXT, value TEXT);
             CREATE TABLE roles (id INTEGER PRIMARY KEY, name TEXT);",
        )
        .unwrap();
        drop(conn);

        let before = std::fs::read(&live).unwrap();
        let err = restore_upload(db, &upload, true).map(|_| ()).unwrap_err();
        match err {
            RestoreError::Incompatible(report) => {
                assert_eq!(report.tier, CompatibilityTier::Incompatible);
                assert!(report.summary.contains("users"));
            }
            other => panic!("expected Incompatible, got {other:?}"),
        }
        // No file on disk was touched, no safety copy taken
        assert_eq!(std::fs::read(&live).unwrap(), before);
        let safety_copies: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().contains("pre_restore"))
            .collect();
        assert!(safety_copies.is_empty());
    }

    #[test]
    fn test_successful_restore_swaps_and_audits() {
        let _s = serial();
        let dir = tempfile::tempdir().unwrap();
        let (live, db) = live_database(dir.path());
        let upload = backup_file(dir.path(), "Backup Co");

        let success = restore_upload(db, &upload, true).unwrap();
        assert!(success.safety_copy.is_file());
        assert!(success.safety_copy_name.starts_with("localvibe_pre_restore_"));
        assert_eq!(success.analysis.tier, CompatibilityTier::Compatible);

        // Live file now carries the backup's data
        assert_eq!(customer_names(&live), vec!["Backup Co"]);

        // The committed restore is in the audit trail of the new database
        let activity = success.db.audit_activity(1).unwrap();
        assert!(activity.last().unwrap().count >= 1);
    }

    #[test]
    fn test_restore_is_idempotent_with_distinct_safety_copies() {
        let _s = serial();
        let dir = tempfile::tempdir().unwrap();
        let (live, db) = live_database(dir.path());
        let upload = backup_file(dir.path(), "Backup Co");

        let first = restore_upload(db, &upload, true).unwrap();
        let first_snapshot = first.db.schema_snapshot().unwrap();
        let first_copy = first.safety_copy.clone();

        let second = restore_upload(first.db, &upload, true).unwrap();
        let second_snapshot = second.db.schema_snapshot().unwrap();

        assert_eq!(first_snapshot, second_snapshot);
        assert_eq!(customer_names(&live), vec!["Backup Co"]);
        assert_ne!(first_copy, second.safety_copy);
        assert!(first_copy.is_file());
        assert!(second.safety_copy.is_file());
    }

    #[test]
    fn test_rollback_restores_pre_restore_bytes() {
        let _s = serial();
        let dir = tempfile::tempdir().unwrap();
        let (live, db) = live_database(dir.path());
        let upload = backup_file(dir.path(), "Backup Co");

        let before = std::fs::read(&live).unwrap();
        let err = restore_inner(db, &upload, true, |_| anyhow::bail!("disk full"))
            .map(|_| ())
            .unwrap_err();

        match &err {
            RestoreError::RolledBack { safety_copy, .. } => {
                assert!(safety_copy.is_file());
                assert!(err.to_string().contains("pre_restore"));
            }
            other => panic!("expected RolledBack, got {other:?}"),
        }
        assert_eq!(std::fs::read(&live).unwrap(), before);
    }

    #[test]
    fn test_double_fault_names_the_safety_copy() {
        let _s = serial();
        let dir = tempfile::tempdir().unwrap();
        let live_dir = dir.path().to_path_buf();
        let (_live, db) = live_database(dir.path());
        let upload = backup_file(dir.path(), "Backup Co");

        let err = restore_inner(db, &upload, true, move |_| {
            // Destroy the safety copy so the rollback has nothing to
            // restore from, then fail the heal step.
            for entry in std::fs::read_dir(&live_dir)?.filter_map(|e| e.ok()) {
                if entry.file_name().to_string_lossy().contains("pre_restore") {
                    std::fs::remove_file(entry.path())?;
                }
            }
            anyhow::bail!("heal exploded")
        })
        .map(|_| ())
        .unwrap_err();

        match &err {
            RestoreError::DoubleFault {
                safety_copy,
                restore_error,
                rollback_error,
            } => {
                let message = err.to_string();
                assert!(message.contains(&safety_copy.display().to_string()));
                assert!(restore_error.contains("heal exploded"));
                assert!(!rollback_error.is_empty());
            }
            other => panic!("expected DoubleFault, got {other:?}"),
        }
    }

    #[test]
    fn test_concurrent_restore_is_rejected() {
        let _s = serial();
        let dir = tempfile::tempdir().unwrap();
        let (_live, db) = live_database(dir.path());
        let upload = backup_file(dir.path(), "Backup Co");

        let _held = RestoreGuard::acquire().unwrap();
        let err = restore_upload(db, &upload, true).map(|_| ()).unwrap_err();
        assert!(matches!(err, RestoreError::RestoreInProgress));
    }

    #[test]
    fn test_analyze_is_repeatable_and_side_effect_free() {
        let _s = serial();
        let dir = tempfile::tempdir().unwrap();
        let (_live, db) = live_database(dir.path());
        let upload = backup_file(dir.path(), "Backup Co");

        let upload_bytes = std::fs::read(&upload).unwrap();
        let first = analyze_upload(&db, &upload).unwrap();
        let second = analyze_upload(&db, &upload).unwrap();

        assert_eq!(first, second);
        assert_eq!(first.tier, CompatibilityTier::Compatible);
        assert_eq!(std::fs::read(&upload).unwrap(), upload_bytes);
    }
}
