//! Point-in-time backup capture for the embedded database file.
//!
//! Backups are full file copies: the live file is copied to a temporary
//! name first and only exposed under its final name once the copy is
//! complete, so a caller can never observe a partially written artifact.

use chrono::Local;
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::db::Database;

/// Filename prefix for every artifact this module produces.
pub const PRODUCT: &str = "localvibe";

#[derive(Debug, Error)]
pub enum BackupError {
    #[error("live database file not found at {}", .0.display())]
    SourceNotFound(PathBuf),

    /// The active connection target is an external server; its native dump
    /// tool (pg_dump) owns backups there.
    #[error("backups are only available for the embedded SQLite backend; use pg_dump for PostgreSQL")]
    UnsupportedBackend,

    #[error("backup copy failed")]
    Io(#[from] std::io::Error),
}

/// A completed full copy of the live database file.
#[derive(Debug, Clone, Serialize)]
pub struct BackupArtifact {
    pub path: PathBuf,
    pub filename: String,
    pub size_bytes: u64,
    pub sha256: String,
    pub created_at: String,
}

/// Capture a consistent copy of the live database into `dest_dir`,
/// named `localvibe_backup_<YYYYMMDD_HHMMSS>.db`.
pub fn capture(live_path: &Path, dest_dir: &Path) -> Result<BackupArtifact, BackupError> {
    capture_as(live_path, dest_dir, "backup")
}

/// Capture the pre-restore safety copy, written next to the live file as
/// `localvibe_pre_restore_<YYYYMMDD_HHMMSS>.db`. Safety copies are kept
/// forever as a manual-recovery fallback; nothing in this crate deletes them.
pub fn capture_safety_copy(live_path: &Path) -> Result<BackupArtifact, BackupError> {
    let dest_dir = live_path.parent().unwrap_or_else(|| Path::new("."));
    capture_as(live_path, dest_dir, "pre_restore")
}

/// Capture the active database, routing through the backend check and
/// recording the download in the audit trail.
pub fn capture_live(db: &Database, dest_dir: &Path) -> Result<BackupArtifact, BackupError> {
    let Some(live_path) = db.sqlite_path().map(Path::to_path_buf) else {
        return Err(BackupError::UnsupportedBackend);
    };

    let artifact = capture(&live_path, dest_dir)?;
    let details = format!("file={} sha256={}", artifact.filename, artifact.sha256);
    if let Err(e) = db.log_audit("backup", "database", &details) {
        tracing::warn!(error = %e, "backup succeeded but audit entry failed");
    }
    Ok(artifact)
}

fn capture_as(live_path: &Path, dest_dir: &Path, kind: &str) -> Result<BackupArtifact, BackupError> {
    if !live_path.is_file() {
        return Err(BackupError::SourceNotFound(live_path.to_path_buf()));
    }
    std::fs::create_dir_all(dest_dir)?;

    let timestamp = Local::now();
    let stem = format!("{PRODUCT}_{kind}_{}", timestamp.format("%Y%m%d_%H%M%S"));

    // Two captures within the same second must not share a name: a restore
    // retried immediately would otherwise overwrite its own safety copy.
    let mut filename = format!("{stem}.db");
    let mut final_path = dest_dir.join(&filename);
    let mut n = 2;
    while final_path.exists() {
        filename = format!("{stem}_{n}.db");
        final_path = dest_dir.join(&filename);
        n += 1;
    }

    let tmp_path = dest_dir.join(format!("{filename}.tmp"));
    let result = write_copy(live_path, &tmp_path, &final_path);
    if result.is_err() {
        let _ = std::fs::remove_file(&tmp_path);
    }
    let sha256 = result?;

    let size_bytes = std::fs::metadata(&final_path)?.len();
    tracing::info!(file = %final_path.display(), size_bytes, "database backup captured");

    Ok(BackupArtifact {
        path: final_path,
        filename,
        size_bytes,
        sha256,
        created_at: timestamp.format("%Y-%m-%d %H:%M:%S").to_string(),
    })
}

fn write_copy(source: &Path, tmp: &Path, dest: &Path) -> Result<String, BackupError> {
    std::fs::copy(source, tmp)?;
    let sha256 = sha256_file(tmp)?;
    std::fs::rename(tmp, dest)?;
    Ok(sha256)
}

fn sha256_file(path: &Path) -> std::io::Result<String> {
    let mut file = std::fs::File::open(path)?;
    let mut hasher = Sha256::new();
    std::io::copy(&mut file, &mut hasher)?;
    Ok(format!("{:x}", hasher.finalize()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inspect;

    fn live_db(dir: &Path) -> PathBuf {
        let path = dir.join("live.db");
        let db = Database::open_sqlite(&path).unwrap();
        db.initialize().unwrap();
        db.dispose().unwrap();
        path
    }

    #[test]
    fn test_capture_missing_source() {
        let dir = tempfile::tempdir().unwrap();
        let err = capture(&dir.path().join("absent.db"), dir.path()).unwrap_err();
        assert!(matches!(err, BackupError::SourceNotFound(_)));
    }

    #[test]
    fn test_capture_produces_named_artifact() {
        let dir = tempfile::tempdir().unwrap();
        let live = live_db(dir.path());
        let out = dir.path().join("backups");

        let artifact = capture(&live, &out).unwrap();
        assert!(artifact.filename.starts_with("localvibe_backup_"));
        assert!(artifact.filename.ends_with(".db"));
        assert!(artifact.path.is_file());
        assert_eq!(artifact.size_bytes, std::fs::metadata(&live).unwrap().len());
        assert_eq!(artifact.sha256.len(), 64);

        // Copy-then-expose: no temporary file left behind
        let leftovers: Vec<_> = std::fs::read_dir(&out)
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().ends_with(".tmp"))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[test]
    fn test_capture_round_trips_through_inspect() {
        let dir = tempfile::tempdir().unwrap();
        let live = live_db(dir.path());

        let before = inspect::inspect(&live).unwrap();
        let artifact = capture(&live, &dir.path().join("backups")).unwrap();
        let after = inspect::inspect(&artifact.path).unwrap();

        assert_eq!(before, after);
    }

    #[test]
    fn test_repeated_captures_get_distinct_names() {
        let dir = tempfile::tempdir().unwrap();
        let live = live_db(dir.path());
        let out = dir.path().join("backups");

        let first = capture(&live, &out).unwrap();
        let second = capture(&live, &out).unwrap();
        assert_ne!(first.filename, second.filename);
        assert!(first.path.is_file());
        assert!(second.path.is_file());
    }

    #[test]
    fn test_safety_copy_lands_next_to_live_file() {
        let dir = tempfile::tempdir().unwrap();
        let live = live_db(dir.path());

        let artifact = capture_safety_copy(&live).unwrap();
        assert_eq!(artifact.path.parent().unwrap(), dir.path());
        assert!(artifact.filename.starts_with("localvibe_pre_restore_"));
    }

    #[test]
    fn test_capture_live_records_audit_entry() {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::open_sqlite(&dir.path().join("live.db")).unwrap();
        db.initialize().unwrap();

        let artifact = capture_live(&db, &dir.path().join("backups")).unwrap();
        assert!(artifact.filename.starts_with("localvibe_backup_"));

        let activity = db.audit_activity(1).unwrap();
        assert_eq!(activity.last().unwrap().count, 1);
    }
}
