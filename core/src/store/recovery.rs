use std::path::{Path, PathBuf};

use chrono::Utc;

use crate::error::Result;
use crate::models::BackupInfo;

/// Which rung of the recovery ladder ultimately succeeded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryOutcome {
    Reindex,
    Vacuum,
    VacuumInto,
    BackupRestore,
    EmptyDatabase,
}

async fn quick_check(path: &Path) -> Result<bool> {
    let db = libsql::Builder::new_local(path.to_string_lossy().to_string())
        .build()
        .await?;
    let conn = db.connect()?;
    let mut rows = conn.query("PRAGMA quick_check", ()).await?;
    match rows.next().await? {
        Some(row) => {
            let result: String = row.get(0)?;
            Ok(result == "ok")
        }
        None => Ok(false),
    }
}

async fn try_reindex(path: &Path) -> Result<bool> {
    let db = libsql::Builder::new_local(path.to_string_lossy().to_string())
        .build()
        .await?;
    let conn = db.connect()?;
    if conn.execute_batch("REINDEX").await.is_err() {
        return Ok(false);
    }
    quick_check(path).await
}

async fn try_vacuum(path: &Path) -> Result<bool> {
    let db = libsql::Builder::new_local(path.to_string_lossy().to_string())
        .build()
        .await?;
    let conn = db.connect()?;
    if conn.execute_batch("VACUUM").await.is_err() {
        return Ok(false);
    }
    quick_check(path).await
}

async fn try_vacuum_into(path: &Path) -> Result<bool> {
    let fresh_path = path.with_extension("recovered.db");
    let db = libsql::Builder::new_local(path.to_string_lossy().to_string())
        .build()
        .await?;
    let conn = db.connect()?;
    let sql = format!("VACUUM INTO '{}'", fresh_path.display());
    if conn.execute_batch(&sql).await.is_err() {
        return Ok(false);
    }
    if !quick_check(&fresh_path).await.unwrap_or(false) {
        let _ = std::fs::remove_file(&fresh_path);
        return Ok(false);
    }
    std::fs::rename(&fresh_path, path)?;
    Ok(true)
}

/// Archives a corrupted database file to `corrupted_archives/` with a plain
/// text metadata sidecar, then replaces it so the caller can build fresh.
fn archive_corrupted(path: &Path) -> Result<()> {
    let parent = path.parent().unwrap_or_else(|| Path::new("."));
    let archive_dir = parent.join("corrupted_archives");
    std::fs::create_dir_all(&archive_dir)?;

    let basename = path.file_stem().map(|s| s.to_string_lossy().to_string()).unwrap_or_default();
    let ts = Utc::now().format("%Y%m%d-%H%M%S");
    let pid = std::process::id();
    let host = hostname_best_effort();

    let archived_path = archive_dir.join(format!("{basename}.corrupted.{ts}.{host}.{pid}.db"));
    std::fs::rename(path, &archived_path)?;

    let metadata_path = archived_path.with_extension("db.metadata.txt");
    let metadata = format!(
        "original_path={}\narchived_at={}\nhost={}\npid={}\n",
        path.display(),
        Utc::now().to_rfc3339(),
        host,
        pid
    );
    std::fs::write(metadata_path, metadata)?;

    Ok(())
}

fn hostname_best_effort() -> String {
    std::env::var("HOSTNAME").unwrap_or_else(|_| "unknown-host".to_string())
}

/// Runs the recovery ladder against a corrupted database file, preferring
/// the least destructive strategy that succeeds: reindex, then vacuum, then
/// vacuum-into-fresh-file, then restore from the most recent verified
/// backup, and only as a last resort an empty database. Implementations may
/// reorder rungs but must try a fresh copy and backup restore before
/// destructively creating a new database.
pub async fn recover(
    db_path: impl Into<PathBuf>,
    latest_backup: Option<&BackupInfo>,
) -> Result<RecoveryOutcome> {
    let db_path = db_path.into();

    if try_reindex(&db_path).await.unwrap_or(false) {
        return Ok(RecoveryOutcome::Reindex);
    }
    tracing::warn!("recovery: reindex did not restore integrity, trying vacuum");

    if try_vacuum(&db_path).await.unwrap_or(false) {
        return Ok(RecoveryOutcome::Vacuum);
    }
    tracing::warn!("recovery: vacuum did not restore integrity, trying vacuum-into");

    if try_vacuum_into(&db_path).await.unwrap_or(false) {
        return Ok(RecoveryOutcome::VacuumInto);
    }
    tracing::warn!("recovery: vacuum-into did not restore integrity, trying backup restore");

    if let Some(backup) = latest_backup {
        if backup.valid {
            archive_corrupted(&db_path)?;
            std::fs::copy(&backup.path, &db_path)?;
            if quick_check(&db_path).await.unwrap_or(false) {
                return Ok(RecoveryOutcome::BackupRestore);
            }
        }
    }
    tracing::error!("recovery: no valid backup available, creating empty database as last resort");

    if db_path.exists() {
        archive_corrupted(&db_path)?;
    }
    let db = libsql::Builder::new_local(db_path.to_string_lossy().to_string())
        .build()
        .await?;
    let _ = db.connect()?;
    Ok(RecoveryOutcome::EmptyDatabase)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn recovery_falls_back_to_empty_database_with_no_backup() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("broken.db");
        std::fs::write(&db_path, b"not a valid sqlite file at all").unwrap();

        let outcome = recover(&db_path, None).await.unwrap();
        assert_eq!(outcome, RecoveryOutcome::EmptyDatabase);
        assert!(db_path.exists());

        let archive_dir = dir.path().join("corrupted_archives");
        assert!(archive_dir.exists());
    }
}
