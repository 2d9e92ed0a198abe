use std::path::{Path, PathBuf};

use chrono::{DateTime, NaiveTime, TimeZone, Utc};

use crate::error::{CoreError, Result};
use crate::models::BackupInfo;

use super::connection::Database;

/// Returns 02:00 of `t`'s date if `t` is before 02:00, otherwise 02:00 of the
/// following day.
pub fn calculate_next_backup(t: DateTime<Utc>) -> DateTime<Utc> {
    let two_am = NaiveTime::from_hms_opt(2, 0, 0).unwrap();
    let today_2am = Utc.from_utc_datetime(&t.date_naive().and_time(two_am));

    if t.time() < two_am {
        today_2am
    } else {
        today_2am + chrono::Duration::days(1)
    }
}

/// Schedules and executes backups of the control store's on-disk database
/// file. Owns at most one timer; on startup, if the current time is past
/// 02:00 and no backup younger than 24h exists, runs an immediate catch-up.
pub struct BackupManager {
    db_path: PathBuf,
    backup_dir: PathBuf,
    retention_count: usize,
}

impl BackupManager {
    pub fn new(db_path: impl Into<PathBuf>, backup_dir: impl Into<PathBuf>, retention_count: usize) -> Self {
        Self {
            db_path: db_path.into(),
            backup_dir: backup_dir.into(),
            retention_count,
        }
    }

    /// Whether a catch-up backup is needed right now: past 02:00 local and no
    /// backup file with an mtime within the last 24h.
    pub fn needs_catch_up(&self, now: DateTime<Utc>) -> bool {
        let two_am = NaiveTime::from_hms_opt(2, 0, 0).unwrap();
        if now.time() < two_am {
            return false;
        }

        match self.most_recent_backup_mtime() {
            Some(mtime) => now - mtime > chrono::Duration::hours(24),
            None => true,
        }
    }

    fn most_recent_backup_mtime(&self) -> Option<DateTime<Utc>> {
        let entries = std::fs::read_dir(&self.backup_dir).ok()?;
        entries
            .filter_map(|e| e.ok())
            .filter(|e| {
                e.file_name()
                    .to_string_lossy()
                    .contains(".backup.")
            })
            .filter_map(|e| e.metadata().ok()?.modified().ok())
            .map(DateTime::<Utc>::from)
            .max()
    }

    /// Runs a single backup attempt:
    /// 1. Integrity check the live database (fatal to this attempt if corrupt).
    /// 2. Vacuum a copy into `<db>.backup.<ts>.tmp`.
    /// 3. Verify the copy with `quick_check`.
    /// 4. Atomically rename into place and prune beyond `retention_count`.
    pub async fn run_backup(&self, db: &Database) -> Result<BackupInfo> {
        std::fs::create_dir_all(&self.backup_dir)?;

        let conn = db.connect()?;
        let integrity: String = {
            let mut rows = conn.query("PRAGMA integrity_check", ()).await?;
            let row = rows.next().await?.ok_or_else(|| {
                CoreError::Internal("integrity_check returned no rows".to_string())
            })?;
            row.get(0)?
        };

        if integrity != "ok" {
            tracing::error!(%integrity, "backup aborted: integrity check failed on live database");
            return Err(CoreError::Internal(format!(
                "integrity check failed: {integrity}"
            )));
        }

        let timestamp = Utc::now();
        let stamp = timestamp.format("%Y%m%d-%H%M%S");
        let basename = self
            .db_path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "twincore.db".to_string());

        let tmp_path = self.backup_dir.join(format!("{basename}.backup.{stamp}.tmp"));
        let final_path = self.backup_dir.join(format!("{basename}.backup.{stamp}"));

        let vacuum_sql = format!("VACUUM INTO '{}'", tmp_path.display());
        conn.execute_batch(&vacuum_sql).await?;

        let valid = Self::quick_check_file(&tmp_path).await?;
        if !valid {
            tracing::error!(path = %tmp_path.display(), "backup copy failed quick_check, discarding");
            let _ = std::fs::remove_file(&tmp_path);
            return Err(CoreError::Internal("backup copy failed quick_check".to_string()));
        }

        std::fs::rename(&tmp_path, &final_path)?;
        let size_bytes = std::fs::metadata(&final_path)?.len();

        self.prune_old_backups(&basename)?;

        Ok(BackupInfo {
            path: final_path.display().to_string(),
            timestamp,
            size_bytes,
            valid: true,
        })
    }

    async fn quick_check_file(path: &Path) -> Result<bool> {
        let db = libsql::Builder::new_local(path.to_string_lossy().to_string())
            .build()
            .await?;
        let conn = db.connect()?;
        let mut rows = conn.query("PRAGMA quick_check", ()).await?;
        let row = rows.next().await?;
        match row {
            Some(row) => {
                let result: String = row.get(0)?;
                Ok(result == "ok")
            }
            None => Ok(false),
        }
    }

    fn prune_old_backups(&self, basename: &str) -> Result<()> {
        let mut entries: Vec<_> = std::fs::read_dir(&self.backup_dir)?
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().starts_with(&format!("{basename}.backup.")))
            .collect();

        entries.sort_by_key(|e| e.file_name());
        entries.reverse();

        for stale in entries.into_iter().skip(self.retention_count) {
            if let Err(e) = std::fs::remove_file(stale.path()) {
                tracing::warn!(path = %stale.path().display(), error = %e, "failed to prune old backup");
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn calculate_next_backup_same_day_when_before_2am() {
        let t = Utc.with_ymd_and_hms(2025, 1, 15, 1, 0, 0).unwrap();
        let next = calculate_next_backup(t);
        assert_eq!(next, Utc.with_ymd_and_hms(2025, 1, 15, 2, 0, 0).unwrap());
    }

    #[test]
    fn calculate_next_backup_next_day_when_at_or_after_2am() {
        let t = Utc.with_ymd_and_hms(2025, 1, 15, 10, 0, 0).unwrap();
        let next = calculate_next_backup(t);
        assert_eq!(next, Utc.with_ymd_and_hms(2025, 1, 16, 2, 0, 0).unwrap());
    }

    #[test]
    fn needs_catch_up_is_false_before_2am_regardless_of_backup_history() {
        let dir = tempfile::tempdir().unwrap();
        let manager = BackupManager::new(dir.path().join("twincore.db"), dir.path().join("backups"), 7);
        let before_2am = Utc.with_ymd_and_hms(2025, 1, 15, 1, 0, 0).unwrap();
        assert!(!manager.needs_catch_up(before_2am));
    }

    #[test]
    fn needs_catch_up_is_true_past_2am_with_no_backup_directory() {
        let dir = tempfile::tempdir().unwrap();
        let manager = BackupManager::new(dir.path().join("twincore.db"), dir.path().join("backups"), 7);
        let past_2am = Utc.with_ymd_and_hms(2025, 1, 15, 10, 0, 0).unwrap();
        assert!(manager.needs_catch_up(past_2am));
    }

    #[tokio::test]
    async fn needs_catch_up_is_false_once_a_recent_backup_exists() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("twincore.db");
        let config = crate::config::ControlStoreConfig {
            db_path: format!("file:{}", db_path.display()),
            ..crate::config::ControlStoreConfig::default()
        };
        let db = Database::new(&config).await.unwrap();

        let backup_dir = dir.path().join("backups");
        let manager = BackupManager::new(&db_path, &backup_dir, 7);
        manager.run_backup(&db).await.unwrap();

        assert!(!manager.needs_catch_up(Utc::now()));
    }

    #[tokio::test]
    async fn run_backup_against_in_memory_like_local_file_produces_valid_copy() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("twincore.db");
        let config = crate::config::ControlStoreConfig {
            db_path: format!("file:{}", db_path.display()),
            ..crate::config::ControlStoreConfig::default()
        };
        let db = Database::new(&config).await.unwrap();

        let backup_dir = dir.path().join("backups");
        let manager = BackupManager::new(&db_path, &backup_dir, 7);
        let info = manager.run_backup(&db).await.unwrap();

        assert!(info.valid);
        assert!(Path::new(&info.path).exists());
    }
}
