use async_trait::async_trait;
use chrono::{DateTime, Utc};
use libsql::params;

use crate::error::{CoreError, Result};
use crate::models::{DataSource, DataSourceState, ProcessingStatus};

use super::connection::Database;
use super::traits::ControlStore;

pub struct SqliteControlStore {
    db: Database,
}

impl SqliteControlStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }
}

fn state_to_str(state: DataSourceState) -> &'static str {
    match state {
        DataSourceState::Active => "active",
        DataSourceState::Replaced => "replaced",
        DataSourceState::Deleted => "deleted",
    }
}

fn state_from_str(value: &str) -> DataSourceState {
    match value {
        "replaced" => DataSourceState::Replaced,
        "deleted" => DataSourceState::Deleted,
        _ => DataSourceState::Active,
    }
}

fn status_to_str(status: ProcessingStatus) -> &'static str {
    match status {
        ProcessingStatus::Idle => "idle",
        ProcessingStatus::Processing => "processing",
        ProcessingStatus::Indexing => "indexing",
    }
}

fn status_from_str(value: &str) -> ProcessingStatus {
    match value {
        "processing" => ProcessingStatus::Processing,
        "indexing" => ProcessingStatus::Indexing,
        _ => ProcessingStatus::Idle,
    }
}

fn row_to_data_source(row: &libsql::Row) -> Result<DataSource> {
    let parse_ts = |s: String| -> Result<DateTime<Utc>> {
        DateTime::parse_from_rfc3339(&s)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(|e| CoreError::Internal(format!("invalid timestamp in control store: {e}")))
    };

    let processing_started_at: Option<String> = row.get(9)?;
    let processing_started_at = processing_started_at.map(parse_ts).transpose()?;

    Ok(DataSource {
        id: row.get(0)?,
        name: row.get(1)?,
        path: row.get(2)?,
        processed_path: row.get(3)?,
        state: state_from_str(&row.get::<String>(4)?),
        is_indexed: row.get::<i64>(5)? != 0,
        has_error: row.get::<i64>(6)? != 0,
        processing_status: status_from_str(&row.get::<String>(7)?),
        processing_workflow_id: row.get(8)?,
        processing_started_at,
        created_at: parse_ts(row.get(10)?)?,
        updated_at: parse_ts(row.get(11)?)?,
    })
}

const SELECT_COLUMNS: &str = "id, name, path, processed_path, state, is_indexed, has_error, \
     processing_status, processing_workflow_id, processing_started_at, created_at, updated_at";

#[async_trait]
impl ControlStore for SqliteControlStore {
    async fn create_data_source(&self, source: &DataSource) -> Result<()> {
        let conn = self.db.connect()?;
        conn.execute(
            "INSERT INTO data_sources (id, name, path, processed_path, state, is_indexed, \
             has_error, processing_status, processing_workflow_id, processing_started_at, \
             created_at, updated_at) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
            params![
                source.id.clone(),
                source.name.clone(),
                source.path.clone(),
                source.processed_path.clone(),
                state_to_str(source.state),
                source.is_indexed as i64,
                source.has_error as i64,
                status_to_str(source.processing_status),
                source.processing_workflow_id.clone(),
                source.processing_started_at.map(|t| t.to_rfc3339()),
                source.created_at.to_rfc3339(),
                source.updated_at.to_rfc3339(),
            ],
        )
        .await?;
        Ok(())
    }

    async fn get_data_source(&self, id: &str) -> Result<Option<DataSource>> {
        let conn = self.db.connect()?;
        let sql = format!("SELECT {SELECT_COLUMNS} FROM data_sources WHERE id = ?1");
        let mut rows = conn.query(&sql, params![id.to_string()]).await?;
        match rows.next().await? {
            Some(row) => Ok(Some(row_to_data_source(&row)?)),
            None => Ok(None),
        }
    }

    async fn list_active_data_sources(&self) -> Result<Vec<DataSource>> {
        let conn = self.db.connect()?;
        let sql =
            format!("SELECT {SELECT_COLUMNS} FROM data_sources WHERE state = 'active' ORDER BY created_at ASC");
        let mut rows = conn.query(&sql, ()).await?;
        let mut sources = Vec::new();
        while let Some(row) = rows.next().await? {
            sources.push(row_to_data_source(&row)?);
        }
        Ok(sources)
    }

    async fn update_data_source(&self, source: &DataSource) -> Result<()> {
        let conn = self.db.connect()?;
        conn.execute(
            "UPDATE data_sources SET name = ?2, path = ?3, processed_path = ?4, state = ?5, \
             is_indexed = ?6, has_error = ?7, processing_status = ?8, processing_workflow_id = ?9, \
             processing_started_at = ?10, updated_at = ?11 WHERE id = ?1",
            params![
                source.id.clone(),
                source.name.clone(),
                source.path.clone(),
                source.processed_path.clone(),
                state_to_str(source.state),
                source.is_indexed as i64,
                source.has_error as i64,
                status_to_str(source.processing_status),
                source.processing_workflow_id.clone(),
                source.processing_started_at.map(|t| t.to_rfc3339()),
                Utc::now().to_rfc3339(),
            ],
        )
        .await?;
        Ok(())
    }

    async fn delete_data_source(&self, id: &str) -> Result<bool> {
        let conn = self.db.connect()?;
        let affected = conn
            .execute("DELETE FROM data_sources WHERE id = ?1", params![id.to_string()])
            .await?;
        Ok(affected > 0)
    }

    async fn claim_for_processing(&self, id: &str, workflow_id: &str) -> Result<bool> {
        let conn = self.db.connect()?;
        let affected = conn
            .execute(
                "UPDATE data_sources SET processing_status = 'processing', \
                 processing_workflow_id = ?2, processing_started_at = ?3, updated_at = ?3 \
                 WHERE id = ?1 AND processing_status = 'idle'",
                params![id.to_string(), workflow_id.to_string(), Utc::now().to_rfc3339()],
            )
            .await?;
        Ok(affected > 0)
    }

    async fn claim_for_indexing(&self, id: &str, workflow_id: &str) -> Result<bool> {
        let conn = self.db.connect()?;
        let affected = conn
            .execute(
                "UPDATE data_sources SET processing_status = 'indexing', \
                 processing_workflow_id = ?2, processing_started_at = ?3, updated_at = ?3 \
                 WHERE id = ?1 AND processing_status = 'idle'",
                params![id.to_string(), workflow_id.to_string(), Utc::now().to_rfc3339()],
            )
            .await?;
        Ok(affected > 0)
    }

    async fn release_claim(&self, id: &str, workflow_id: &str) -> Result<()> {
        let conn = self.db.connect()?;
        let affected = conn
            .execute(
                "UPDATE data_sources SET processing_status = 'idle', processing_workflow_id = NULL, \
                 processing_started_at = NULL, updated_at = ?3 \
                 WHERE id = ?1 AND processing_workflow_id = ?2",
                params![id.to_string(), workflow_id.to_string(), Utc::now().to_rfc3339()],
            )
            .await?;
        if affected == 0 {
            tracing::warn!(id, workflow_id, "release_claim: no matching claimed row (already released or claimed by another workflow)");
        }
        Ok(())
    }

    async fn cleanup_stale(&self, max_age_minutes: i64) -> Result<u64> {
        let conn = self.db.connect()?;
        let threshold = (Utc::now() - chrono::Duration::minutes(max_age_minutes)).to_rfc3339();
        let affected = conn
            .execute(
                "UPDATE data_sources SET processing_status = 'idle', processing_workflow_id = NULL, \
                 processing_started_at = NULL, updated_at = ?2 \
                 WHERE processing_status != 'idle' AND processing_started_at < ?1",
                params![threshold, Utc::now().to_rfc3339()],
            )
            .await?;
        if affected > 0 {
            tracing::warn!(reset = affected, "cleanup_stale reclaimed abandoned claims");
        }
        Ok(affected)
    }

    async fn get_kv(&self, key: &str) -> Result<Option<String>> {
        let conn = self.db.connect()?;
        let mut rows = conn
            .query("SELECT value FROM kv_config WHERE key = ?1", params![key.to_string()])
            .await?;
        match rows.next().await? {
            Some(row) => Ok(Some(row.get(0)?)),
            None => Ok(None),
        }
    }

    async fn set_kv(&self, key: &str, value: &str) -> Result<()> {
        let conn = self.db.connect()?;
        conn.execute(
            "INSERT INTO kv_config (key, value, updated_at) VALUES (?1, ?2, ?3) \
             ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
            params![key.to_string(), value.to_string(), Utc::now().to_rfc3339()],
        )
        .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ControlStoreConfig;

    async fn test_store() -> (tempfile::TempDir, SqliteControlStore) {
        let dir = tempfile::tempdir().expect("tempdir");
        let db_path = dir.path().join("twincore-test.db");
        let config = ControlStoreConfig {
            db_path: format!("file:{}", db_path.display()),
            ..ControlStoreConfig::default()
        };
        let db = Database::new(&config).await.expect("db init");
        (dir, SqliteControlStore::new(db))
    }

    #[tokio::test]
    async fn claim_is_exclusive_between_two_concurrent_attempts() {
        let (_dir, store) = test_store().await;
        let source = DataSource::new("ds-1", "notes", "/data/notes");
        store.create_data_source(&source).await.unwrap();

        let first = store.claim_for_processing("ds-1", "wf-a").await.unwrap();
        let second = store.claim_for_processing("ds-1", "wf-b").await.unwrap();

        assert!(first);
        assert!(!second);
    }

    #[tokio::test]
    async fn release_requires_matching_workflow_id() {
        let (_dir, store) = test_store().await;
        let source = DataSource::new("ds-1", "notes", "/data/notes");
        store.create_data_source(&source).await.unwrap();
        store.claim_for_processing("ds-1", "wf-a").await.unwrap();

        store.release_claim("ds-1", "wf-wrong").await.unwrap();
        let still_claimed = store.get_data_source("ds-1").await.unwrap().unwrap();
        assert_eq!(still_claimed.processing_status, ProcessingStatus::Processing);

        store.release_claim("ds-1", "wf-a").await.unwrap();
        let released = store.get_data_source("ds-1").await.unwrap().unwrap();
        assert_eq!(released.processing_status, ProcessingStatus::Idle);
    }

    #[tokio::test]
    async fn cleanup_stale_resets_only_old_non_idle_rows() {
        let (_dir, store) = test_store().await;
        let mut stale = DataSource::new("stale", "a", "/a");
        stale.processing_status = ProcessingStatus::Processing;
        stale.processing_started_at = Some(Utc::now() - chrono::Duration::minutes(90));
        store.create_data_source(&stale).await.unwrap();

        let mut fresh = DataSource::new("fresh", "b", "/b");
        fresh.processing_status = ProcessingStatus::Processing;
        fresh.processing_started_at = Some(Utc::now());
        store.create_data_source(&fresh).await.unwrap();

        let reset = store.cleanup_stale(60).await.unwrap();
        assert_eq!(reset, 1);

        assert_eq!(
            store.get_data_source("stale").await.unwrap().unwrap().processing_status,
            ProcessingStatus::Idle
        );
        assert_eq!(
            store.get_data_source("fresh").await.unwrap().unwrap().processing_status,
            ProcessingStatus::Processing
        );
    }

    #[tokio::test]
    async fn kv_roundtrips_and_upserts() {
        let (_dir, store) = test_store().await;
        assert_eq!(store.get_kv("token").await.unwrap(), None);
        store.set_kv("token", "abc").await.unwrap();
        assert_eq!(store.get_kv("token").await.unwrap(), Some("abc".to_string()));
        store.set_kv("token", "def").await.unwrap();
        assert_eq!(store.get_kv("token").await.unwrap(), Some("def".to_string()));
    }
}
