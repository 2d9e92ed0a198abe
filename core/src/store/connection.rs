use std::sync::Arc;

use libsql::{Builder, Connection};

use crate::config::ControlStoreConfig;
use crate::error::{CoreError, Result};

use super::migrations;

/// The embedded durable store. Any PRAGMA failure during connection setup
/// is treated as fatal — unlike a cache or a search index, a control store
/// that silently lost WAL or busy_timeout would corrupt the claim/release
/// invariant the whole orchestrator depends on.
pub struct Database {
    pub(crate) db: Arc<libsql::Database>,
    pub(crate) busy_timeout_ms: u64,
    pub(crate) journal_mode: String,
    pub(crate) synchronous: String,
}

impl Database {
    pub async fn new(config: &ControlStoreConfig) -> Result<Self> {
        let db = if config.db_path == ":memory:" {
            Builder::new_local(":memory:").build().await?
        } else {
            let path = config.db_path.strip_prefix("file:").unwrap_or(&config.db_path);
            Builder::new_local(path).build().await?
        };

        let database = Self {
            db: Arc::new(db),
            busy_timeout_ms: config.busy_timeout_ms,
            journal_mode: config.journal_mode.clone(),
            synchronous: config.synchronous.clone(),
        };

        database.configure_database().await?;
        database.run_migrations().await?;

        Ok(database)
    }

    pub fn connect(&self) -> Result<Connection> {
        Ok(self.db.connect()?)
    }

    async fn configure_database(&self) -> Result<()> {
        let conn = self.connect()?;

        conn.execute_batch("PRAGMA foreign_keys = ON").await.map_err(|e| {
            tracing::error!(error = %e, "fatal: failed to enable foreign_keys pragma");
            CoreError::Database(e)
        })?;

        let busy_timeout_sql = format!("PRAGMA busy_timeout = {}", self.busy_timeout_ms);
        conn.execute_batch(&busy_timeout_sql).await.map_err(|e| {
            tracing::error!(busy_timeout_ms = self.busy_timeout_ms, error = %e, "fatal: failed to set busy_timeout pragma");
            CoreError::Database(e)
        })?;

        let journal_sql = format!("PRAGMA journal_mode = {}", self.journal_mode);
        conn.execute_batch(&journal_sql).await.map_err(|e| {
            tracing::error!(mode = %self.journal_mode, error = %e, "fatal: failed to set journal_mode pragma");
            CoreError::Database(e)
        })?;

        let synchronous_sql = format!("PRAGMA synchronous = {}", self.synchronous);
        conn.execute_batch(&synchronous_sql).await.map_err(|e| {
            tracing::error!(mode = %self.synchronous, error = %e, "fatal: failed to set synchronous pragma");
            CoreError::Database(e)
        })?;

        Ok(())
    }

    async fn run_migrations(&self) -> Result<()> {
        let conn = self.connect()?;
        migrations::run_migrations(&conn).await
    }

    /// Sync with remote replication, if configured. No-op for local-only stores.
    pub async fn sync(&self) -> Result<()> {
        if let Ok(sync) = self.db.sync().await {
            tracing::debug!(?sync, "control store synced");
        }
        Ok(())
    }
}

impl Clone for Database {
    fn clone(&self) -> Self {
        Self {
            db: Arc::clone(&self.db),
            busy_timeout_ms: self.busy_timeout_ms,
            journal_mode: self.journal_mode.clone(),
            synchronous: self.synchronous.clone(),
        }
    }
}
