use async_trait::async_trait;

use crate::error::Result;
use crate::models::DataSource;

/// The Durable Control Store: CRUD on [`DataSource`] rows plus the
/// claim/release workflow-exclusivity primitive and a small opaque
/// key-value area for configuration and tokens.
///
/// Invariant: at any instant at most one workflow holds `processing` or
/// `indexing` on a given data source. A row leaves either status only via
/// explicit release or `cleanup_stale`.
#[async_trait]
pub trait ControlStore: Send + Sync {
    async fn create_data_source(&self, source: &DataSource) -> Result<()>;
    async fn get_data_source(&self, id: &str) -> Result<Option<DataSource>>;
    async fn list_active_data_sources(&self) -> Result<Vec<DataSource>>;
    async fn update_data_source(&self, source: &DataSource) -> Result<()>;
    async fn delete_data_source(&self, id: &str) -> Result<bool>;

    /// Atomic compare-and-set: succeeds only when the row's
    /// `processing_status` is currently `idle`. Returns `true` iff the claim
    /// was acquired.
    async fn claim_for_processing(&self, id: &str, workflow_id: &str) -> Result<bool>;

    /// Same contract as [`ControlStore::claim_for_processing`] but transitions to `indexing`.
    async fn claim_for_indexing(&self, id: &str, workflow_id: &str) -> Result<bool>;

    /// Releases a claim back to `idle`. Only the workflow that holds the
    /// claim (matched by `processing_workflow_id`) may release it.
    async fn release_claim(&self, id: &str, workflow_id: &str) -> Result<()>;

    /// Resets rows whose `processing_started_at` is older than `max_age_minutes`
    /// back to `idle`. Returns the number of rows reset.
    async fn cleanup_stale(&self, max_age_minutes: i64) -> Result<u64>;

    async fn get_kv(&self, key: &str) -> Result<Option<String>>;
    async fn set_kv(&self, key: &str, value: &str) -> Result<()>;
}
