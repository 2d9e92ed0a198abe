use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle state of a tracked data source. `Replaced` marks a source that
/// has been superseded by a newer ingest of the same logical origin but is
/// kept around until the replacement finishes indexing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataSourceState {
    Active,
    Replaced,
    Deleted,
}

/// What, if anything, a workflow is currently doing with this source. This
/// is the field the claim/release compare-and-swap mutates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessingStatus {
    Idle,
    Processing,
    Indexing,
}

/// A registered origin of documents: a file, an export, or any other
/// addressable place documents come from.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataSource {
    pub id: String,
    pub name: String,
    pub path: String,
    pub processed_path: Option<String>,
    pub state: DataSourceState,
    pub is_indexed: bool,
    pub has_error: bool,
    pub processing_status: ProcessingStatus,
    /// Identity of the workflow instance that currently holds the claim, if any.
    pub processing_workflow_id: Option<String>,
    pub processing_started_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl DataSource {
    pub fn new(id: impl Into<String>, name: impl Into<String>, path: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            name: name.into(),
            path: path.into(),
            processed_path: None,
            state: DataSourceState::Active,
            is_indexed: false,
            has_error: false,
            processing_status: ProcessingStatus::Idle,
            processing_workflow_id: None,
            processing_started_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// True once a claim this old should be treated as abandoned by a
    /// crashed workflow and be eligible for cleanup.
    pub fn is_stale_claim(&self, now: DateTime<Utc>, max_age: chrono::Duration) -> bool {
        matches!(
            self.processing_status,
            ProcessingStatus::Processing | ProcessingStatus::Indexing
        ) && self
            .processing_started_at
            .map(|started| now - started > max_age)
            .unwrap_or(false)
    }
}

/// Metadata about a single Control Store backup artifact.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupInfo {
    pub path: String,
    pub timestamp: DateTime<Utc>,
    pub size_bytes: u64,
    pub valid: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn new_data_source_starts_idle_and_active() {
        let ds = DataSource::new("ds-1", "notes", "/data/notes");
        assert_eq!(ds.state, DataSourceState::Active);
        assert_eq!(ds.processing_status, ProcessingStatus::Idle);
        assert!(!ds.is_indexed);
        assert!(ds.processing_workflow_id.is_none());
    }

    #[test]
    fn stale_claim_detection_respects_max_age() {
        let mut ds = DataSource::new("ds-1", "notes", "/data/notes");
        ds.processing_status = ProcessingStatus::Processing;
        ds.processing_started_at = Some(Utc::now() - Duration::hours(2));

        assert!(ds.is_stale_claim(Utc::now(), Duration::hours(1)));
        assert!(!ds.is_stale_claim(Utc::now(), Duration::hours(3)));
    }

    #[test]
    fn idle_source_is_never_a_stale_claim() {
        let ds = DataSource::new("ds-1", "notes", "/data/notes");
        assert!(!ds.is_stale_claim(Utc::now(), Duration::seconds(0)));
    }
}
