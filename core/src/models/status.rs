use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Coarse-grained phase of the overall ingestion pipeline, as broadcast to
/// external listeners.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IndexingPhase {
    NotStarted,
    ProcessingData,
    IndexingData,
    Completed,
    Failed,
}

/// Per-source slice of an [`IndexingStatusEvent`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataSourceStatus {
    pub id: String,
    pub name: String,
    pub path: String,
    pub is_processed: bool,
    pub is_indexed: bool,
    pub has_error: bool,
    /// 0.0..=1.0
    pub index_progress: f32,
    pub updated_at: DateTime<Utc>,
}

/// The full snapshot the Status Broadcaster publishes. Intentionally plain
/// data — no transport concerns live here.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexingStatusEvent {
    pub status: IndexingPhase,
    pub data_sources: Vec<DataSourceStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl IndexingStatusEvent {
    pub fn not_started() -> Self {
        Self {
            status: IndexingPhase::NotStarted,
            data_sources: Vec::new(),
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>, data_sources: Vec<DataSourceStatus>) -> Self {
        Self {
            status: IndexingPhase::Failed,
            data_sources,
            error: Some(error.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serializes_with_snake_case_status_values() {
        let event = IndexingStatusEvent::not_started();
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"not_started\""));
        assert!(!json.contains("\"error\""));
    }

    #[test]
    fn failed_event_carries_error_message() {
        let event = IndexingStatusEvent::failed("disk full", vec![]);
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("disk full"));
    }
}
