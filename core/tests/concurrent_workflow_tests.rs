mod common;

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use twincore::config::{ControlStoreConfig, EmbeddingConfig, OrchestratorConfig};
use twincore::embeddings::EmbeddingProvider;
use twincore::error::Result;
use twincore::index::InMemoryVectorIndex;
use twincore::intelligence::{Consolidator, FactExtractor};
use twincore::llm::LlmProvider;
use twincore::models::{DataSource, Document, ProcessingStatus};
use twincore::orchestrator::{IngestionPipeline, Orchestrator, ProcessArtifact, SourceAdapter, StatusBroadcaster};
use twincore::store::{ControlStore, Database, SqliteControlStore};

struct DirectAdapter;

#[async_trait]
impl SourceAdapter for DirectAdapter {
    async fn process(&self, _source: &DataSource) -> Result<ProcessArtifact> {
        Ok(ProcessArtifact::Direct)
    }

    fn to_documents(&self, _records: Vec<Value>) -> Result<Vec<Document>> {
        Ok(Vec::new())
    }
}

fn idle_pipeline() -> IngestionPipeline {
    let llm = LlmProvider::new(None);
    let embeddings = EmbeddingProvider::new(&EmbeddingConfig {
        model: "openai/text-embedding-3-small".to_string(),
        api_key: Some("test".to_string()),
        base_url: Some("http://127.0.0.1:0".to_string()),
        dimensions: 3,
        batch_size: 8,
    })
    .unwrap();
    let index: Arc<dyn twincore::index::VectorIndex> = Arc::new(InMemoryVectorIndex::new());
    IngestionPipeline::new(FactExtractor::new(llm.clone()), Consolidator::new(llm, embeddings, index))
}

async fn shared_store(dir: &tempfile::TempDir) -> Arc<dyn ControlStore> {
    let db_path = dir.path().join("twincore.db");
    let config = ControlStoreConfig {
        db_path: format!("file:{}", db_path.display()),
        ..ControlStoreConfig::default()
    };
    let db = Database::new(&config).await.unwrap();
    Arc::new(SqliteControlStore::new(db))
}

/// Two Orchestrators backed by the same on-disk Control Store race to claim
/// the same data source. Exactly one should end up processing it; the other
/// must observe the claim as contended and skip.
#[tokio::test]
async fn two_concurrent_workflows_never_both_claim_the_same_source() {
    common::init_test_logger();

    let dir = tempfile::tempdir().unwrap();
    let store = shared_store(&dir).await;
    store
        .create_data_source(&DataSource::new("shared-source", "export", "/data/export"))
        .await
        .unwrap();

    let make_orchestrator = || {
        Orchestrator::new(
            store.clone(),
            Arc::new(DirectAdapter),
            idle_pipeline(),
            Arc::new(StatusBroadcaster::default()),
            OrchestratorConfig::default(),
        )
    };

    let orchestrator_a = make_orchestrator();
    let orchestrator_b = make_orchestrator();

    let (report_a, report_b) = tokio::join!(
        orchestrator_a.run_once("workflow-a"),
        orchestrator_b.run_once("workflow-b"),
    );
    let report_a = report_a.unwrap();
    let report_b = report_b.unwrap();

    let total_processed = report_a.processed.len() + report_b.processed.len();
    let total_skipped = report_a.skipped.len() + report_b.skipped.len();

    assert_eq!(total_processed, 1, "exactly one workflow should process the source");
    assert_eq!(total_skipped, 1, "the other workflow should see the claim contended");

    let settled = store.get_data_source("shared-source").await.unwrap().unwrap();
    assert_eq!(settled.processing_status, ProcessingStatus::Idle);
    assert!(settled.is_indexed);
}

#[tokio::test]
async fn stale_claim_is_reclaimed_on_the_next_run() {
    common::init_test_logger();

    let dir = tempfile::tempdir().unwrap();
    let store = shared_store(&dir).await;

    let mut source = DataSource::new("abandoned", "export", "/data/export");
    source.processing_status = ProcessingStatus::Processing;
    source.processing_workflow_id = Some("dead-workflow".to_string());
    source.processing_started_at = Some(chrono::Utc::now() - chrono::Duration::minutes(120));
    store.create_data_source(&source).await.unwrap();

    let mut config = OrchestratorConfig::default();
    config.stale_claim_minutes = 60;

    let orchestrator = Orchestrator::new(
        store.clone(),
        Arc::new(DirectAdapter),
        idle_pipeline(),
        Arc::new(StatusBroadcaster::default()),
        config,
    );

    let report = orchestrator.run_once("workflow-fresh").await.unwrap();
    assert_eq!(report.processed, vec!["abandoned".to_string()]);

    let settled = store.get_data_source("abandoned").await.unwrap().unwrap();
    assert!(settled.is_indexed);
}
