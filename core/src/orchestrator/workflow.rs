use std::path::Path;
use std::sync::Arc;

use chrono::Utc;

use crate::config::OrchestratorConfig;
use crate::error::{CoreError, Result};
use crate::models::{
    DataSource, DataSourceStatus, IndexingPhase, IndexingStatusEvent, ProcessingStatus,
};
use crate::store::ControlStore;

use super::adapter::{ProcessArtifact, SourceAdapter};
use super::artifact::ProcessedArtifact;
use super::ingest::IngestionPipeline;
use super::status::StatusBroadcaster;

/// Outcome of one `run_once` call, partitioning every data source it looked
/// at into processed/failed/skipped, per §7's "user-visible behavior".
#[derive(Debug, Clone, Default)]
pub struct WorkflowReport {
    pub processed: Vec<String>,
    pub failed: Vec<(String, String)>,
    pub skipped: Vec<String>,
}

/// Ingestion Orchestrator (component H): a two-phase durable workflow over
/// the Control Store. Every step that mutates a `DataSource` row releases
/// its claim in every exit path, success or failure.
pub struct Orchestrator {
    store: Arc<dyn ControlStore>,
    adapter: Arc<dyn SourceAdapter>,
    pipeline: IngestionPipeline,
    broadcaster: Arc<StatusBroadcaster>,
    config: OrchestratorConfig,
}

impl Orchestrator {
    pub fn new(
        store: Arc<dyn ControlStore>,
        adapter: Arc<dyn SourceAdapter>,
        pipeline: IngestionPipeline,
        broadcaster: Arc<StatusBroadcaster>,
        config: OrchestratorConfig,
    ) -> Self {
        Self {
            store,
            adapter,
            pipeline,
            broadcaster,
            config,
        }
    }

    pub async fn run_once(&self, workflow_id: &str) -> Result<WorkflowReport> {
        let mut report = WorkflowReport::default();
        self.process_phase(workflow_id, &mut report).await?;
        self.index_phase(workflow_id, &mut report).await?;
        self.broadcast_snapshot(IndexingPhase::Completed, None).await;
        Ok(report)
    }

    async fn process_phase(&self, workflow_id: &str, report: &mut WorkflowReport) -> Result<()> {
        let reset = self.store.cleanup_stale(self.config.stale_claim_minutes).await?;
        if reset > 0 {
            tracing::warn!(reset, "reclaimed stale data source claims");
        }

        self.broadcast_snapshot(IndexingPhase::ProcessingData, None).await;

        let candidates: Vec<DataSource> = self
            .store
            .list_active_data_sources()
            .await?
            .into_iter()
            .filter(|source| {
                !source.is_indexed && !source.has_error && source.processing_status == ProcessingStatus::Idle
            })
            .collect();

        for source in candidates {
            if !self.store.claim_for_processing(&source.id, workflow_id).await? {
                tracing::debug!(data_source = %source.id, "processing claim contended, skipping");
                report.skipped.push(source.id.clone());
                continue;
            }

            let mut updated = source.clone();
            match self.adapter.process(&source).await {
                Ok(ProcessArtifact::Direct) => {
                    updated.processed_path = Some(format!("direct://{}_{}", updated.name, updated.id));
                    updated.has_error = false;
                }
                Ok(ProcessArtifact::File(path)) => {
                    updated.processed_path = Some(path.display().to_string());
                    updated.has_error = false;
                }
                Err(error) => {
                    tracing::error!(data_source = %source.id, error = %error, "ProcessSource activity failed");
                    updated.has_error = true;
                    report.failed.push((source.id.clone(), error.to_string()));
                }
            }
            updated.updated_at = Utc::now();

            self.store.update_data_source(&updated).await?;
            self.store.release_claim(&source.id, workflow_id).await?;
        }

        Ok(())
    }

    async fn index_phase(&self, workflow_id: &str, report: &mut WorkflowReport) -> Result<()> {
        self.broadcast_snapshot(IndexingPhase::IndexingData, None).await;

        let candidates: Vec<DataSource> = self
            .store
            .list_active_data_sources()
            .await?
            .into_iter()
            .filter(|source| {
                source.processed_path.is_some() && !source.is_indexed && !source.has_error
                    && source.processing_status == ProcessingStatus::Idle
            })
            .collect();

        for source in candidates {
            if !self.store.claim_for_indexing(&source.id, workflow_id).await? {
                tracing::debug!(data_source = %source.id, "indexing claim contended, skipping");
                report.skipped.push(source.id.clone());
                continue;
            }

            let mut updated = source.clone();
            match self.index_source(&source).await {
                Ok(()) => {
                    updated.is_indexed = true;
                    updated.has_error = false;
                    report.processed.push(source.id.clone());
                }
                Err(error) => {
                    tracing::error!(data_source = %source.id, error = %error, "indexing failed");
                    updated.has_error = true;
                    report.failed.push((source.id.clone(), error.to_string()));
                }
            }
            updated.updated_at = Utc::now();

            self.store.update_data_source(&updated).await?;
            self.store.release_claim(&source.id, workflow_id).await?;
        }

        Ok(())
    }

    /// Indexes one source's processed artifact in batches. Batches are
    /// executed sequentially rather than truly fanned-out concurrently, so
    /// that the early-abort threshold can observe each batch's outcome
    /// before committing to the next one.
    async fn index_source(&self, source: &DataSource) -> Result<()> {
        let Some(processed_path) = &source.processed_path else {
            return Ok(());
        };
        if processed_path.starts_with("direct://") {
            return Ok(());
        }

        let artifact = ProcessedArtifact::load(Path::new(processed_path))?;
        let total_items = artifact.total_items();
        if total_items == 0 {
            return Ok(());
        }

        let batch_size = if self.adapter.is_chat_like() {
            self.config.index_batch_size_chat
        } else {
            self.config.index_batch_size
        };
        let total_batches = total_items.div_ceil(batch_size.max(1));

        let mut attempted = 0usize;
        let mut failed = 0usize;

        for batch_index in 0..total_batches {
            let start = batch_index * batch_size;
            let end = (start + batch_size).min(total_items);

            let records = artifact.read_batch(start, end)?;
            let documents = self.adapter.to_documents(records)?;

            attempted += 1;
            if let Err(error) = self.pipeline.store(&documents).await {
                failed += 1;
                tracing::error!(
                    data_source = %source.id,
                    batch = batch_index,
                    error = %error,
                    "batch indexing failed"
                );
            }

            if (failed as f32 / attempted as f32) > 0.5 && failed > 3 {
                return Err(CoreError::Processing(format!(
                    "data source {} aborted: {failed}/{attempted} batches failed",
                    source.id
                )));
            }
        }

        let final_failure_rate = failed as f32 / attempted as f32;
        if final_failure_rate > self.config.failure_rate_threshold {
            return Err(CoreError::Processing(format!(
                "data source {} final failure rate {final_failure_rate:.2} exceeded threshold",
                source.id
            )));
        }

        Ok(())
    }

    async fn broadcast_snapshot(&self, status: IndexingPhase, error: Option<String>) {
        let data_sources = match self.store.list_active_data_sources().await {
            Ok(sources) => sources.into_iter().map(to_status).collect(),
            Err(error) => {
                tracing::warn!(error = %error, "failed to load data sources for status snapshot");
                Vec::new()
            }
        };

        self.broadcaster.publish(&IndexingStatusEvent {
            status,
            data_sources,
            error,
        });
    }
}

fn to_status(source: DataSource) -> DataSourceStatus {
    DataSourceStatus {
        id: source.id,
        name: source.name,
        path: source.path,
        is_processed: source.processed_path.is_some(),
        is_indexed: source.is_indexed,
        has_error: source.has_error,
        index_progress: if source.is_indexed { 100.0 } else { 0.0 },
        updated_at: source.updated_at,
    }
}
