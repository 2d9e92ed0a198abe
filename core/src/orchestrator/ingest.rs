use crate::error::Result;
use crate::intelligence::{ConsolidationOutcome, Consolidator, FactExtractor, FactOrigin};
use crate::models::{Document, DocumentReference};

/// Tally of what happened while storing a batch of Documents. Mirrors the
/// counters the Orchestrator needs for its failure-rate policy.
#[derive(Debug, Clone, Default)]
pub struct IngestReport {
    pub documents_stored: usize,
    pub facts_added: usize,
    pub facts_updated: usize,
    pub facts_deleted: usize,
    pub facts_skipped: usize,
}

/// Wires the Chunker, Fact Extractor, and Consolidator into the single
/// `Store(documents)` operation the Ingestion Orchestrator calls per batch.
pub struct IngestionPipeline {
    extractor: FactExtractor,
    consolidator: Consolidator,
}

impl IngestionPipeline {
    pub fn new(extractor: FactExtractor, consolidator: Consolidator) -> Self {
        Self { extractor, consolidator }
    }

    /// Chunks, extracts, and consolidates every document in `documents`.
    /// An extraction failure (after the Extractor's own retries) or a
    /// commit write error aborts the rest of this batch: whatever was
    /// already committed for earlier documents remains, but the caller
    /// (the Orchestrator) must count this whole batch as failed.
    pub async fn store(&self, documents: &[Document]) -> Result<IngestReport> {
        let mut report = IngestReport::default();

        for document in documents {
            for chunk in document.chunk() {
                self.store_chunk(&chunk, &mut report).await?;
            }
            report.documents_stored += 1;
        }

        Ok(report)
    }

    async fn store_chunk(&self, chunk: &Document, report: &mut IngestReport) -> Result<()> {
        let facts = self.extractor.extract(&chunk.content()).await?;

        let timestamp = chunk.timestamp().unwrap_or_else(chrono::Utc::now);
        let document_reference = DocumentReference {
            document_id: chunk.id().to_string(),
            chunk_id: chunk.metadata().get("_chunk_number").cloned(),
        };

        for (index, fact_content) in facts.iter().enumerate() {
            let origin = FactOrigin {
                subject: chunk
                    .metadata()
                    .get("subject")
                    .cloned()
                    .unwrap_or_else(|| "primaryUser".to_string()),
                document_reference: document_reference.clone(),
                timestamp,
                source: chunk.source().to_string(),
                metadata: chunk.metadata().clone(),
                original_turn_id: chunk.metadata().get("_original_document_id").cloned(),
                original_turn_content_preview: Some(fact_content.clone()),
                fact_index_in_turn: index,
            };

            match self.consolidator.consolidate(fact_content, &origin).await? {
                ConsolidationOutcome::Added(_) => report.facts_added += 1,
                ConsolidationOutcome::Updated(_) => report.facts_updated += 1,
                ConsolidationOutcome::Deleted(_) => report.facts_deleted += 1,
                ConsolidationOutcome::None => report.facts_skipped += 1,
            }
        }

        Ok(())
    }
}
