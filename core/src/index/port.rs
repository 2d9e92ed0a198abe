use async_trait::async_trait;
use uuid::Uuid;

use crate::error::Result;
use crate::models::{DocumentChunk, DocumentReference, Filter, MemoryFact, QueryResult};

/// The abstract boundary between fact storage/retrieval and any concrete
/// vector database. Component F (the Consolidator) and component G (the
/// Query Engine) depend only on this trait; a production deployment swaps in
/// a real vector store without either caller changing.
///
/// `store_batch` is best-effort but all-or-nothing from the caller's point
/// of view: if any element in the batch fails, the whole call returns that
/// error rather than reporting a partial success.
#[async_trait]
pub trait VectorIndex: Send + Sync {
    async fn ensure_schema_exists(&self) -> Result<()>;

    async fn store_batch(&self, facts: &[MemoryFact]) -> Result<()>;
    async fn get_by_id(&self, id: Uuid) -> Result<Option<MemoryFact>>;
    async fn update(&self, fact: &MemoryFact) -> Result<()>;
    async fn delete(&self, id: Uuid) -> Result<bool>;
    async fn delete_all(&self) -> Result<u64>;

    async fn query(&self, embedding: &[f32], filter: &Filter) -> Result<QueryResult>;
    async fn get_facts_by_ids(&self, ids: &[Uuid]) -> Result<Vec<MemoryFact>>;
    async fn get_document_references(&self, fact_id: Uuid) -> Result<Vec<DocumentReference>>;

    async fn store_document_chunks_batch(&self, chunks: &[DocumentChunk]) -> Result<()>;
    async fn query_document_chunks(
        &self,
        embedding: &[f32],
        document_id: Option<&str>,
        limit: usize,
    ) -> Result<Vec<(DocumentChunk, f32)>>;
}
