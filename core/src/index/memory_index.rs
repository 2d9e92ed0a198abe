use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::error::Result;
use crate::models::{DocumentChunk, DocumentReference, Filter, MemoryFact, QueryResult, ScoredFact};

use super::port::VectorIndex;

fn cosine_distance(a: &[f32], b: &[f32]) -> f32 {
    if a.is_empty() || b.is_empty() || a.len() != b.len() {
        return f32::MAX;
    }

    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        return 1.0;
    }

    1.0 - (dot / (norm_a * norm_b))
}

#[derive(Default)]
struct Inner {
    facts: HashMap<Uuid, MemoryFact>,
    chunks: Vec<DocumentChunk>,
}

/// Thread-safe in-memory reference implementation of the Vector Index Port.
/// This is the default collaborator when no external vector store is
/// configured: correct but O(n) per query, suitable for development and
/// for deployments small enough that a full scan is cheap.
#[derive(Default)]
pub struct InMemoryVectorIndex {
    inner: Arc<RwLock<Inner>>,
}

impl InMemoryVectorIndex {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl VectorIndex for InMemoryVectorIndex {
    async fn ensure_schema_exists(&self) -> Result<()> {
        Ok(())
    }

    async fn store_batch(&self, facts: &[MemoryFact]) -> Result<()> {
        let mut inner = self.inner.write().await;
        for fact in facts {
            inner.facts.insert(fact.id, fact.clone());
        }
        Ok(())
    }

    async fn get_by_id(&self, id: Uuid) -> Result<Option<MemoryFact>> {
        let inner = self.inner.read().await;
        Ok(inner.facts.get(&id).cloned())
    }

    async fn update(&self, fact: &MemoryFact) -> Result<()> {
        let mut inner = self.inner.write().await;
        inner.facts.insert(fact.id, fact.clone());
        Ok(())
    }

    async fn delete(&self, id: Uuid) -> Result<bool> {
        let mut inner = self.inner.write().await;
        Ok(inner.facts.remove(&id).is_some())
    }

    async fn delete_all(&self) -> Result<u64> {
        let mut inner = self.inner.write().await;
        let count = inner.facts.len() as u64;
        inner.facts.clear();
        inner.chunks.clear();
        Ok(count)
    }

    async fn query(&self, embedding: &[f32], filter: &Filter) -> Result<QueryResult> {
        let inner = self.inner.read().await;

        let mut scored: Vec<ScoredFact> = inner
            .facts
            .values()
            .filter(|fact| filter.matches(fact))
            .map(|fact| ScoredFact {
                distance: cosine_distance(embedding, &fact.embedding),
                fact: fact.clone(),
            })
            .collect();

        if let Some(max_distance) = filter.max_distance.filter(|d| *d > 0.0) {
            scored.retain(|scored| scored.distance <= max_distance);
        }

        scored.sort_by(|a, b| {
            a.distance
                .partial_cmp(&b.distance)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| b.fact.timestamp.cmp(&a.fact.timestamp))
        });

        if let Some(limit) = filter.limit {
            scored.truncate(limit);
        }

        Ok(QueryResult { facts: scored })
    }

    async fn get_facts_by_ids(&self, ids: &[Uuid]) -> Result<Vec<MemoryFact>> {
        let inner = self.inner.read().await;
        Ok(ids.iter().filter_map(|id| inner.facts.get(id).cloned()).collect())
    }

    async fn get_document_references(&self, fact_id: Uuid) -> Result<Vec<DocumentReference>> {
        let inner = self.inner.read().await;
        Ok(inner
            .facts
            .get(&fact_id)
            .map(|f| f.document_references.clone())
            .unwrap_or_default())
    }

    async fn store_document_chunks_batch(&self, chunks: &[DocumentChunk]) -> Result<()> {
        let mut inner = self.inner.write().await;
        inner.chunks.extend_from_slice(chunks);
        Ok(())
    }

    async fn query_document_chunks(
        &self,
        embedding: &[f32],
        document_id: Option<&str>,
        limit: usize,
    ) -> Result<Vec<(DocumentChunk, f32)>> {
        let inner = self.inner.read().await;

        let mut scored: Vec<(DocumentChunk, f32)> = inner
            .chunks
            .iter()
            .filter(|c| document_id.map(|id| c.document_id == id).unwrap_or(true))
            .map(|c| (c.clone(), cosine_distance(embedding, &c.embedding)))
            .collect();

        scored.sort_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(limit);
        Ok(scored)
    }
}
