use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::embeddings::EmbeddingProvider;
use crate::error::Result;
use crate::index::VectorIndex;
use crate::models::{FactCategory, Filter, MemoryFact, ScoredFact};

const DEFAULT_INSIGHT_LIMIT: usize = 10;
const DEFAULT_INSIGHT_DISTANCE: f32 = 0.7;
const ADDITIONAL_CONTEXT_LIMIT: usize = 5;

/// Report accompanying an [`IntelligentQueryResult`], always present even
/// when every tier came back empty.
#[derive(Debug, Clone)]
pub struct QueryMetadata {
    pub consolidated_insight_count: usize,
    pub cited_evidence_count: usize,
    pub additional_context_count: usize,
    pub total_results: usize,
    pub queried_at: DateTime<Utc>,
    pub query_strategy: String,
}

/// A tiered query result: facts the Consolidator has already synthesized,
/// the raw facts that back them up, and nearby facts that didn't make
/// either cut but may still be relevant.
#[derive(Debug, Clone)]
pub struct IntelligentQueryResult {
    pub consolidated_insights: Vec<ScoredFact>,
    pub cited_evidence: Vec<ScoredFact>,
    pub additional_context: Vec<ScoredFact>,
    pub metadata: QueryMetadata,
}

/// Intelligent Query Engine (component G).
pub struct QueryEngine {
    index: Arc<dyn VectorIndex>,
    embeddings: EmbeddingProvider,
}

impl QueryEngine {
    pub fn new(index: Arc<dyn VectorIndex>, embeddings: EmbeddingProvider) -> Self {
        Self { index, embeddings }
    }

    pub async fn query(&self, query_text: &str, filter: &Filter) -> Result<IntelligentQueryResult> {
        let embedding = self.embeddings.embed_single(query_text).await?;
        let queried_at = Utc::now();

        let insight_filter = Filter {
            max_distance: Some(filter.max_distance.filter(|d| *d > 0.0).unwrap_or(DEFAULT_INSIGHT_DISTANCE)),
            limit: Some(filter.limit.unwrap_or(DEFAULT_INSIGHT_LIMIT)),
            category: None,
            ..filter.clone()
        };
        let raw_insights = self.index.query(&embedding, &insight_filter).await?;
        let consolidated_insights: Vec<ScoredFact> = raw_insights
            .facts
            .into_iter()
            .filter(|scored| is_synthesis_fact(&scored.fact))
            .collect();

        let mut seen: HashSet<Uuid> = consolidated_insights.iter().map(|scored| scored.fact.id).collect();

        let referenced_document_ids: Vec<String> = consolidated_insights
            .iter()
            .flat_map(|scored| scored.fact.document_references.iter().map(|r| r.document_id.clone()))
            .collect::<HashSet<_>>()
            .into_iter()
            .collect();

        let mut cited_evidence = Vec::new();
        if !referenced_document_ids.is_empty() {
            let evidence_filter = Filter {
                document_references: referenced_document_ids,
                ..Default::default()
            };
            let evidence_result = self.index.query(&embedding, &evidence_filter).await?;
            for scored in evidence_result.facts {
                if seen.insert(scored.fact.id) {
                    cited_evidence.push(scored);
                }
            }
        }

        let context_filter = Filter {
            limit: Some(ADDITIONAL_CONTEXT_LIMIT),
            ..filter.clone()
        };
        let context_result = self.index.query(&embedding, &context_filter).await?;
        let additional_context: Vec<ScoredFact> = context_result
            .facts
            .into_iter()
            .filter(|scored| seen.insert(scored.fact.id))
            .take(ADDITIONAL_CONTEXT_LIMIT)
            .collect();

        let metadata = QueryMetadata {
            consolidated_insight_count: consolidated_insights.len(),
            cited_evidence_count: cited_evidence.len(),
            additional_context_count: additional_context.len(),
            total_results: consolidated_insights.len() + cited_evidence.len() + additional_context.len(),
            queried_at,
            query_strategy: "tiered_consolidated_evidence_context".to_string(),
        };

        Ok(IntelligentQueryResult {
            consolidated_insights,
            cited_evidence,
            additional_context,
            metadata,
        })
    }
}

fn is_synthesis_fact(fact: &MemoryFact) -> bool {
    matches!(fact.category, FactCategory::ProfileStable | FactCategory::GoalPlan)
        || fact.metadata.get("_consolidated_via_update").map(String::as_str) == Some("true")
}

#[cfg(test)]
mod tests {
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;
    use crate::config::EmbeddingConfig;
    use crate::index::InMemoryVectorIndex;

    fn test_embeddings(base_url: String) -> EmbeddingProvider {
        EmbeddingProvider::new(&EmbeddingConfig {
            model: "openai/text-embedding-3-small".to_string(),
            api_key: Some("test-key".to_string()),
            base_url: Some(base_url),
            dimensions: 3,
            batch_size: 8,
        })
        .unwrap()
    }

    fn embeddings_response(vector: Vec<f32>) -> serde_json::Value {
        serde_json::json!({
            "object": "list",
            "data": [{ "object": "embedding", "embedding": vector, "index": 0 }],
            "model": "text-embedding-3-small",
            "usage": { "prompt_tokens": 1, "total_tokens": 1 }
        })
    }

    #[tokio::test]
    async fn empty_index_returns_empty_tiers_with_accurate_metadata() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/embeddings"))
            .respond_with(ResponseTemplate::new(200).set_body_json(embeddings_response(vec![1.0, 0.0, 0.0])))
            .mount(&server)
            .await;

        let index: Arc<dyn VectorIndex> = Arc::new(InMemoryVectorIndex::new());
        let engine = QueryEngine::new(index, test_embeddings(server.uri()));

        let result = engine.query("anything", &Filter::default()).await.unwrap();
        assert_eq!(result.metadata.total_results, 0);
        assert_eq!(result.metadata.consolidated_insight_count, 0);
        assert_eq!(result.metadata.query_strategy, "tiered_consolidated_evidence_context");
    }

    #[tokio::test]
    async fn profile_stable_facts_surface_as_consolidated_insights() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/embeddings"))
            .respond_with(ResponseTemplate::new(200).set_body_json(embeddings_response(vec![1.0, 0.0, 0.0])))
            .mount(&server)
            .await;

        let index = Arc::new(InMemoryVectorIndex::new());
        let mut stable_fact = MemoryFact::new("works as a software engineer", "user", FactCategory::ProfileStable, 2, "doc-1");
        stable_fact.embedding = vec![1.0, 0.0, 0.0];
        let mut other_fact = MemoryFact::new("ate lunch at noon", "user", FactCategory::Event, 1, "doc-1");
        other_fact.embedding = vec![1.0, 0.0, 0.0];

        index.store_batch(&[stable_fact.clone(), other_fact]).await.unwrap();

        let engine = QueryEngine::new(index, test_embeddings(server.uri()));
        let result = engine.query("what does the user do", &Filter::default()).await.unwrap();

        assert_eq!(result.consolidated_insights.len(), 1);
        assert_eq!(result.consolidated_insights[0].fact.id, stable_fact.id);
    }

    #[tokio::test]
    async fn consolidated_fact_pulls_its_two_source_facts_as_cited_evidence() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/embeddings"))
            .respond_with(ResponseTemplate::new(200).set_body_json(embeddings_response(vec![1.0, 0.0, 0.0])))
            .mount(&server)
            .await;

        let index = Arc::new(InMemoryVectorIndex::new());

        let mut consolidated = MemoryFact::new("works remotely as an engineer", "user", FactCategory::ProfileStable, 2, "doc-1");
        consolidated.embedding = vec![1.0, 0.0, 0.0];
        consolidated.document_references = vec![
            crate::models::DocumentReference {
                document_id: "doc-1".to_string(),
                chunk_id: None,
            },
            crate::models::DocumentReference {
                document_id: "doc-2".to_string(),
                chunk_id: None,
            },
        ];

        let mut source_a = MemoryFact::new("works as an engineer", "user", FactCategory::Other, 1, "doc-1");
        source_a.embedding = vec![1.0, 0.0, 0.0];
        source_a.document_references = vec![crate::models::DocumentReference {
            document_id: "doc-1".to_string(),
            chunk_id: None,
        }];

        let mut source_b = MemoryFact::new("works remotely", "user", FactCategory::Other, 1, "doc-2");
        source_b.embedding = vec![1.0, 0.0, 0.0];
        source_b.document_references = vec![crate::models::DocumentReference {
            document_id: "doc-2".to_string(),
            chunk_id: None,
        }];

        index
            .store_batch(&[consolidated.clone(), source_a.clone(), source_b.clone()])
            .await
            .unwrap();

        let engine = QueryEngine::new(index, test_embeddings(server.uri()));
        let result = engine.query("what does the user do", &Filter::default()).await.unwrap();

        assert_eq!(result.consolidated_insights.len(), 1);
        assert_eq!(result.consolidated_insights[0].fact.id, consolidated.id);

        assert_eq!(result.cited_evidence.len(), 2);
        let cited_ids: HashSet<Uuid> = result.cited_evidence.iter().map(|scored| scored.fact.id).collect();
        assert!(cited_ids.contains(&source_a.id));
        assert!(cited_ids.contains(&source_b.id));

        assert!(result.additional_context.is_empty(), "no facts remain outside the consolidated/cited tiers");

        assert_eq!(result.metadata.total_results, 3);
        assert_eq!(result.metadata.cited_evidence_count, 2);
    }
}
