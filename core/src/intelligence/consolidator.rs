use std::sync::Arc;

use chrono::Utc;

use crate::embeddings::EmbeddingProvider;
use crate::error::{CoreError, Result};
use crate::index::VectorIndex;
use crate::llm::{prompts, LlmProvider};
use crate::models::{Filter, MemoryFact};

use super::types::{ConsolidationDecision, ConsolidationOutcome, FactOrigin};

const DEFAULT_NEIGHBOR_LIMIT: usize = 10;

/// Consolidator (component F): for each extracted fact, retrieves semantic
/// neighbors, asks the LLM to pick add/update/delete/none, and commits that
/// decision synchronously before the next fact is considered.
pub struct Consolidator {
    llm: LlmProvider,
    embeddings: EmbeddingProvider,
    index: Arc<dyn VectorIndex>,
    neighbor_limit: usize,
}

impl Consolidator {
    pub fn new(llm: LlmProvider, embeddings: EmbeddingProvider, index: Arc<dyn VectorIndex>) -> Self {
        Self {
            llm,
            embeddings,
            index,
            neighbor_limit: DEFAULT_NEIGHBOR_LIMIT,
        }
    }

    pub async fn consolidate(&self, fact_content: &str, origin: &FactOrigin) -> Result<ConsolidationOutcome> {
        let query_embedding = self.embeddings.embed_single(fact_content).await?;

        let neighbor_filter = Filter {
            limit: Some(self.neighbor_limit),
            ..Default::default()
        };
        // Retrieval failure is fatal to this fact — propagate rather than skip.
        let neighbors = self.index.query(&query_embedding, &neighbor_filter).await?;

        if !self.llm.is_available() {
            return Err(CoreError::LlmUnavailable(
                "no LLM configured for consolidation decisions".to_string(),
            ));
        }

        let tools = prompts::consolidation_tools();
        let user_prompt = prompts::consolidation_user_prompt(fact_content, &neighbors.facts);

        let calls = match self
            .llm
            .complete_with_tools(prompts::consolidation_system_prompt(), &user_prompt, &tools, None)
            .await
        {
            Ok(calls) => calls,
            Err(error) => {
                tracing::warn!(error = %error, "consolidation decision call failed, skipping fact");
                return Ok(ConsolidationOutcome::None);
            }
        };

        let Some(call) = calls.into_iter().next() else {
            tracing::warn!("consolidation LLM made no tool call, skipping fact");
            return Ok(ConsolidationOutcome::None);
        };

        let decision = match ConsolidationDecision::from_tool_call(&call) {
            Ok(decision) => decision,
            Err(reason) => {
                tracing::warn!(%reason, "coercing malformed consolidation decision to skip");
                return Ok(ConsolidationOutcome::None);
            }
        };

        self.commit(fact_content, decision, origin).await
    }

    async fn commit(
        &self,
        fact_content: &str,
        decision: ConsolidationDecision,
        origin: &FactOrigin,
    ) -> Result<ConsolidationOutcome> {
        match decision {
            ConsolidationDecision::Add { content } => {
                let revised = if content.trim().is_empty() {
                    fact_content.to_string()
                } else {
                    content
                };

                let embedding = self.embeddings.embed_single(&revised).await?;

                let mut fact = MemoryFact::new(
                    revised,
                    origin.subject.clone(),
                    crate::models::FactCategory::Other,
                    1,
                    origin.source.clone(),
                );
                fact.timestamp = origin.timestamp;
                fact.embedding = embedding;
                fact.document_references.push(origin.document_reference.clone());

                let mut metadata = origin.metadata.clone();
                if let Some(turn_id) = &origin.original_turn_id {
                    metadata.insert("original_turn_id".to_string(), turn_id.clone());
                }
                if let Some(preview) = &origin.original_turn_content_preview {
                    metadata.insert(
                        "original_turn_content_preview".to_string(),
                        truncate_with_ellipsis(preview, 50),
                    );
                }
                metadata.insert("fact_index_in_turn".to_string(), origin.fact_index_in_turn.to_string());
                fact.metadata = metadata;

                self.index.store_batch(&[fact.clone()]).await?;
                Ok(ConsolidationOutcome::Added(fact))
            }
            ConsolidationDecision::Update { id, content, .. } => {
                let mut existing = self
                    .index
                    .get_by_id(id)
                    .await?
                    .ok_or_else(|| CoreError::NotFound(format!("fact {id} not found for update")))?;
                existing.content = content;
                existing.timestamp = Utc::now();
                existing
                    .metadata
                    .insert("_consolidated_via_update".to_string(), "true".to_string());
                self.index.update(&existing).await?;
                Ok(ConsolidationOutcome::Updated(existing))
            }
            ConsolidationDecision::Delete { id, .. } => {
                self.index.delete(id).await?;
                Ok(ConsolidationOutcome::Deleted(id))
            }
            ConsolidationDecision::None { .. } => Ok(ConsolidationOutcome::None),
        }
    }
}

fn truncate_with_ellipsis(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let truncated: String = text.chars().take(max_chars).collect();
    format!("{truncated}...")
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use serde_json::json;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;
    use crate::config::{EmbeddingConfig, LlmConfig};
    use crate::index::InMemoryVectorIndex;
    use crate::models::DocumentReference;

    fn test_origin() -> FactOrigin {
        FactOrigin {
            subject: "primaryUser".to_string(),
            document_reference: DocumentReference {
                document_id: "doc-1".to_string(),
                chunk_id: Some("doc-1#chunk1".to_string()),
            },
            timestamp: Utc::now(),
            source: "test".to_string(),
            metadata: HashMap::new(),
            original_turn_id: Some("turn-1".to_string()),
            original_turn_content_preview: Some("the original turn content".to_string()),
            fact_index_in_turn: 0,
        }
    }

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

    fn test_llm(base_url: String) -> LlmProvider {
        LlmProvider::new(Some(&LlmConfig {
            model: "openai/gpt-4o-mini".to_string(),
            api_key: Some("test-key".to_string()),
            base_url: Some(base_url),
            timeout_secs: 5,
            max_retries: 0,
        }))
    }

    fn embeddings_response(vector: Vec<f32>) -> serde_json::Value {
        json!({
            "object": "list",
            "data": [{ "object": "embedding", "embedding": vector, "index": 0 }],
            "model": "text-embedding-3-small",
            "usage": { "prompt_tokens": 1, "total_tokens": 1 }
        })
    }

    fn tool_call_response(tool_name: &str, arguments: &str) -> serde_json::Value {
        json!({
            "id": "chatcmpl-test",
            "object": "chat.completion",
            "created": 1,
            "model": "gpt-4o-mini",
            "choices": [{
                "index": 0,
                "message": {
                    "role": "assistant",
                    "content": null,
                    "tool_calls": [{
                        "id": "call_1",
                        "type": "function",
                        "function": { "name": tool_name, "arguments": arguments }
                    }]
                },
                "finish_reason": "tool_calls"
            }],
            "usage": { "prompt_tokens": 10, "completion_tokens": 10, "total_tokens": 20 }
        })
    }

    #[tokio::test]
    async fn add_decision_stores_a_new_fact_with_stamped_metadata() {
        let embedding_server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/embeddings"))
            .respond_with(ResponseTemplate::new(200).set_body_json(embeddings_response(vec![1.0, 0.0, 0.0])))
            .mount(&embedding_server)
            .await;

        let llm_server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(200).set_body_json(tool_call_response("add", "{}")))
            .mount(&llm_server)
            .await;

        let index: Arc<dyn VectorIndex> = Arc::new(InMemoryVectorIndex::new());
        let consolidator = Consolidator::new(
            test_llm(llm_server.uri()),
            test_embeddings(embedding_server.uri()),
            index.clone(),
        );

        let origin = test_origin();
        let outcome = consolidator
            .consolidate("User lives in San Francisco", &origin)
            .await
            .unwrap();

        match outcome {
            ConsolidationOutcome::Added(fact) => {
                assert_eq!(fact.content, "User lives in San Francisco");
                assert_eq!(fact.timestamp, origin.timestamp);
                assert_eq!(fact.metadata.get("original_turn_id"), Some(&"turn-1".to_string()));
                assert_eq!(fact.metadata.get("fact_index_in_turn"), Some(&"0".to_string()));
                assert_eq!(fact.document_references.len(), 1);
            }
            other => panic!("expected Added, got {other:?}"),
        }

        assert!(index.get_facts_by_ids(&[]).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn none_decision_leaves_the_index_untouched() {
        let embedding_server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/embeddings"))
            .respond_with(ResponseTemplate::new(200).set_body_json(embeddings_response(vec![1.0, 0.0, 0.0])))
            .mount(&embedding_server)
            .await;

        let llm_server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(200).set_body_json(tool_call_response("none", r#"{"reason":"duplicate"}"#)))
            .mount(&llm_server)
            .await;

        let index: Arc<dyn VectorIndex> = Arc::new(InMemoryVectorIndex::new());
        let consolidator = Consolidator::new(
            test_llm(llm_server.uri()),
            test_embeddings(embedding_server.uri()),
            index,
        );

        let outcome = consolidator.consolidate("already known fact", &test_origin()).await.unwrap();
        assert!(matches!(outcome, ConsolidationOutcome::None));
    }

    #[test]
    fn truncate_with_ellipsis_preserves_short_strings() {
        assert_eq!(truncate_with_ellipsis("short", 50), "short");
    }

    #[test]
    fn truncate_with_ellipsis_caps_long_strings() {
        let long = "a".repeat(60);
        let truncated = truncate_with_ellipsis(&long, 50);
        assert_eq!(truncated.chars().count(), 53);
        assert!(truncated.ends_with("..."));
    }
}
