use std::time::Duration;

use crate::error::{CoreError, Result};
use crate::llm::{prompts, LlmProvider};

const MAX_RETRIES: u32 = 3;
const RETRY_DELAY: Duration = Duration::from_millis(500);

/// Fact Extractor (component E): turns a single document chunk's content
/// into a list of atomic fact strings via one tool-call LLM completion.
pub struct FactExtractor {
    llm: LlmProvider,
}

impl FactExtractor {
    pub fn new(llm: LlmProvider) -> Self {
        Self { llm }
    }

    /// Whitespace-only input short-circuits to an empty list without
    /// touching the LLM. On transport failure, retries up to `MAX_RETRIES`
    /// times with linear backoff before returning the last error; the caller
    /// is responsible for recording the owning chunk as failed.
    pub async fn extract(&self, content: &str) -> Result<Vec<String>> {
        if content.trim().is_empty() {
            return Ok(Vec::new());
        }

        let tool = prompts::extract_facts_tool();
        let mut last_error: Option<CoreError> = None;

        for attempt in 0..=MAX_RETRIES {
            if attempt > 0 {
                tokio::time::sleep(RETRY_DELAY * attempt).await;
            }

            match self
                .llm
                .complete_with_tools(
                    prompts::extraction_system_prompt(),
                    content,
                    std::slice::from_ref(&tool),
                    Some(prompts::EXTRACT_FACTS_TOOL),
                )
                .await
            {
                Ok(calls) => {
                    let call = calls
                        .into_iter()
                        .next()
                        .ok_or_else(|| CoreError::Processing("extractor received no tool call".to_string()))?;
                    return Ok(prompts::facts_from_tool_arguments(&call.arguments));
                }
                Err(error) => {
                    tracing::warn!(attempt, error = %error, "fact extraction attempt failed");
                    last_error = Some(error);
                }
            }
        }

        Err(last_error.unwrap_or_else(|| CoreError::Processing("fact extraction failed after retries".to_string())))
    }
}
