use std::sync::Arc;

use crate::config::{parse_llm_provider_model, LlmConfig};
use crate::error::{CoreError, Result};
use crate::llm::api::{LlmApiClient, ToolCall, ToolDefinition};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LlmBackend {
    OpenAI,
    OpenRouter,
    Ollama,
    LmStudio,
    OpenAICompatible { base_url: String },
    Unavailable { reason: String },
}

/// Selects which LLM wire protocol to speak, resolved once from
/// [`LlmConfig::model`] and cached for the lifetime of the provider. Falls
/// back to [`LlmBackend::Unavailable`] when no configuration was supplied at
/// all, so callers (the Extractor, the Consolidator) can degrade gracefully
/// instead of panicking on a missing LLM.
#[derive(Debug, Clone)]
pub struct LlmProvider {
    backend: LlmBackend,
    config: Option<Arc<LlmConfig>>,
}

impl LlmProvider {
    pub fn new(config: Option<&LlmConfig>) -> Self {
        let Some(config) = config else {
            return Self::unavailable("No LLM configuration provided");
        };

        let (provider, _model) = parse_llm_provider_model(&config.model);

        let backend = match provider.to_lowercase().as_str() {
            "openai" => LlmBackend::OpenAI,
            "openrouter" => LlmBackend::OpenRouter,
            "ollama" => LlmBackend::Ollama,
            "lmstudio" => LlmBackend::LmStudio,
            _ => {
                if let Some(base_url) = &config.base_url {
                    LlmBackend::OpenAICompatible {
                        base_url: base_url.clone(),
                    }
                } else {
                    LlmBackend::Unavailable {
                        reason: format!("Unknown provider in model: {}", config.model),
                    }
                }
            }
        };

        Self {
            backend,
            config: Some(Arc::new(config.clone())),
        }
    }

    pub fn unavailable(reason: &str) -> Self {
        Self {
            backend: LlmBackend::Unavailable {
                reason: reason.to_string(),
            },
            config: None,
        }
    }

    pub fn is_available(&self) -> bool {
        !matches!(self.backend, LlmBackend::Unavailable { .. })
    }

    pub fn backend(&self) -> &LlmBackend {
        &self.backend
    }

    pub fn config(&self) -> Option<&LlmConfig> {
        self.config.as_deref()
    }

    /// Drives a tool-call completion, forcing the model to respond through
    /// one of `tools`. `force_tool` names a single tool the model must call;
    /// leaving it `None` lets the model pick among `tools` (the shape the
    /// Consolidator needs, since it must choose between add/update/delete/none).
    pub async fn complete_with_tools(
        &self,
        system_prompt: &str,
        user_prompt: &str,
        tools: &[ToolDefinition],
        force_tool: Option<&str>,
    ) -> Result<Vec<ToolCall>> {
        let client = self.client()?;
        client
            .complete_with_tools(system_prompt, user_prompt, tools, force_tool)
            .await
    }

    fn client(&self) -> Result<LlmApiClient> {
        if !self.is_available() {
            return Err(CoreError::LlmUnavailable(self.unavailable_reason()));
        }

        let config = self
            .config()
            .ok_or_else(|| CoreError::LlmUnavailable("No config available".to_string()))?;

        LlmApiClient::new(config)
    }

    fn unavailable_reason(&self) -> String {
        match &self.backend {
            LlmBackend::Unavailable { reason } => reason.clone(),
            _ => "LLM completion is not implemented yet".to_string(),
        }
    }
}
