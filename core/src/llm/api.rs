use std::time::Duration;

use serde_json::Value;

use async_openai::{
    config::OpenAIConfig,
    error::{ApiError, OpenAIError},
    types::{
        ChatCompletionNamedToolChoice, ChatCompletionRequestSystemMessageArgs,
        ChatCompletionRequestUserMessageArgs, ChatCompletionTool, ChatCompletionToolChoiceOption,
        ChatCompletionToolType, CreateChatCompletionRequest, CreateChatCompletionRequestArgs,
        CreateChatCompletionResponse, FunctionName, FunctionObjectArgs,
    },
    Client,
};

use crate::{
    config::{parse_llm_provider_model, LlmConfig},
    error::{CoreError, Result},
};

const OPENAI_BASE_URL: &str = "https://api.openai.com/v1";
const OPENROUTER_BASE_URL: &str = "https://openrouter.ai/api/v1";
const OLLAMA_BASE_URL: &str = "http://localhost:11434/v1";

/// A function-calling tool definition: name, human-readable description, and
/// a JSON Schema object describing its parameters.
#[derive(Debug, Clone)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

/// A single tool invocation the model chose to make, with arguments already
/// parsed out of the wire-format JSON string.
#[derive(Debug, Clone)]
pub struct ToolCall {
    pub name: String,
    pub arguments: Value,
}

#[derive(Debug, Clone)]
struct ApiConfig {
    base_url: String,
    api_key: Option<String>,
    model: String,
    timeout_secs: u64,
    max_retries: u32,
}

#[derive(Clone)]
pub struct LlmApiClient {
    client: Client<OpenAIConfig>,
    config: ApiConfig,
}

impl LlmApiClient {
    pub fn new(config: &LlmConfig) -> Result<Self> {
        let api_config = ApiConfig::from_llm_config(config);

        let (provider, _) = parse_llm_provider_model(&config.model);
        let needs_api_key = !matches!(provider.to_lowercase().as_str(), "ollama" | "lmstudio");

        if needs_api_key && api_config.api_key.is_none() {
            return Err(CoreError::Llm("API key required for this provider".to_string()));
        }

        let openai_config = OpenAIConfig::new()
            .with_api_base(api_config.base_url.clone())
            .with_api_key(api_config.api_key.clone().unwrap_or_default());

        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(api_config.timeout_secs))
            .build()
            .map_err(|error| CoreError::Llm(format!("failed to create LLM HTTP client: {error}")))?;

        // Configure async-openai's internal backoff to respect our timeout.
        // Without this it retries 500 errors with exponential backoff for up
        // to 15 minutes (the default max_elapsed_time), independent of this
        // client's own retry loop in complete_with_tools().
        let backoff = backoff::ExponentialBackoff {
            max_elapsed_time: Some(Duration::from_secs(api_config.timeout_secs)),
            ..Default::default()
        };

        let client = Client::with_config(openai_config)
            .with_http_client(http_client)
            .with_backoff(backoff);

        Ok(Self {
            client,
            config: api_config,
        })
    }

    /// Issues a chat completion constrained to a fixed set of function-calling
    /// tools. Used by the Fact Extractor (a single `extract_facts` tool) and
    /// the Consolidator (the `add`/`update`/`delete`/`none` decision tools).
    /// Returns every tool call the model made, in the order the model
    /// returned them.
    pub async fn complete_with_tools(
        &self,
        system_prompt: &str,
        user_prompt: &str,
        tools: &[ToolDefinition],
        force_tool: Option<&str>,
    ) -> Result<Vec<ToolCall>> {
        if user_prompt.trim().is_empty() {
            return Err(CoreError::Validation("prompt cannot be empty".to_string()));
        }

        let mut last_error: Option<CoreError> = None;

        for attempt in 0..=self.config.max_retries {
            if attempt > 0 {
                let delay_ms = 100 * 2_u64.pow(attempt - 1);
                tokio::time::sleep(Duration::from_millis(delay_ms)).await;
            }

            let request = self.build_tools_request(system_prompt, user_prompt, tools, force_tool)?;

            match self.client.chat().create(request).await {
                Ok(response) => return Self::extract_tool_calls(response),
                Err(error) => {
                    if let Some(rate_limit_error) = Self::rate_limit_error(&error) {
                        return Err(rate_limit_error);
                    }

                    if let Some(auth_error) = Self::auth_error(&error) {
                        return Err(auth_error);
                    }

                    let retryable = Self::is_retryable(&error);
                    let mapped_error = Self::map_openai_error(error);

                    if retryable && attempt < self.config.max_retries {
                        last_error = Some(mapped_error);
                        continue;
                    }

                    return Err(mapped_error);
                }
            }
        }

        Err(last_error.unwrap_or_else(|| CoreError::Llm("LLM tool call failed after retries".to_string())))
    }

    fn build_tools_request(
        &self,
        system_prompt: &str,
        user_prompt: &str,
        tools: &[ToolDefinition],
        force_tool: Option<&str>,
    ) -> Result<CreateChatCompletionRequest> {
        let messages = vec![
            ChatCompletionRequestSystemMessageArgs::default()
                .content(system_prompt)
                .build()
                .map_err(|error| CoreError::Validation(format!("invalid system prompt: {error}")))?
                .into(),
            ChatCompletionRequestUserMessageArgs::default()
                .content(user_prompt)
                .build()
                .map_err(|error| CoreError::Validation(format!("invalid user prompt: {error}")))?
                .into(),
        ];

        let chat_tools: Vec<ChatCompletionTool> = tools
            .iter()
            .map(|tool| -> Result<ChatCompletionTool> {
                let function = FunctionObjectArgs::default()
                    .name(tool.name.clone())
                    .description(tool.description.clone())
                    .parameters(tool.parameters.clone())
                    .build()
                    .map_err(|error| CoreError::Validation(format!("invalid tool definition: {error}")))?;
                Ok(ChatCompletionTool {
                    r#type: ChatCompletionToolType::Function,
                    function,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        let mut request = CreateChatCompletionRequestArgs::default();
        request
            .model(self.config.model.clone())
            .messages(messages)
            .tools(chat_tools);

        match force_tool {
            Some(name) => {
                request.tool_choice(ChatCompletionToolChoiceOption::Named(ChatCompletionNamedToolChoice {
                    r#type: ChatCompletionToolType::Function,
                    function: FunctionName { name: name.to_string() },
                }));
            }
            None => {
                request.tool_choice(ChatCompletionToolChoiceOption::Required);
            }
        }

        request
            .build()
            .map_err(|error| CoreError::Validation(format!("invalid LLM tool-call request: {error}")))
    }

    fn extract_tool_calls(response: CreateChatCompletionResponse) -> Result<Vec<ToolCall>> {
        let message = response
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| CoreError::Llm("LLM response contained no choices".to_string()))?
            .message;

        let tool_calls = message
            .tool_calls
            .ok_or_else(|| CoreError::Llm("LLM response made no tool calls".to_string()))?;

        tool_calls
            .into_iter()
            .map(|tc| {
                let arguments = serde_json::from_str(&tc.function.arguments).map_err(|e| {
                    CoreError::Llm(format!("failed to parse tool call arguments: {e}"))
                })?;
                Ok(ToolCall {
                    name: tc.function.name,
                    arguments,
                })
            })
            .collect()
    }

    fn is_retryable(error: &OpenAIError) -> bool {
        match error {
            OpenAIError::ApiError(api_error) => api_error.r#type.is_none() && api_error.code.is_none(),
            OpenAIError::Reqwest(reqwest_error) => reqwest_error
                .status()
                .map(|status| status.is_server_error())
                .unwrap_or(true),
            _ => false,
        }
    }

    fn rate_limit_error(error: &OpenAIError) -> Option<CoreError> {
        match error {
            OpenAIError::Reqwest(reqwest_error)
                if reqwest_error.status() == Some(reqwest::StatusCode::TOO_MANY_REQUESTS) =>
            {
                Some(CoreError::LlmRateLimit { retry_after: None })
            }
            OpenAIError::ApiError(api_error) if Self::is_rate_limit_api_error(api_error) => {
                Some(CoreError::LlmRateLimit { retry_after: None })
            }
            _ => None,
        }
    }

    fn auth_error(error: &OpenAIError) -> Option<CoreError> {
        match error {
            OpenAIError::Reqwest(reqwest_error)
                if reqwest_error.status() == Some(reqwest::StatusCode::UNAUTHORIZED)
                    || reqwest_error.status() == Some(reqwest::StatusCode::FORBIDDEN) =>
            {
                Some(CoreError::LlmAuth(format!("LLM authentication failed: {reqwest_error}")))
            }
            OpenAIError::ApiError(api_error) if Self::is_auth_api_error(api_error) => {
                Some(CoreError::LlmAuth(format!("LLM authentication failed: {api_error}")))
            }
            _ => None,
        }
    }

    fn is_rate_limit_api_error(api_error: &ApiError) -> bool {
        let message = api_error.message.to_lowercase();
        let error_type = api_error.r#type.clone().unwrap_or_default().to_lowercase();
        let code = api_error.code.clone().unwrap_or_default().to_lowercase();

        message.contains("rate limit")
            || message.contains("too many requests")
            || error_type.contains("rate_limit")
            || code.contains("rate_limit")
            || code == "insufficient_quota"
    }

    fn is_auth_api_error(api_error: &ApiError) -> bool {
        let message = api_error.message.to_lowercase();
        let error_type = api_error.r#type.clone().unwrap_or_default().to_lowercase();
        let code = api_error.code.clone().unwrap_or_default().to_lowercase();

        message.contains("unauthorized")
            || message.contains("forbidden")
            || message.contains("authentication")
            || message.contains("invalid api key")
            || code.contains("invalid_api_key")
            || code.contains("authentication")
            || error_type.contains("authentication")
    }

    fn map_openai_error(error: OpenAIError) -> CoreError {
        match error {
            OpenAIError::Reqwest(reqwest_error) => CoreError::Llm(format!("LLM request failed: {reqwest_error}")),
            OpenAIError::ApiError(api_error) => CoreError::Llm(format!("LLM API error: {api_error}")),
            OpenAIError::JSONDeserialize(err) => CoreError::Llm(format!("failed to parse LLM response: {err}")),
            OpenAIError::InvalidArgument(message) => CoreError::Validation(message),
            other => CoreError::Llm(other.to_string()),
        }
    }
}

impl ApiConfig {
    fn from_llm_config(config: &LlmConfig) -> Self {
        let (provider, model) = parse_llm_provider_model(&config.model);

        let base_url = config
            .base_url
            .clone()
            .unwrap_or_else(|| default_base_url(provider).to_string());

        Self {
            base_url,
            api_key: config.api_key.clone(),
            model: model.to_string(),
            timeout_secs: config.timeout_secs,
            max_retries: config.max_retries,
        }
    }
}

fn default_base_url(provider: &str) -> &'static str {
    match provider.to_lowercase().as_str() {
        "openai" => OPENAI_BASE_URL,
        "openrouter" => OPENROUTER_BASE_URL,
        "ollama" => OLLAMA_BASE_URL,
        "lmstudio" => "http://localhost:1234/v1",
        _ => OPENAI_BASE_URL,
    }
}
