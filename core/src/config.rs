use std::env;

fn parse_env_or<T: std::str::FromStr>(var: &str, default: T) -> T
where
    T::Err: std::fmt::Display,
{
    match env::var(var) {
        Ok(val) => match val.parse() {
            Ok(parsed) => parsed,
            Err(e) => {
                tracing::warn!("Invalid value '{}' for {}: {}. Using default.", val, var, e);
                default
            }
        },
        Err(_) => default,
    }
}

fn parse_env_opt<T: std::str::FromStr>(var: &str) -> Option<T>
where
    T::Err: std::fmt::Display,
{
    match env::var(var) {
        Ok(val) => match val.parse() {
            Ok(parsed) => Some(parsed),
            Err(e) => {
                tracing::warn!("Invalid value '{}' for {}: {}. Ignoring.", val, var, e);
                None
            }
        },
        Err(_) => None,
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub control_store: ControlStoreConfig,
    pub backup: BackupConfig,
    pub llm: Option<LlmConfig>,
    pub embedding: Option<EmbeddingConfig>,
    pub orchestrator: OrchestratorConfig,
    pub chunker: ChunkerConfig,
}

#[derive(Debug, Clone)]
pub struct ControlStoreConfig {
    pub db_path: String,
    pub busy_timeout_ms: u64,
    pub journal_mode: String,
    pub synchronous: String,
    pub max_connections: u32,
}

#[derive(Debug, Clone)]
pub struct BackupConfig {
    pub enabled: bool,
    pub directory: String,
    pub retention_count: usize,
}

/// LLM configuration for chat/completion models — reused almost verbatim
/// from the ambient pattern this crate was grown from.
#[derive(Debug, Clone)]
pub struct LlmConfig {
    pub model: String,
    pub api_key: Option<String>,
    pub base_url: Option<String>,
    pub timeout_secs: u64,
    pub max_retries: u32,
}

#[derive(Debug, Clone)]
pub struct EmbeddingConfig {
    pub model: String,
    pub api_key: Option<String>,
    pub base_url: Option<String>,
    pub dimensions: usize,
    pub batch_size: usize,
}

#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    pub stale_claim_minutes: i64,
    pub process_batch_size: usize,
    pub index_batch_size: usize,
    pub index_batch_size_chat: usize,
    pub poll_interval_secs: u64,
    pub failure_rate_threshold: f32,
    pub batch_deadline_minutes: i64,
}

#[derive(Debug, Clone)]
pub struct ChunkerConfig {
    pub max_chunk_chars: usize,
}

impl Default for ControlStoreConfig {
    fn default() -> Self {
        Self {
            db_path: env::var("DATABASE_URL").unwrap_or_else(|_| "file:twincore.db".to_string()),
            busy_timeout_ms: parse_env_or("DATABASE_BUSY_TIMEOUT_MS", 5000),
            journal_mode: env::var("DATABASE_JOURNAL_MODE").unwrap_or_else(|_| "WAL".to_string()),
            synchronous: env::var("DATABASE_SYNCHRONOUS").unwrap_or_else(|_| "NORMAL".to_string()),
            max_connections: parse_env_or("DATABASE_MAX_CONNECTIONS", 10),
        }
    }
}

impl Default for BackupConfig {
    fn default() -> Self {
        Self {
            enabled: parse_env_or("BACKUP_ENABLED", true),
            directory: env::var("BACKUP_DIRECTORY").unwrap_or_else(|_| "backups".to_string()),
            retention_count: parse_env_or("BACKUP_RETENTION_COUNT", 7),
        }
    }
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            stale_claim_minutes: parse_env_or("ORCHESTRATOR_STALE_CLAIM_MINUTES", 60),
            process_batch_size: parse_env_or("ORCHESTRATOR_PROCESS_BATCH_SIZE", 20),
            index_batch_size: parse_env_or("ORCHESTRATOR_INDEX_BATCH_SIZE", 20),
            index_batch_size_chat: parse_env_or("ORCHESTRATOR_INDEX_BATCH_SIZE_CHAT", 3),
            poll_interval_secs: parse_env_or("ORCHESTRATOR_POLL_INTERVAL_SECS", 30),
            failure_rate_threshold: parse_env_or("ORCHESTRATOR_FAILURE_RATE_THRESHOLD", 0.8),
            batch_deadline_minutes: parse_env_or("ORCHESTRATOR_BATCH_DEADLINE_MINUTES", 30),
        }
    }
}

impl Default for ChunkerConfig {
    fn default() -> Self {
        Self {
            max_chunk_chars: parse_env_or("CHUNKER_MAX_CHUNK_CHARS", 50_000),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            control_store: ControlStoreConfig::default(),
            backup: BackupConfig::default(),
            llm: env::var("LLM_MODEL").ok().map(|model| LlmConfig {
                model,
                api_key: env::var("LLM_API_KEY").ok(),
                base_url: env::var("LLM_BASE_URL").ok(),
                timeout_secs: parse_env_or("LLM_TIMEOUT", 30),
                max_retries: parse_env_or("LLM_MAX_RETRIES", 3),
            }),
            embedding: env::var("EMBEDDING_MODEL").ok().map(|model| EmbeddingConfig {
                model,
                api_key: env::var("EMBEDDING_API_KEY").ok(),
                base_url: env::var("EMBEDDING_BASE_URL").ok(),
                dimensions: parse_env_or("EMBEDDING_DIMENSIONS", 1536),
                batch_size: parse_env_or("EMBEDDING_BATCH_SIZE", 256),
            }),
            orchestrator: OrchestratorConfig::default(),
            chunker: ChunkerConfig::default(),
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        Self::default()
    }
}

/// Known providers that speak an OpenAI-compatible API.
const KNOWN_PROVIDERS: &[&str] = &["openai", "openrouter", "ollama", "lmstudio"];

/// Parse a `provider/model` name into a `(provider, model)` tuple, defaulting
/// to `openai` when no recognized provider prefix is present.
pub fn parse_provider_model(model: &str) -> (&str, &str) {
    if let Some((prefix, rest)) = model.split_once('/') {
        let prefix_lower = prefix.to_lowercase();
        if KNOWN_PROVIDERS.contains(&prefix_lower.as_str()) {
            return (prefix, rest);
        }
    }
    ("openai", model)
}

pub fn parse_llm_provider_model(model: &str) -> (&str, &str) {
    parse_provider_model(model)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    #[serial]
    fn llm_config_is_none_without_model_env_var() {
        std::env::remove_var("LLM_MODEL");
        let config = Config::default();
        assert!(config.llm.is_none());
    }

    #[test]
    #[serial]
    fn llm_config_populates_from_env() {
        std::env::set_var("LLM_MODEL", "openai/gpt-4o-mini");
        std::env::set_var("LLM_MAX_RETRIES", "5");
        let config = Config::default();
        let llm = config.llm.expect("llm config should be present");
        assert_eq!(llm.model, "openai/gpt-4o-mini");
        assert_eq!(llm.max_retries, 5);
        std::env::remove_var("LLM_MODEL");
        std::env::remove_var("LLM_MAX_RETRIES");
    }

    #[test]
    #[serial]
    fn control_store_defaults_match_reference_pragmas() {
        std::env::remove_var("DATABASE_BUSY_TIMEOUT_MS");
        std::env::remove_var("DATABASE_JOURNAL_MODE");
        let config = ControlStoreConfig::default();
        assert_eq!(config.busy_timeout_ms, 5000);
        assert_eq!(config.journal_mode, "WAL");
    }

    #[test]
    fn parse_provider_model_recognizes_known_prefixes() {
        assert_eq!(parse_provider_model("openai/gpt-4o-mini"), ("openai", "gpt-4o-mini"));
        assert_eq!(parse_provider_model("ollama/llama3"), ("ollama", "llama3"));
        assert_eq!(parse_provider_model("gpt-4o-mini"), ("openai", "gpt-4o-mini"));
    }

    #[test]
    fn orchestrator_defaults_match_spec_batch_sizes() {
        let config = OrchestratorConfig::default();
        assert_eq!(config.index_batch_size, 20);
        assert_eq!(config.index_batch_size_chat, 3);
    }
}
