use async_openai::config::OpenAIConfig;
use async_openai::types::{CreateEmbeddingRequestArgs, EmbeddingInput};
use async_openai::Client;

use crate::config::EmbeddingConfig;
use crate::error::{CoreError, Result};

/// Embedding Port (component D): an adapter over an OpenAI-compatible
/// embeddings endpoint. The wire format returns 64-bit floats; this adapter
/// narrows them to 32-bit floats at the boundary, which is the precision
/// [`crate::models::MemoryFact::embedding`] and the Vector Index Port use
/// throughout — the narrowing is lossy but acceptable for nearest-neighbor
/// ranking.
pub struct EmbeddingProvider {
    client: Client<OpenAIConfig>,
    model: String,
    batch_size: usize,
}

impl EmbeddingProvider {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let (_, model_name) = crate::config::parse_provider_model(&config.model);

        let mut openai_config = OpenAIConfig::new().with_api_key(config.api_key.clone().unwrap_or_default());
        if let Some(base_url) = &config.base_url {
            openai_config = openai_config.with_api_base(base_url.clone());
        }

        Ok(Self {
            client: Client::with_config(openai_config),
            model: model_name.to_string(),
            batch_size: config.batch_size.max(1),
        })
    }

    pub async fn embed_single(&self, text: &str) -> Result<Vec<f32>> {
        let embeddings = self.embed(vec![text.to_string()]).await?;
        embeddings
            .into_iter()
            .next()
            .ok_or_else(|| CoreError::Embedding("no embedding returned for single input".to_string()))
    }

    /// Batches requests at `batch_size` to stay within provider request
    /// limits. Empty input returns an empty result without a network call.
    pub async fn embed(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let mut results = Vec::with_capacity(texts.len());
        for batch in texts.chunks(self.batch_size) {
            let request = CreateEmbeddingRequestArgs::default()
                .model(self.model.clone())
                .input(EmbeddingInput::StringArray(batch.to_vec()))
                .build()
                .map_err(|e| CoreError::Embedding(e.to_string()))?;

            tracing::debug!(batch_len = batch.len(), model = %self.model, "requesting embeddings");

            let response = self
                .client
                .embeddings()
                .create(request)
                .await
                .map_err(|e| CoreError::Embedding(e.to_string()))?;

            for item in response.data {
                results.push(narrow_to_f32(&item.embedding));
            }
        }

        Ok(results)
    }
}

fn narrow_to_f32(values: &[f32]) -> Vec<f32> {
    // async-openai's typed response already hands back f32; the narrowing
    // step exists so any future raw-f64 provider slots in here unchanged.
    values.to_vec()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn embed_with_empty_input_makes_no_network_call() {
        let provider = EmbeddingProvider::new(&EmbeddingConfig {
            model: "openai/text-embedding-3-small".to_string(),
            api_key: None,
            base_url: None,
            dimensions: 1536,
            batch_size: 256,
        })
        .unwrap();

        let result = provider.embed(vec![]).await.unwrap();
        assert!(result.is_empty());
    }
}
