//! OpenAI-compatible embedding provider.
//!
//! Posts whole batches to `/v1/embeddings` with bearer-token auth.
//! The response's `data` array is re-sorted by its `index` field
//! before returning; providers are allowed to answer out of order.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::Embedder;
use crate::config::EmbeddingConfig;
use crate::error::{CodetectError, CodetectResult};

/// Batch embedding provider for LiteLLM and other OpenAI-compatible
/// gateways.
pub struct OpenAiCompatEmbedder {
    client: reqwest::Client,
    endpoint: String,
    api_key: Option<String>,
    model: String,
    dimensions: usize,
}

#[derive(Serialize)]
struct BatchRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Deserialize)]
struct BatchResponse {
    data: Vec<BatchItem>,
}

#[derive(Deserialize)]
struct BatchItem {
    index: usize,
    embedding: Vec<f32>,
}

impl OpenAiCompatEmbedder {
    /// Build the provider from configuration.
    pub fn new(config: &EmbeddingConfig) -> CodetectResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            client,
            endpoint: format!("{}/v1/embeddings", config.litellm_url.trim_end_matches('/')),
            api_key: config.litellm_api_key.clone(),
            model: config.model.clone(),
            dimensions: config.dimensions,
        })
    }

    fn sort_by_index(mut items: Vec<BatchItem>, expected: usize) -> CodetectResult<Vec<Vec<f32>>> {
        if items.len() != expected {
            return Err(CodetectError::Embed {
                message: format!(
                    "provider returned {} embeddings for {expected} inputs",
                    items.len()
                ),
            });
        }
        items.sort_unstable_by_key(|item| item.index);
        Ok(items.into_iter().map(|item| item.embedding).collect())
    }
}

#[async_trait]
impl Embedder for OpenAiCompatEmbedder {
    async fn embed(&self, texts: &[String]) -> CodetectResult<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let mut request = self.client.post(&self.endpoint).json(&BatchRequest {
            model: &self.model,
            input: texts,
        });
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().await?.error_for_status()?;
        let parsed: BatchResponse = response.json().await?;
        Self::sort_by_index(parsed.data, texts.len())
    }

    fn is_available(&self) -> bool {
        true
    }

    fn provider_id(&self) -> String {
        format!("litellm:{}", self.model)
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_out_of_order_response_is_resorted() {
        let items = vec![
            BatchItem {
                index: 2,
                embedding: vec![2.0],
            },
            BatchItem {
                index: 0,
                embedding: vec![0.0],
            },
            BatchItem {
                index: 1,
                embedding: vec![1.0],
            },
        ];
        let sorted = OpenAiCompatEmbedder::sort_by_index(items, 3).expect("sort");
        assert_eq!(sorted, vec![vec![0.0], vec![1.0], vec![2.0]]);
    }

    #[test]
    fn test_count_mismatch_is_an_error() {
        let items = vec![BatchItem {
            index: 0,
            embedding: vec![0.0],
        }];
        let result = OpenAiCompatEmbedder::sort_by_index(items, 2);
        assert!(matches!(result, Err(CodetectError::Embed { .. })));
    }

    #[test]
    fn test_provider_id_is_stable_token() {
        let mut config = EmbeddingConfig::default();
        config.model = "text-embedding-3-small".into();
        let embedder = OpenAiCompatEmbedder::new(&config).expect("build");
        assert_eq!(embedder.provider_id(), "litellm:text-embedding-3-small");
    }
}
