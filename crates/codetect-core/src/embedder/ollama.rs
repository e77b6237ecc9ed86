//! Local HTTP embedding provider.
//!
//! Speaks the `/api/embeddings` shape: one text per request, JSON
//! `{model, prompt}` in, `{embedding}` out. Requests share one client
//! with the configured timeout.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::Embedder;
use crate::config::EmbeddingConfig;
use crate::error::{CodetectError, CodetectResult};

/// Ollama-style local embedding provider.
pub struct OllamaEmbedder {
    client: reqwest::Client,
    endpoint: String,
    model: String,
    dimensions: usize,
}

#[derive(Serialize)]
struct EmbedRequest<'a> {
    model: &'a str,
    prompt: &'a str,
}

#[derive(Deserialize)]
struct EmbedResponse {
    embedding: Vec<f32>,
}

impl OllamaEmbedder {
    /// Build the provider from configuration.
    pub fn new(config: &EmbeddingConfig) -> CodetectResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            client,
            endpoint: format!("{}/api/embeddings", config.ollama_url.trim_end_matches('/')),
            model: config.model.clone(),
            dimensions: config.dimensions,
        })
    }
}

#[async_trait]
impl Embedder for OllamaEmbedder {
    async fn embed(&self, texts: &[String]) -> CodetectResult<Vec<Vec<f32>>> {
        let mut vectors = Vec::with_capacity(texts.len());
        for text in texts {
            let response = self
                .client
                .post(&self.endpoint)
                .json(&EmbedRequest {
                    model: &self.model,
                    prompt: text,
                })
                .send()
                .await?
                .error_for_status()?;

            let parsed: EmbedResponse = response.json().await?;
            if parsed.embedding.is_empty() {
                return Err(CodetectError::Embed {
                    message: "provider returned an empty embedding".into(),
                });
            }
            vectors.push(parsed.embedding);
        }
        Ok(vectors)
    }

    fn is_available(&self) -> bool {
        true
    }

    fn provider_id(&self) -> String {
        format!("ollama:{}", self.model)
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }
}
