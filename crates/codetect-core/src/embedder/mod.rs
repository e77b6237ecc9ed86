//! Pluggable text-to-vector providers.
//!
//! Two concrete providers: a local HTTP provider posting one text per
//! request (Ollama-style `/api/embeddings`) and an OpenAI-compatible
//! provider posting batches to `/v1/embeddings` with bearer auth. A
//! null provider is always constructible and answers
//! `is_available() == false` so dependent features degrade without
//! branching elsewhere.
//!
//! ## Failure policy
//!
//! Per-text errors propagate out of `embed`; the embedding pipeline is
//! responsible for isolating and skipping failed chunks. Availability
//! is a configuration-level fact -- a provider that is configured but
//! unreachable fails per call, and the searcher folds those failures
//! into an `available: false` response.

mod ollama;
mod openai;

use std::sync::Arc;

use async_trait::async_trait;

pub use ollama::OllamaEmbedder;
pub use openai::OpenAiCompatEmbedder;

use crate::config::{EmbeddingConfig, EmbeddingProviderKind};
use crate::error::{CodetectError, CodetectResult};

/// A text-to-vector provider.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Embed a batch of texts, one vector per input, in input order.
    async fn embed(&self, texts: &[String]) -> CodetectResult<Vec<Vec<f32>>>;

    /// Whether this provider can serve requests at all.
    fn is_available(&self) -> bool;

    /// Stable `provider:model` token used as the stored `model` value,
    /// so multiple models can coexist in storage.
    fn provider_id(&self) -> String;

    /// Output vector length.
    fn dimensions(&self) -> usize;
}

/// Build the provider selected by the configuration.
pub fn from_config(config: &EmbeddingConfig) -> CodetectResult<Arc<dyn Embedder>> {
    match config.provider {
        EmbeddingProviderKind::Ollama => Ok(Arc::new(OllamaEmbedder::new(config)?)),
        EmbeddingProviderKind::Litellm => Ok(Arc::new(OpenAiCompatEmbedder::new(config)?)),
        EmbeddingProviderKind::Off => Ok(Arc::new(NullEmbedder::new(config.dimensions))),
    }
}

/// Provider used when semantic search is disabled.
pub struct NullEmbedder {
    dimensions: usize,
}

impl NullEmbedder {
    /// Build a disabled provider reporting the given dimensions.
    pub fn new(dimensions: usize) -> Self {
        Self { dimensions }
    }
}

#[async_trait]
impl Embedder for NullEmbedder {
    async fn embed(&self, _texts: &[String]) -> CodetectResult<Vec<Vec<f32>>> {
        Err(CodetectError::EmbedderUnavailable {
            reason: "embedding provider is off".into(),
        })
    }

    fn is_available(&self) -> bool {
        false
    }

    fn provider_id(&self) -> String {
        "null".into()
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }
}

/// Deterministic in-process embedder; a test double.
///
/// Produces unit vectors derived from token counts so that texts
/// sharing words land near each other. Good enough to exercise the
/// search pipeline without a provider.
#[cfg(test)]
pub struct StaticEmbedder {
    dimensions: usize,
}

#[cfg(test)]
impl StaticEmbedder {
    pub fn new(dimensions: usize) -> Self {
        Self { dimensions }
    }

    fn embed_one(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; self.dimensions];
        for token in text.split_whitespace() {
            let mut slot = 0usize;
            for byte in token.bytes() {
                slot = slot.wrapping_mul(31).wrapping_add(byte as usize);
            }
            vector[slot % self.dimensions] += 1.0;
        }
        crate::vector::l2_normalize(&mut vector);
        vector
    }
}

#[cfg(test)]
#[async_trait]
impl Embedder for StaticEmbedder {
    async fn embed(&self, texts: &[String]) -> CodetectResult<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|t| self.embed_one(t)).collect())
    }

    fn is_available(&self) -> bool {
        true
    }

    fn provider_id(&self) -> String {
        "static:test".into()
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }
}
