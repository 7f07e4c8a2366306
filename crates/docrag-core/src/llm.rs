//! AI provider trait and request types

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::Result;

/// Parameters of a single completion call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletionRequest {
    pub prompt: String,
    pub system: Option<String>,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
}

impl CompletionRequest {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            system: None,
            temperature: None,
            max_tokens: None,
        }
    }

    pub fn with_system(mut self, system: impl Into<String>) -> Self {
        self.system = Some(system.into());
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }
}

/// Trait for embedding and completion providers (e.g., Mistral)
///
/// Implementations perform exactly one remote call per method invocation.
/// Retries, backoff, pacing and caching are layered on top by the caller.
#[async_trait]
pub trait AiProvider: Send + Sync {
    /// Embed a single text
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// Embed several texts in one call, preserving order
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut vectors = Vec::with_capacity(texts.len());
        for text in texts {
            vectors.push(self.embed(text).await?);
        }
        Ok(vectors)
    }

    /// Generate a completion
    async fn complete(&self, request: &CompletionRequest) -> Result<String>;

    /// Model used for embeddings
    fn embedding_model(&self) -> &str;

    /// Model used for completions
    fn completion_model(&self) -> &str;

    /// Dimension of every vector returned by `embed`
    fn dimensions(&self) -> usize;
}
