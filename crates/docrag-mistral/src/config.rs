//! Mistral configuration

use docrag_core::{Error, Result};
use serde::{Deserialize, Serialize};
use std::env;
use std::time::Duration;

pub const DEFAULT_API_URL: &str = "https://api.mistral.ai";
pub const DEFAULT_COMPLETION_MODEL: &str = "mistral-large-latest";
pub const DEFAULT_EMBEDDING_MODEL: &str = "mistral-embed";
pub const DEFAULT_DIMENSION: usize = 1024;

/// Configuration for the Mistral AI client
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MistralConfig {
    pub api_key: String,
    pub api_url: String,
    pub completion_model: String,
    pub embedding_model: String,
    pub dimension: usize,
    pub timeout: Duration,
}

impl MistralConfig {
    /// Create configuration from environment variables
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();

        let api_key = env::var("MISTRAL_API_KEY")
            .ok()
            .filter(|key| !key.trim().is_empty())
            .ok_or_else(|| {
                Error::Configuration("MISTRAL_API_KEY environment variable not found".to_string())
            })?;

        let mut config = Self::new(api_key);
        if let Ok(url) = env::var("MISTRAL_API_URL") {
            config.api_url = url.trim_end_matches('/').to_string();
        }
        if let Ok(model) = env::var("LLM_MODEL") {
            config.completion_model = model;
        }
        if let Ok(model) = env::var("EMBEDDING_MODEL") {
            config.embedding_model = model;
        }
        if let Ok(value) = env::var("VECTOR_DIMENSION") {
            config.dimension = value.parse().map_err(|_| {
                Error::Configuration(format!("VECTOR_DIMENSION is not a number: {}", value))
            })?;
        }
        if let Ok(value) = env::var("REQUEST_TIMEOUT_SECONDS") {
            let secs: u64 = value.parse().map_err(|_| {
                Error::Configuration(format!("REQUEST_TIMEOUT_SECONDS is not a number: {}", value))
            })?;
            config.timeout = Duration::from_secs(secs);
        }

        Ok(config)
    }

    /// Create configuration with explicit key and default endpoints
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            api_url: DEFAULT_API_URL.to_string(),
            completion_model: DEFAULT_COMPLETION_MODEL.to_string(),
            embedding_model: DEFAULT_EMBEDDING_MODEL.to_string(),
            dimension: DEFAULT_DIMENSION,
            timeout: Duration::from_secs(60),
        }
    }

    pub fn embeddings_url(&self) -> String {
        format!("{}/v1/embeddings", self.api_url)
    }

    pub fn chat_url(&self) -> String {
        format!("{}/v1/chat/completions", self.api_url)
    }
}
