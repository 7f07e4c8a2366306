//! Mistral AI client implementation

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::debug;

use docrag_core::{AiProvider, CompletionRequest, Error, Result};

use crate::config::MistralConfig;

/// Mistral AI client, one HTTP call per trait method
pub struct MistralClient {
    config: MistralConfig,
    client: Client,
}

#[derive(Debug, Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
    #[serde(default)]
    index: usize,
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Debug, Serialize)]
pub(crate) struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Serialize)]
pub(crate) struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

impl MistralClient {
    /// Create a new Mistral client from configuration
    pub fn new(config: MistralConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| Error::Network(e.to_string()))?;

        Ok(Self { config, client })
    }

    /// Create a new Mistral client from environment variables
    pub fn from_env() -> Result<Self> {
        let config = MistralConfig::from_env()?;
        Self::new(config)
    }

    pub fn config(&self) -> &MistralConfig {
        &self.config
    }

    pub(crate) fn chat_request<'a>(&'a self, request: &'a CompletionRequest) -> ChatRequest<'a> {
        let mut messages = Vec::with_capacity(2);
        if let Some(system) = request.system.as_deref() {
            messages.push(ChatMessage {
                role: "system",
                content: system,
            });
        }
        messages.push(ChatMessage {
            role: "user",
            content: &request.prompt,
        });

        ChatRequest {
            model: &self.config.completion_model,
            messages,
            temperature: request.temperature,
            max_tokens: request.max_tokens,
        }
    }

    async fn post<T: Serialize + ?Sized>(&self, url: &str, body: &T) -> Result<String> {
        let response = self
            .client
            .post(url)
            .header("Accept", "application/json")
            .bearer_auth(&self.config.api_key)
            .json(body)
            .send()
            .await
            .map_err(transport_error)?;

        let status = response.status();
        let text = response.text().await.map_err(transport_error)?;
        if !status.is_success() {
            return Err(status_error(status, &text));
        }
        Ok(text)
    }
}

fn transport_error(error: reqwest::Error) -> Error {
    if error.is_timeout() {
        Error::Timeout(error.to_string())
    } else {
        Error::Network(error.to_string())
    }
}

/// Map a non-success HTTP status to the error taxonomy
pub(crate) fn status_error(status: StatusCode, body: &str) -> Error {
    let message = format!("Mistral API request failed with status {}: {}", status, body.trim());
    match status {
        StatusCode::TOO_MANY_REQUESTS => Error::RateLimited(message),
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Error::Authentication(message),
        StatusCode::REQUEST_TIMEOUT | StatusCode::GATEWAY_TIMEOUT => Error::Timeout(message),
        s if s.is_server_error() => Error::Provider(message),
        _ => Error::InvalidInput(message),
    }
}

/// Vectors of an embeddings response in input order
pub(crate) fn parse_embeddings(body: &str, expected: usize) -> Result<Vec<Vec<f32>>> {
    let mut response: EmbeddingResponse = serde_json::from_str(body)
        .map_err(|e| Error::Serialization(format!("Invalid embeddings response: {}", e)))?;

    if response.data.len() != expected {
        return Err(Error::Provider(format!(
            "Expected {} embeddings, got {}",
            expected,
            response.data.len()
        )));
    }

    response.data.sort_by_key(|d| d.index);
    Ok(response.data.into_iter().map(|d| d.embedding).collect())
}

/// Content of the first choice of a chat response
pub(crate) fn parse_completion(body: &str) -> Result<String> {
    let response: ChatResponse = serde_json::from_str(body)
        .map_err(|e| Error::Serialization(format!("Invalid chat response: {}", e)))?;

    let content = response
        .choices
        .into_iter()
        .next()
        .and_then(|c| c.message.content)
        .map(|c| c.trim().to_string())
        .unwrap_or_default();

    if content.is_empty() {
        return Err(Error::Provider("Empty response from Mistral API".to_string()));
    }
    Ok(content)
}

#[async_trait]
impl AiProvider for MistralClient {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let mut vectors = self.embed_batch(&[text.to_string()]).await?;
        vectors
            .pop()
            .ok_or_else(|| Error::Provider("Empty embeddings response".to_string()))
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let body = EmbeddingRequest {
            model: &self.config.embedding_model,
            input: texts,
        };
        debug!(count = texts.len(), model = %self.config.embedding_model, "Requesting embeddings");
        let text = self.post(&self.config.embeddings_url(), &body).await?;
        parse_embeddings(&text, texts.len())
    }

    async fn complete(&self, request: &CompletionRequest) -> Result<String> {
        let body = self.chat_request(request);
        debug!(model = %self.config.completion_model, "Requesting completion");
        let text = self.post(&self.config.chat_url(), &body).await?;
        parse_completion(&text)
    }

    fn embedding_model(&self) -> &str {
        &self.config.embedding_model
    }

    fn completion_model(&self) -> &str {
        &self.config.completion_model
    }

    fn dimensions(&self) -> usize {
        self.config.dimension
    }
}
