//! Engine configuration loaded from the environment

use serde::{Deserialize, Serialize};
use std::env;
use std::str::FromStr;
use std::time::Duration;
use tracing::warn;

use crate::document::ChunkingStrategy;
use crate::retry::RetryPolicy;
use crate::{Error, Result};

/// Chunker settings; sizes are in tokens unless named `_chars`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkingConfig {
    pub strategy: ChunkingStrategy,
    pub chunk_size: usize,
    pub chunk_overlap: usize,
    pub max_chunk_size: usize,
    pub min_chunk_chars: usize,
    /// Structural passes yielding fewer chunks than this fall back to fixed size
    pub hybrid_min_chunks: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            strategy: ChunkingStrategy::Hybrid,
            chunk_size: 512,
            chunk_overlap: 50,
            max_chunk_size: 1024,
            min_chunk_chars: 50,
            hybrid_min_chunks: 5,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    pub model: String,
    pub dimension: usize,
    pub batch_size: usize,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            model: "mistral-embed".to_string(),
            dimension: 1024,
            batch_size: 10,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrievalConfig {
    pub top_k: usize,
    pub similarity_threshold: f32,
    /// Weight of the vector score in hybrid search
    pub hybrid_alpha: f32,
    pub enable_hybrid_search: bool,
    pub max_subquestions: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: 5,
            similarity_threshold: 0.7,
            hybrid_alpha: 0.5,
            enable_hybrid_search: true,
            max_subquestions: 5,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheConfig {
    pub enable_embedding_cache: bool,
    pub embedding_ttl: Duration,
    pub enable_query_cache: bool,
    pub query_ttl: Duration,
    /// Capacity of the in-process cache backend
    pub max_entries: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enable_embedding_cache: true,
            embedding_ttl: Duration::from_secs(7 * 24 * 3600),
            enable_query_cache: true,
            query_ttl: Duration::from_secs(3600),
            max_entries: 100_000,
        }
    }
}

/// Pacing, concurrency and retry settings for provider calls
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderConfig {
    pub max_concurrent_requests: usize,
    pub request_timeout: Duration,
    pub embedding_retry: RetryPolicy,
    pub completion_retry: RetryPolicy,
    /// Largest number of texts sent in one embedding call
    pub max_batch_size: usize,
    pub inter_call_delay: Duration,
    pub inter_batch_delay: Duration,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            max_concurrent_requests: 5,
            request_timeout: Duration::from_secs(30),
            embedding_retry: RetryPolicy::embedding(),
            completion_retry: RetryPolicy::completion(),
            max_batch_size: 5,
            inter_call_delay: Duration::from_millis(200),
            inter_batch_delay: Duration::from_secs(2),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CostConfig {
    pub max_monthly_cost_usd: f64,
    /// Fraction of the monthly budget at which a warning is logged
    pub alert_threshold: f64,
}

impl Default for CostConfig {
    fn default() -> Self {
        Self {
            max_monthly_cost_usd: 100.0,
            alert_threshold: 0.8,
        }
    }
}

/// Complete engine configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RagConfig {
    pub chunking: ChunkingConfig,
    pub embedding: EmbeddingConfig,
    pub retrieval: RetrievalConfig,
    pub cache: CacheConfig,
    pub provider: ProviderConfig,
    pub cost: CostConfig,
}

impl RagConfig {
    /// Create configuration from environment variables, falling back to defaults
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();

        let mut config = Self::default();

        if let Ok(name) = env::var("CHUNKING_STRATEGY") {
            config.chunking.strategy = ChunkingStrategy::parse(&name).ok_or_else(|| {
                Error::Configuration(format!("Unknown CHUNKING_STRATEGY: {}", name))
            })?;
        }
        read_var("CHUNK_SIZE", &mut config.chunking.chunk_size)?;
        read_var("CHUNK_OVERLAP", &mut config.chunking.chunk_overlap)?;
        read_var("MAX_CHUNK_SIZE", &mut config.chunking.max_chunk_size)?;

        if let Ok(model) = env::var("EMBEDDING_MODEL") {
            config.embedding.model = model;
        }
        read_var("VECTOR_DIMENSION", &mut config.embedding.dimension)?;
        read_var("EMBEDDING_BATCH_SIZE", &mut config.embedding.batch_size)?;

        read_var("SIMILARITY_TOP_K", &mut config.retrieval.top_k)?;
        read_var("SIMILARITY_THRESHOLD", &mut config.retrieval.similarity_threshold)?;
        read_var("HYBRID_ALPHA", &mut config.retrieval.hybrid_alpha)?;
        read_var("ENABLE_HYBRID_SEARCH", &mut config.retrieval.enable_hybrid_search)?;

        read_var("ENABLE_QUERY_CACHE", &mut config.cache.enable_query_cache)?;
        read_var("ENABLE_EMBEDDING_CACHE", &mut config.cache.enable_embedding_cache)?;
        let mut query_ttl_secs = config.cache.query_ttl.as_secs();
        read_var("CACHE_TTL_SECONDS", &mut query_ttl_secs)?;
        config.cache.query_ttl = Duration::from_secs(query_ttl_secs);
        let mut embedding_ttl_hours = config.cache.embedding_ttl.as_secs() / 3600;
        read_var("EMBEDDING_CACHE_TTL_HOURS", &mut embedding_ttl_hours)?;
        config.cache.embedding_ttl = Duration::from_secs(embedding_ttl_hours * 3600);

        read_var("MAX_CONCURRENT_REQUESTS", &mut config.provider.max_concurrent_requests)?;
        let mut timeout_secs = config.provider.request_timeout.as_secs();
        read_var("REQUEST_TIMEOUT_SECONDS", &mut timeout_secs)?;
        config.provider.request_timeout = Duration::from_secs(timeout_secs);
        let mut retry_attempts = config.provider.embedding_retry.max_attempts;
        read_var("RETRY_ATTEMPTS", &mut retry_attempts)?;
        config.provider.embedding_retry.max_attempts = retry_attempts;

        read_var("MAX_MONTHLY_COST_USD", &mut config.cost.max_monthly_cost_usd)?;

        config.validate()?;
        Ok(config)
    }

    /// Reject settings the engine cannot run with
    pub fn validate(&self) -> Result<()> {
        let c = &self.chunking;
        if c.chunk_size == 0 || c.max_chunk_size == 0 {
            return Err(Error::Configuration("chunk sizes must be positive".to_string()));
        }
        if c.chunk_overlap >= c.chunk_size {
            return Err(Error::Configuration(format!(
                "chunk_overlap ({}) must be smaller than chunk_size ({})",
                c.chunk_overlap, c.chunk_size
            )));
        }
        if c.max_chunk_size < c.chunk_size {
            warn!(
                max_chunk_size = c.max_chunk_size,
                chunk_size = c.chunk_size,
                "max_chunk_size is smaller than chunk_size"
            );
        }

        let r = &self.retrieval;
        if !(0.0..=1.0).contains(&r.similarity_threshold) {
            return Err(Error::Configuration(format!(
                "similarity_threshold must be within [0, 1], got {}",
                r.similarity_threshold
            )));
        }
        if !(0.0..=1.0).contains(&r.hybrid_alpha) {
            return Err(Error::Configuration(format!(
                "hybrid_alpha must be within [0, 1], got {}",
                r.hybrid_alpha
            )));
        }
        if r.top_k == 0 {
            return Err(Error::Configuration("top_k must be positive".to_string()));
        }

        if self.embedding.dimension == 0 || self.embedding.batch_size == 0 {
            return Err(Error::Configuration(
                "embedding dimension and batch size must be positive".to_string(),
            ));
        }

        let p = &self.provider;
        if p.max_concurrent_requests == 0 || p.max_batch_size == 0 {
            return Err(Error::Configuration(
                "max_concurrent_requests and max_batch_size must be positive".to_string(),
            ));
        }

        if self.cost.max_monthly_cost_usd < 0.0 {
            return Err(Error::Configuration("max_monthly_cost_usd must not be negative".to_string()));
        }

        Ok(())
    }
}

fn read_var<T: FromStr>(key: &str, target: &mut T) -> Result<()> {
    if let Ok(raw) = env::var(key) {
        *target = raw
            .trim()
            .parse()
            .map_err(|_| Error::Configuration(format!("Invalid value for {}: {}", key, raw)))?;
    }
    Ok(())
}
