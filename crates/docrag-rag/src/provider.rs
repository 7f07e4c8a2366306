//! Provider adapter: retries, pacing, caching and cost accounting around an [`AiProvider`]

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, Semaphore};
use tracing::{debug, info, warn};

use docrag_core::{AiProvider, CompletionRequest, CostConfig, Error, ProviderConfig, Result};

use crate::embedding_cache::EmbeddingCache;

/// USD per million tokens for known models
const MODEL_COSTS: &[(&str, f64)] = &[
    ("mistral-large-latest", 8.0),
    ("mistral-medium-latest", 2.7),
    ("mistral-small-latest", 1.0),
    ("mistral-embed", 0.1),
];
const UNKNOWN_COMPLETION_COST: f64 = 8.0;
const UNKNOWN_EMBEDDING_COST: f64 = 0.1;

const HEALTH_PROBE: &str = "health check";

/// Cost per million tokens for a model
pub fn cost_per_million(model: &str, embedding: bool) -> f64 {
    MODEL_COSTS
        .iter()
        .find(|(name, _)| *name == model)
        .map(|(_, cost)| *cost)
        .unwrap_or(if embedding {
            UNKNOWN_EMBEDDING_COST
        } else {
            UNKNOWN_COMPLETION_COST
        })
}

/// Rough token count used for accounting
pub fn estimate_tokens(text: &str) -> u64 {
    (text.chars().count() / 4) as u64
}

/// Usage counters at one point in time
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UsageSnapshot {
    pub embedding_calls: u64,
    pub embedding_tokens: u64,
    pub completion_calls: u64,
    pub completion_tokens: u64,
    /// Embeddings served from the cache instead of the provider
    pub cache_saves: u64,
    pub total_cost_usd: f64,
    pub monthly_budget_usd: f64,
    pub budget_used_pct: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthReport {
    pub healthy: bool,
    pub embedding_model: String,
    pub completion_model: String,
    pub dimension: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub usage: UsageSnapshot,
}

#[derive(Default)]
struct UsageCounters {
    embedding_calls: AtomicU64,
    embedding_tokens: AtomicU64,
    completion_calls: AtomicU64,
    completion_tokens: AtomicU64,
    cache_saves: AtomicU64,
}

/// Wraps an AI provider with the policies the engines rely on.
///
/// Every remote attempt holds a concurrency permit and passes the pacing gate
/// under a timeout, inside the relevant retry policy; backoff sleeps hold no
/// permit. Embeddings are looked up in the
/// embedding cache first and written back after a successful call.
pub struct ProviderAdapter {
    provider: Arc<dyn AiProvider>,
    cache: Arc<EmbeddingCache>,
    config: ProviderConfig,
    cost: CostConfig,
    permits: Semaphore,
    last_call: Mutex<Option<Instant>>,
    usage: UsageCounters,
    budget_alerted: AtomicBool,
}

impl ProviderAdapter {
    pub fn new(
        provider: Arc<dyn AiProvider>,
        cache: Arc<EmbeddingCache>,
        config: ProviderConfig,
        cost: CostConfig,
    ) -> Self {
        let permits = Semaphore::new(config.max_concurrent_requests.max(1));
        Self {
            provider,
            cache,
            config,
            cost,
            permits,
            last_call: Mutex::new(None),
            usage: UsageCounters::default(),
            budget_alerted: AtomicBool::new(false),
        }
    }

    /// Adapter without an embedding cache
    pub fn uncached(provider: Arc<dyn AiProvider>, config: ProviderConfig) -> Self {
        Self::new(
            provider,
            Arc::new(EmbeddingCache::disabled()),
            config,
            CostConfig::default(),
        )
    }

    pub fn embedding_model(&self) -> &str {
        self.provider.embedding_model()
    }

    pub fn completion_model(&self) -> &str {
        self.provider.completion_model()
    }

    pub fn dimensions(&self) -> usize {
        self.provider.dimensions()
    }

    pub fn cache(&self) -> &EmbeddingCache {
        &self.cache
    }

    /// Embed one text with the configured request timeout
    pub async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        self.embed_within(text, self.config.request_timeout).await
    }

    /// Embed one text, giving up on each attempt after `limit`
    pub async fn embed_within(&self, text: &str, limit: Duration) -> Result<Vec<f32>> {
        if text.trim().is_empty() {
            return Err(Error::InvalidInput("Cannot embed empty text".to_string()));
        }

        let model = self.provider.embedding_model();
        if let Some(vector) = self.cache.get(text, model).await {
            self.usage.cache_saves.fetch_add(1, Ordering::Relaxed);
            return Ok(vector);
        }

        let provider = self.provider.as_ref();
        let this = self;
        let vector = self
            .config
            .embedding_retry
            .run("embed", move || async move {
                let _permit = this.acquire().await?;
                this.pace().await;
                with_timeout(limit, provider.embed(text)).await
            })
            .await?;

        self.check_dimension(&vector)?;
        self.record_embedding(estimate_tokens(text));
        self.cache.set(text, &vector, model, None).await;
        Ok(vector)
    }

    /// Embed several texts, preserving input order.
    ///
    /// Cached texts are never sent to the provider. The remaining texts go out
    /// in batches of at most `max_batch_size` with `inter_batch_delay` between
    /// batches.
    pub async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        if let Some(position) = texts.iter().position(|t| t.trim().is_empty()) {
            return Err(Error::InvalidInput(format!(
                "Cannot embed empty text at position {}",
                position
            )));
        }

        let model = self.provider.embedding_model();
        let lookup = self.cache.batch_get(texts, model).await;
        self.usage
            .cache_saves
            .fetch_add(lookup.hits.len() as u64, Ordering::Relaxed);

        let mut fresh: HashMap<String, Vec<f32>> = HashMap::with_capacity(lookup.misses.len());
        let batch_size = self.config.max_batch_size.max(1);

        for (i, batch) in lookup.misses.chunks(batch_size).enumerate() {
            if i > 0 {
                tokio::time::sleep(self.config.inter_batch_delay).await;
            }

            let vectors = self.embed_remote(batch).await?;
            let pairs: Vec<(String, Vec<f32>)> = batch.iter().cloned().zip(vectors).collect();
            self.cache.batch_set(&pairs, model, None).await;
            fresh.extend(pairs);
        }

        debug!(
            total = texts.len(),
            cached = lookup.hits.len(),
            embedded = fresh.len(),
            "Embedded batch"
        );

        texts
            .iter()
            .map(|text| {
                lookup
                    .hits
                    .get(text)
                    .or_else(|| fresh.get(text))
                    .cloned()
                    .ok_or_else(|| Error::Provider("Embedding missing from batch response".to_string()))
            })
            .collect()
    }

    async fn embed_remote(&self, batch: &[String]) -> Result<Vec<Vec<f32>>> {
        let provider = self.provider.as_ref();
        let limit = self.config.request_timeout;
        let this = self;

        let vectors = self
            .config
            .embedding_retry
            .run("embed_batch", move || async move {
                let _permit = this.acquire().await?;
                this.pace().await;
                with_timeout(limit, provider.embed_batch(batch)).await
            })
            .await?;

        if vectors.len() != batch.len() {
            return Err(Error::Provider(format!(
                "Provider returned {} embeddings for {} texts",
                vectors.len(),
                batch.len()
            )));
        }
        for vector in &vectors {
            self.check_dimension(vector)?;
        }

        let tokens: u64 = batch.iter().map(|t| estimate_tokens(t)).sum();
        self.record_embedding(tokens);
        Ok(vectors)
    }

    /// Generate a completion with the configured request timeout
    pub async fn complete(&self, request: &CompletionRequest) -> Result<String> {
        self.complete_within(request, self.config.request_timeout).await
    }

    /// Generate a completion under the caller's limit, or the configured one
    pub async fn complete_with(&self, request: &CompletionRequest, limit: Option<Duration>) -> Result<String> {
        self.complete_within(request, limit.unwrap_or(self.config.request_timeout))
            .await
    }

    /// Generate a completion, giving up on each attempt after `limit`
    pub async fn complete_within(&self, request: &CompletionRequest, limit: Duration) -> Result<String> {
        let provider = self.provider.as_ref();
        let this = self;

        let answer = self
            .config
            .completion_retry
            .run("complete", move || async move {
                let _permit = this.acquire().await?;
                this.pace().await;
                with_timeout(limit, provider.complete(request)).await
            })
            .await?;

        let input = estimate_tokens(&request.prompt)
            + request.system.as_deref().map(estimate_tokens).unwrap_or(0);
        self.usage.completion_calls.fetch_add(1, Ordering::Relaxed);
        self.usage
            .completion_tokens
            .fetch_add(input + estimate_tokens(&answer), Ordering::Relaxed);
        self.check_budget();

        Ok(answer)
    }

    /// Probe the provider with a single uncached embedding
    pub async fn health_check(&self) -> HealthReport {
        let result = with_timeout(self.config.request_timeout, self.provider.embed(HEALTH_PROBE))
            .await
            .and_then(|vector| self.check_dimension(&vector));

        if let Err(e) = &result {
            warn!(error = %e, "Provider health check failed");
        }

        HealthReport {
            healthy: result.is_ok(),
            embedding_model: self.provider.embedding_model().to_string(),
            completion_model: self.provider.completion_model().to_string(),
            dimension: self.provider.dimensions(),
            error: result.err().map(|e| e.to_string()),
            usage: self.usage(),
        }
    }

    pub fn usage(&self) -> UsageSnapshot {
        let embedding_tokens = self.usage.embedding_tokens.load(Ordering::Relaxed);
        let completion_tokens = self.usage.completion_tokens.load(Ordering::Relaxed);
        let total_cost_usd = self.cost_of(embedding_tokens, completion_tokens);
        let budget = self.cost.max_monthly_cost_usd;

        UsageSnapshot {
            embedding_calls: self.usage.embedding_calls.load(Ordering::Relaxed),
            embedding_tokens,
            completion_calls: self.usage.completion_calls.load(Ordering::Relaxed),
            completion_tokens,
            cache_saves: self.usage.cache_saves.load(Ordering::Relaxed),
            total_cost_usd,
            monthly_budget_usd: budget,
            budget_used_pct: if budget > 0.0 {
                total_cost_usd / budget * 100.0
            } else {
                0.0
            },
        }
    }

    pub fn reset_usage(&self) {
        self.usage.embedding_calls.store(0, Ordering::Relaxed);
        self.usage.embedding_tokens.store(0, Ordering::Relaxed);
        self.usage.completion_calls.store(0, Ordering::Relaxed);
        self.usage.completion_tokens.store(0, Ordering::Relaxed);
        self.usage.cache_saves.store(0, Ordering::Relaxed);
        self.budget_alerted.store(false, Ordering::Relaxed);
        info!("Provider usage counters reset");
    }

    fn cost_of(&self, embedding_tokens: u64, completion_tokens: u64) -> f64 {
        let embed_rate = cost_per_million(self.provider.embedding_model(), true);
        let complete_rate = cost_per_million(self.provider.completion_model(), false);
        (embedding_tokens as f64 * embed_rate + completion_tokens as f64 * complete_rate) / 1_000_000.0
    }

    fn record_embedding(&self, tokens: u64) {
        self.usage.embedding_calls.fetch_add(1, Ordering::Relaxed);
        self.usage.embedding_tokens.fetch_add(tokens, Ordering::Relaxed);
        self.check_budget();
    }

    fn check_budget(&self) {
        let usage = self.usage();
        let limit = self.cost.max_monthly_cost_usd * self.cost.alert_threshold;
        if usage.total_cost_usd >= limit && !self.budget_alerted.swap(true, Ordering::Relaxed) {
            warn!(
                cost_usd = usage.total_cost_usd,
                budget_usd = usage.monthly_budget_usd,
                used_pct = usage.budget_used_pct,
                "Provider spend crossed the alert threshold"
            );
        }
    }

    fn check_dimension(&self, vector: &[f32]) -> Result<()> {
        let expected = self.provider.dimensions();
        if vector.len() != expected {
            return Err(Error::Provider(format!(
                "Embedding dimension mismatch: expected {}, got {}",
                expected,
                vector.len()
            )));
        }
        Ok(())
    }

    async fn acquire(&self) -> Result<tokio::sync::SemaphorePermit<'_>> {
        self.permits
            .acquire()
            .await
            .map_err(|e| Error::Other(format!("Provider semaphore closed: {}", e)))
    }

    /// Keep at least `inter_call_delay` between consecutive provider calls
    async fn pace(&self) {
        let delay = self.config.inter_call_delay;
        let mut last = self.last_call.lock().await;
        if let Some(previous) = *last {
            let elapsed = previous.elapsed();
            if elapsed < delay {
                tokio::time::sleep(delay - elapsed).await;
            }
        }
        *last = Some(Instant::now());
    }
}

async fn with_timeout<T>(limit: Duration, call: impl Future<Output = Result<T>>) -> Result<T> {
    match tokio::time::timeout(limit, call).await {
        Ok(result) => result,
        Err(_) => Err(Error::Timeout(format!(
            "Provider call exceeded {} ms",
            limit.as_millis()
        ))),
    }
}
