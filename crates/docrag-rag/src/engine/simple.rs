//! One-shot retrieve-then-generate engine

use chrono::Utc;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{error, info, warn};

use docrag_core::{
    CompletionRequest, EngineKind, Error, FeedbackType, QueryMetadata, QueryResult, Result,
    RetrievalConfig, ScoredChunk, SearchFilters, Source,
};

use crate::engine::prompts;
use crate::provider::ProviderAdapter;
use crate::vector_store::{FeedbackInput, VectorStoreService};

/// Per-call options shared by the engines
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryOptions {
    /// Chunks to retrieve; defaults to the configured `top_k`
    pub top_k: Option<usize>,
    pub use_hybrid: bool,
    pub filters: SearchFilters,
    /// Skip the answer cache for this call
    pub bypass_cache: bool,
    /// Background prepended to the answer prompt but not used for retrieval
    pub background: Option<String>,
    /// Limit applied to each provider call
    pub timeout: Option<Duration>,
}

impl QueryOptions {
    pub fn with_top_k(mut self, top_k: usize) -> Self {
        self.top_k = Some(top_k);
        self
    }

    pub fn with_hybrid(mut self, use_hybrid: bool) -> Self {
        self.use_hybrid = use_hybrid;
        self
    }

    pub fn with_filters(mut self, filters: SearchFilters) -> Self {
        self.filters = filters;
        self
    }

    pub fn with_background(mut self, background: impl Into<String>) -> Self {
        self.background = Some(background.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn without_cache(mut self) -> Self {
        self.bypass_cache = true;
        self
    }
}

/// `0.6·top + 0.4·min(count(score > threshold) / 3, 1)`, clamped to [0, 1]
pub fn confidence(results: &[ScoredChunk], threshold: f32) -> f32 {
    let Some(top) = results.first() else {
        return 0.0;
    };

    let relevant = results.iter().filter(|r| r.score > threshold).count();
    let coverage = (relevant as f32 / 3.0).min(1.0);
    (0.6 * top.score + 0.4 * coverage).clamp(0.0, 1.0)
}

pub struct SimpleQueryEngine {
    store: Arc<VectorStoreService>,
    provider: Arc<ProviderAdapter>,
    retrieval: RetrievalConfig,
}

impl SimpleQueryEngine {
    pub fn new(store: Arc<VectorStoreService>, provider: Arc<ProviderAdapter>, retrieval: RetrievalConfig) -> Self {
        Self {
            store,
            provider,
            retrieval,
        }
    }

    pub fn store(&self) -> &Arc<VectorStoreService> {
        &self.store
    }

    pub fn provider(&self) -> &Arc<ProviderAdapter> {
        &self.provider
    }

    pub fn retrieval(&self) -> &RetrievalConfig {
        &self.retrieval
    }

    /// Answer a question. Failures become a zero-confidence explanatory answer.
    pub async fn query(&self, query: &str, options: &QueryOptions) -> QueryResult {
        let started = Instant::now();

        match self.try_query(query, options).await {
            Ok(result) => result,
            Err(e) => {
                error!(error = %e, "Query failed");
                let mut result = QueryResult::degraded(query, prompts::error_answer(&e.to_string()));
                result.metadata.engine = Some(EngineKind::Simple);
                result.metadata.error = Some(e.to_string());
                result.metadata.processing_time_ms = started.elapsed().as_millis() as u64;
                result
            }
        }
    }

    /// Like [`query`](Self::query) but failures are returned to the caller
    pub async fn try_query(&self, query: &str, options: &QueryOptions) -> Result<QueryResult> {
        let started = Instant::now();
        if query.trim().is_empty() {
            return Err(Error::InvalidInput("Query is empty".to_string()));
        }

        let cacheable = !options.bypass_cache && options.background.is_none();
        if cacheable {
            if let Some(cached) = self.store.get_cached_response(query) {
                info!("Returning cached answer");
                return Ok(cached);
            }
        }

        let top_k = options.top_k.unwrap_or(self.retrieval.top_k);
        let hybrid = options.use_hybrid && self.retrieval.enable_hybrid_search;
        if options.use_hybrid && !hybrid {
            info!("Hybrid search disabled by configuration, using vector search");
        }

        let embedding = match options.timeout {
            Some(limit) => self.provider.embed_within(query, limit).await?,
            None => self.provider.embed(query).await?,
        };

        let results = if hybrid {
            self.store
                .hybrid_search(query, &embedding, top_k, None, None, &options.filters)
                .await?
        } else {
            self.store
                .search_similar(&embedding, top_k, None, &options.filters)
                .await?
        };

        let mut metadata = QueryMetadata {
            engine: Some(EngineKind::Simple),
            search_type: Some(if hybrid { "hybrid" } else { "vector" }.to_string()),
            ..Default::default()
        };

        if results.is_empty() {
            warn!(top_k, hybrid, "No relevant chunks found");
            metadata.top_k = Some(0);
            metadata.processing_time_ms = started.elapsed().as_millis() as u64;
            return Ok(QueryResult {
                query: query.to_string(),
                answer: prompts::NO_RESULTS_ANSWER.to_string(),
                sources: Vec::new(),
                confidence: 0.0,
                metadata,
            });
        }

        let context = prompts::format_context(&results);
        let request = CompletionRequest::new(prompts::answer_prompt(query, &context, options.background.as_deref()))
            .with_system(prompts::ANSWER_SYSTEM)
            .with_temperature(0.1);
        let answer = match options.timeout {
            Some(limit) => self.provider.complete_within(&request, limit).await?,
            None => self.provider.complete(&request).await?,
        };

        let confidence = confidence(&results, self.store.similarity_threshold());
        metadata.top_k = Some(results.len());
        metadata.processing_time_ms = started.elapsed().as_millis() as u64;

        let result = QueryResult {
            query: query.to_string(),
            answer,
            sources: results.iter().map(Source::from_scored).collect(),
            confidence,
            metadata,
        };

        if cacheable {
            self.store.cache_query(query, &embedding, &result, None);
        }

        info!(confidence, sources = result.sources.len(), "Query completed");
        Ok(result)
    }

    /// Answer and attach a feedback id the caller can later reference
    pub async fn query_with_feedback(&self, query: &str, options: &QueryOptions) -> QueryResult {
        let mut result = self.query(query, options).await;
        let stamp = Utc::now().timestamp_nanos_opt().unwrap_or_default();
        result.metadata.feedback_id = Some(format!("{:x}", md5::compute(format!("{}{}", query, stamp))));
        result
    }

    /// Record user feedback on an answer; never fails the caller
    pub fn submit_feedback(
        &self,
        query: &str,
        answer: &str,
        feedback_type: FeedbackType,
        rating: Option<u8>,
        text: Option<&str>,
        user: Option<&str>,
    ) -> Option<String> {
        let mut input = FeedbackInput::new(query, answer, feedback_type);
        input.rating = rating;
        input.text = text.map(str::to_string);
        input.user = user.map(str::to_string);
        self.store.add_feedback(input)
    }
}
