//! Vector store service: similarity and hybrid search, answer cache and feedback log
//!
//! Persistence is delegated to a [`VectorBackend`]; this layer adds threshold
//! filtering, score fusion, dimension checks and the two in-process side
//! stores (cached answers and user feedback).

pub mod memory;
pub mod qdrant;

use chrono::Utc;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, info, warn};

use docrag_core::{
    AnswerCacheEntry, Chunk, EmbeddingRecord, Error, FeedbackEntry, FeedbackType, QueryResult,
    Result, RetrievalConfig, ScoredChunk, SearchFilters, VectorBackend, rank_order,
};

pub use memory::InMemoryVectorBackend;
pub use qdrant::QdrantVectorBackend;

/// Aggregate view of the store and its side stores
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexStats {
    pub total_embeddings: usize,
    pub unique_documents: usize,
    pub by_document_type: BTreeMap<String, usize>,
    pub answer_cache_entries: usize,
    pub feedback_by_type: BTreeMap<String, usize>,
    pub dimension: usize,
    pub similarity_threshold: f32,
}

/// Feedback as submitted by a caller
#[derive(Debug, Clone, PartialEq)]
pub struct FeedbackInput {
    pub query: String,
    pub response: String,
    pub feedback_type: FeedbackType,
    pub rating: Option<u8>,
    pub text: Option<String>,
    pub user: Option<String>,
}

impl FeedbackInput {
    pub fn new(query: impl Into<String>, response: impl Into<String>, feedback_type: FeedbackType) -> Self {
        Self {
            query: query.into(),
            response: response.into(),
            feedback_type,
            rating: None,
            text: None,
            user: None,
        }
    }

    pub fn with_rating(mut self, rating: u8) -> Self {
        self.rating = Some(rating);
        self
    }

    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.text = Some(text.into());
        self
    }

    pub fn with_user(mut self, user: impl Into<String>) -> Self {
        self.user = Some(user.into());
        self
    }
}

pub struct VectorStoreService {
    backend: Arc<dyn VectorBackend>,
    dimension: usize,
    similarity_threshold: f32,
    hybrid_alpha: f32,
    answer_cache_enabled: bool,
    answer_ttl: Duration,
    answer_cache: DashMap<String, AnswerCacheEntry>,
    feedback: Mutex<Vec<FeedbackEntry>>,
}

impl VectorStoreService {
    pub fn new(backend: Arc<dyn VectorBackend>, dimension: usize, retrieval: &RetrievalConfig) -> Self {
        Self {
            backend,
            dimension,
            similarity_threshold: retrieval.similarity_threshold,
            hybrid_alpha: retrieval.hybrid_alpha,
            answer_cache_enabled: true,
            answer_ttl: Duration::from_secs(3600),
            answer_cache: DashMap::new(),
            feedback: Mutex::new(Vec::new()),
        }
    }

    /// Configure the answer cache
    pub fn with_answer_cache(mut self, enabled: bool, ttl: Duration) -> Self {
        self.answer_cache_enabled = enabled;
        self.answer_ttl = ttl;
        self
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    pub fn similarity_threshold(&self) -> f32 {
        self.similarity_threshold
    }

    /// Store embeddings, overwriting records with the same chunk id
    pub async fn add_embeddings(&self, records: Vec<EmbeddingRecord>) -> Result<usize> {
        if records.is_empty() {
            return Ok(0);
        }

        if let Some(bad) = records.iter().find(|r| r.vector.len() != self.dimension) {
            return Err(Error::InvalidInput(format!(
                "Embedding for chunk {} has dimension {}, expected {}",
                bad.chunk_id(),
                bad.vector.len(),
                self.dimension
            )));
        }

        let count = self.backend.upsert(records).await?;
        info!(count, "Stored embeddings");
        Ok(count)
    }

    /// Nearest chunks by cosine similarity.
    ///
    /// `threshold` defaults to the configured similarity threshold; every
    /// returned score is at least the threshold.
    pub async fn search_similar(
        &self,
        query_vector: &[f32],
        top_k: usize,
        threshold: Option<f32>,
        filters: &SearchFilters,
    ) -> Result<Vec<ScoredChunk>> {
        if top_k == 0 {
            return Ok(Vec::new());
        }
        let threshold = threshold.unwrap_or(self.similarity_threshold);

        let mut results = self.backend.search_vector(query_vector, top_k, filters).await?;
        results.retain(|r| r.score >= threshold);
        results.sort_by(rank_order);
        results.truncate(top_k);

        debug!(top_k, threshold, found = results.len(), "Similarity search");
        Ok(results)
    }

    /// Fuse vector and lexical rankings.
    ///
    /// Vector candidates are the top `2·top_k` hits that clear the similarity
    /// threshold (`threshold` defaults to the configured one); lexical
    /// candidates are the top `2·top_k` lexical hits. A candidate missing from
    /// one ranking scores zero for that component. When no chunk clears the
    /// threshold the result is empty. `alpha` defaults to the configured weight.
    pub async fn hybrid_search(
        &self,
        query_text: &str,
        query_vector: &[f32],
        top_k: usize,
        alpha: Option<f32>,
        threshold: Option<f32>,
        filters: &SearchFilters,
    ) -> Result<Vec<ScoredChunk>> {
        if top_k == 0 {
            return Ok(Vec::new());
        }
        let alpha = alpha.unwrap_or(self.hybrid_alpha).clamp(0.0, 1.0);
        let threshold = threshold.unwrap_or(self.similarity_threshold);
        let pool = top_k * 2;

        let mut vector_hits = self.backend.search_vector(query_vector, pool, filters).await?;
        vector_hits.retain(|hit| hit.score >= threshold);
        if vector_hits.is_empty() {
            debug!(top_k, threshold, "Hybrid search found nothing above threshold");
            return Ok(Vec::new());
        }
        let lexical_hits = self.backend.search_lexical(query_text, pool, filters).await?;

        let mut candidates: HashMap<String, (Chunk, f32, f32)> = HashMap::new();
        for hit in vector_hits {
            candidates.insert(hit.chunk.id.clone(), (hit.chunk, hit.score, 0.0));
        }
        for hit in lexical_hits {
            candidates
                .entry(hit.chunk.id.clone())
                .or_insert_with(|| (hit.chunk, 0.0, 0.0))
                .2 = hit.score;
        }

        let mut results: Vec<ScoredChunk> = candidates
            .into_values()
            .map(|(chunk, vector, lexical)| ScoredChunk {
                chunk,
                score: alpha * vector + (1.0 - alpha) * lexical,
            })
            .collect();
        results.sort_by(rank_order);
        results.truncate(top_k);

        debug!(top_k, alpha, threshold, found = results.len(), "Hybrid search");
        Ok(results)
    }

    /// Remove every embedding of a document along with cached answers citing it
    pub async fn delete_embeddings(&self, document_id: &str) -> Result<usize> {
        let removed = self.backend.delete_document(document_id).await?;

        let before = self.answer_cache.len();
        self.answer_cache
            .retain(|_, entry| entry.response.sources.iter().all(|s| s.document_id != document_id));
        let evicted = before.saturating_sub(self.answer_cache.len());

        info!(document_id, removed, evicted_answers = evicted, "Deleted document embeddings");
        Ok(removed)
    }

    /// Chunks of a document ordered by index, optionally for one section
    pub async fn chunks_for_document(&self, document_id: &str, section_type: Option<&str>) -> Result<Vec<Chunk>> {
        let mut chunks = self.backend.document_chunks(document_id).await?;
        if let Some(section_type) = section_type {
            chunks.retain(|c| c.section_type.as_deref() == Some(section_type));
        }
        Ok(chunks)
    }

    /// Cache a full answer for `query`; `ttl` defaults to the answer cache TTL
    pub fn cache_query(&self, query: &str, embedding: &[f32], response: &QueryResult, ttl: Option<Duration>) {
        if !self.answer_cache_enabled {
            return;
        }

        let ttl = ttl.unwrap_or(self.answer_ttl);
        let now = Utc::now();
        let expires_at = now + chrono::Duration::from_std(ttl).unwrap_or(chrono::Duration::hours(1));
        let key = query_hash(query);

        self.answer_cache
            .entry(key.clone())
            .and_modify(|entry| {
                entry.response = response.clone();
                entry.query_embedding = embedding.to_vec();
                entry.ttl_seconds = ttl.as_secs();
                entry.expires_at = expires_at;
                entry.last_accessed = now;
                entry.hit_count += 1;
            })
            .or_insert_with(|| AnswerCacheEntry {
                query_hash: key,
                query_text: query.to_string(),
                query_embedding: embedding.to_vec(),
                response: response.clone(),
                ttl_seconds: ttl.as_secs(),
                hit_count: 0,
                created_at: now,
                last_accessed: now,
                expires_at,
            });
        debug!(query, "Cached answer");
    }

    /// Cached answer for the exact query text, marked as `cached`
    pub fn get_cached_response(&self, query: &str) -> Option<QueryResult> {
        if !self.answer_cache_enabled {
            return None;
        }

        let key = query_hash(query);
        let now = Utc::now();

        let expired = match self.answer_cache.get_mut(&key) {
            None => return None,
            Some(mut entry) => {
                if entry.is_expired(now) {
                    true
                } else {
                    entry.hit_count += 1;
                    entry.last_accessed = now;
                    let mut response = entry.response.clone();
                    response.metadata.cached = true;
                    debug!(query, hits = entry.hit_count, "Answer cache hit");
                    return Some(response);
                }
            }
        };

        if expired {
            self.answer_cache.remove(&key);
        }
        None
    }

    pub fn cached_entry(&self, query: &str) -> Option<AnswerCacheEntry> {
        self.answer_cache.get(&query_hash(query)).map(|e| e.clone())
    }

    /// Drop expired answers, returning how many were removed
    pub fn clean_expired_cache(&self) -> usize {
        let now = Utc::now();
        let before = self.answer_cache.len();
        self.answer_cache.retain(|_, entry| !entry.is_expired(now));
        let removed = before.saturating_sub(self.answer_cache.len());
        if removed > 0 {
            info!(removed, "Cleaned expired answers");
        }
        removed
    }

    /// Append to the feedback log.
    ///
    /// Never fails: problems are logged and `None` is returned.
    pub fn add_feedback(&self, input: FeedbackInput) -> Option<String> {
        let rating = match input.rating {
            Some(r) if (1..=5).contains(&r) => Some(r),
            Some(r) => {
                warn!(rating = r, "Ignoring rating outside 1..=5");
                None
            }
            None => None,
        };

        let now = Utc::now();
        let id = format!(
            "{:x}",
            md5::compute(format!("{}{}", input.query, now.timestamp_nanos_opt().unwrap_or_default()))
        );
        let entry = FeedbackEntry {
            id: id.clone(),
            query: input.query,
            response: input.response,
            feedback_type: input.feedback_type,
            rating,
            text: input.text,
            user: input.user,
            created_at: now,
        };

        match self.feedback.lock() {
            Ok(mut log) => {
                log.push(entry);
                info!(feedback_id = %id, feedback_type = input.feedback_type.as_str(), "Recorded feedback");
                Some(id)
            }
            Err(e) => {
                warn!(error = %e, "Feedback log unavailable");
                None
            }
        }
    }

    pub fn feedback_entries(&self) -> Vec<FeedbackEntry> {
        match self.feedback.lock() {
            Ok(log) => log.clone(),
            Err(_) => Vec::new(),
        }
    }

    pub async fn index_stats(&self) -> Result<IndexStats> {
        let backend = self.backend.stats().await?;

        let mut feedback_by_type: BTreeMap<String, usize> = BTreeMap::new();
        for entry in self.feedback_entries() {
            *feedback_by_type
                .entry(entry.feedback_type.as_str().to_string())
                .or_default() += 1;
        }

        Ok(IndexStats {
            total_embeddings: backend.total_embeddings,
            unique_documents: backend.unique_documents,
            by_document_type: backend.by_document_type,
            answer_cache_entries: self.answer_cache.len(),
            feedback_by_type,
            dimension: backend.dimension.unwrap_or(self.dimension),
            similarity_threshold: self.similarity_threshold,
        })
    }
}

fn query_hash(query: &str) -> String {
    format!("{:x}", md5::compute(query.as_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{BrokenVectorBackend, chunk};
    use proptest::prelude::*;

    fn record(document_id: &str, index: usize, text: &str, vector: Vec<f32>) -> EmbeddingRecord {
        EmbeddingRecord {
            chunk: chunk(document_id, index, text),
            vector,
            model: "mistral-embed".to_string(),
        }
    }

    fn store() -> VectorStoreService {
        VectorStoreService::new(Arc::new(InMemoryVectorBackend::new()), 3, &RetrievalConfig::default())
    }

    async fn seeded() -> VectorStoreService {
        let store = store();
        store
            .add_embeddings(vec![
                record("cctp", 0, "Le délai de livraison est de 30 jours", vec![1.0, 0.0, 0.0]),
                record("cctp", 1, "Les pénalités de retard sont appliquées", vec![0.8, 0.6, 0.0]),
                record("ccap", 0, "Le prix est ferme et définitif", vec![0.0, 1.0, 0.0]),
                record("ccap", 1, "Le délai de paiement est de 30 jours", vec![0.1, 0.1, 0.9]),
            ])
            .await
            .unwrap();
        store
    }

    fn ids(results: &[ScoredChunk]) -> Vec<String> {
        results.iter().map(|r| r.chunk.id.clone()).collect()
    }

    #[tokio::test]
    async fn test_search_similar_respects_threshold_and_order() {
        let store = seeded().await;
        let results = store
            .search_similar(&[1.0, 0.2, 0.0], 10, Some(0.5), &SearchFilters::none())
            .await
            .unwrap();

        assert_eq!(results.len(), 2);
        assert!(results.windows(2).all(|w| w[0].score >= w[1].score));
        assert!(results.iter().all(|r| r.score >= 0.5));
        assert_eq!(results[0].chunk.id, Chunk::make_id("cctp", 0));
    }

    #[tokio::test]
    async fn test_filters_restrict_results() {
        let store = seeded().await;
        let results = store
            .search_similar(&[1.0, 1.0, 1.0], 10, Some(0.0), &SearchFilters::document("ccap"))
            .await
            .unwrap();
        assert_eq!(results.len(), 2);
        assert!(results.iter().all(|r| r.chunk.document_id == "ccap"));
    }

    #[tokio::test]
    async fn test_delete_then_filtered_search_is_empty() {
        let store = seeded().await;
        assert_eq!(store.delete_embeddings("cctp").await.unwrap(), 2);

        let results = store
            .search_similar(&[1.0, 0.0, 0.0], 10, Some(0.0), &SearchFilters::document("cctp"))
            .await
            .unwrap();
        assert!(results.is_empty());
        assert_eq!(store.chunks_for_document("ccap", None).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_hybrid_extremes_match_single_rankings() {
        let store = seeded().await;
        let query = "délai de paiement";
        let vector = [0.2, 0.1, 0.9];

        let pure_vector = store
            .search_similar(&vector, 4, Some(0.0), &SearchFilters::none())
            .await
            .unwrap();
        let hybrid_vector = store
            .hybrid_search(query, &vector, 4, Some(1.0), Some(0.0), &SearchFilters::none())
            .await
            .unwrap();
        assert_eq!(ids(&hybrid_vector), ids(&pure_vector));

        let pure_lexical = store
            .backend
            .search_lexical(query, 4, &SearchFilters::none())
            .await
            .unwrap();
        let hybrid_lexical = store
            .hybrid_search(query, &vector, 4, Some(0.0), Some(0.0), &SearchFilters::none())
            .await
            .unwrap();
        assert_eq!(ids(&hybrid_lexical[..pure_lexical.len()]), ids(&pure_lexical));
    }

    #[tokio::test]
    async fn test_hybrid_blends_scores() {
        let store = seeded().await;
        let results = store
            .hybrid_search("délai de paiement", &[1.0, 0.0, 0.0], 2, Some(0.5), None, &SearchFilters::none())
            .await
            .unwrap();
        assert_eq!(
            ids(&results),
            vec![Chunk::make_id("cctp", 0), Chunk::make_id("cctp", 1)]
        );
        assert!((results[0].score - (0.5 + 0.5 * 2.0 / 3.0)).abs() < 1e-5);
    }

    #[tokio::test]
    async fn test_hybrid_needs_a_chunk_above_threshold() {
        let store = seeded().await;

        let results = store
            .hybrid_search("délai de paiement", &[0.0, -1.0, 0.0], 4, Some(0.5), None, &SearchFilters::none())
            .await
            .unwrap();
        assert!(results.is_empty());

        let results = store
            .hybrid_search("délai de paiement", &[1.0, 0.0, 0.0], 4, Some(1.0), None, &SearchFilters::none())
            .await
            .unwrap();
        assert_eq!(
            ids(&results[..2]),
            vec![Chunk::make_id("cctp", 0), Chunk::make_id("cctp", 1)]
        );
        assert!(results[2..].iter().all(|r| r.score == 0.0));
    }

    #[tokio::test]
    async fn test_hybrid_keeps_negative_similarity_order() {
        let store = store();
        store
            .add_embeddings(vec![
                record("a", 0, "alpha", vec![1.0, 0.0, 0.0]),
                record("a", 1, "beta", vec![-1.0, 0.1, 0.0]),
                record("a", 2, "gamma", vec![-0.1, 1.0, 0.0]),
            ])
            .await
            .unwrap();
        let query = [1.0, 0.0, 0.0];

        let pure_vector = store
            .search_similar(&query, 3, Some(-1.0), &SearchFilters::none())
            .await
            .unwrap();
        let hybrid = store
            .hybrid_search("omega", &query, 3, Some(1.0), Some(-1.0), &SearchFilters::none())
            .await
            .unwrap();

        assert_eq!(
            ids(&pure_vector),
            vec![Chunk::make_id("a", 0), Chunk::make_id("a", 2), Chunk::make_id("a", 1)]
        );
        assert_eq!(ids(&hybrid), ids(&pure_vector));
        assert!(hybrid[2].score < hybrid[1].score && hybrid[1].score < 0.0);
    }

    #[tokio::test]
    async fn test_add_rejects_wrong_dimension() {
        let store = store();
        let err = store
            .add_embeddings(vec![record("d", 0, "texte", vec![1.0, 0.0])])
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
    }

    #[tokio::test]
    async fn test_store_errors_are_surfaced_on_admin_operations() {
        let store = VectorStoreService::new(Arc::new(BrokenVectorBackend), 3, &RetrievalConfig::default());
        let err = store
            .add_embeddings(vec![record("d", 0, "texte", vec![1.0, 0.0, 0.0])])
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Store(_)));
        assert!(matches!(store.delete_embeddings("d").await, Err(Error::Store(_))));
    }

    #[test]
    fn test_answer_cache_hits_and_refresh() {
        let store = store();
        let response = QueryResult::degraded("Quel est le délai ?", "30 jours");

        assert!(store.get_cached_response("Quel est le délai ?").is_none());
        store.cache_query("Quel est le délai ?", &[0.1, 0.2, 0.3], &response, None);

        let cached = store.get_cached_response("Quel est le délai ?").unwrap();
        assert!(cached.metadata.cached);
        assert_eq!(cached.answer, "30 jours");
        assert_eq!(store.cached_entry("Quel est le délai ?").unwrap().hit_count, 1);

        let updated = QueryResult::degraded("Quel est le délai ?", "45 jours");
        store.cache_query("Quel est le délai ?", &[0.1, 0.2, 0.3], &updated, None);
        let entry = store.cached_entry("Quel est le délai ?").unwrap();
        assert_eq!(entry.hit_count, 2);
        assert_eq!(entry.response.answer, "45 jours");
    }

    #[test]
    fn test_answer_cache_expiry() {
        let store = store();
        let response = QueryResult::degraded("q", "a");
        store.cache_query("q", &[], &response, Some(Duration::ZERO));
        store.cache_query("r", &[], &response, Some(Duration::from_secs(60)));

        assert_eq!(store.clean_expired_cache(), 1);
        assert!(store.get_cached_response("q").is_none());
        assert!(store.get_cached_response("r").is_some());
    }

    #[test]
    fn test_disabled_answer_cache() {
        let store = store().with_answer_cache(false, Duration::from_secs(60));
        store.cache_query("q", &[], &QueryResult::degraded("q", "a"), None);
        assert!(store.get_cached_response("q").is_none());
    }

    #[tokio::test]
    async fn test_feedback_log_and_stats() {
        let store = seeded().await;
        let id = store.add_feedback(
            FeedbackInput::new("q", "a", FeedbackType::Positive)
                .with_rating(5)
                .with_user("acheteur"),
        );
        assert!(id.is_some());
        store.add_feedback(FeedbackInput::new("q", "a", FeedbackType::Correction).with_rating(9));

        let entries = store.feedback_entries();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[1].rating, None);

        let stats = store.index_stats().await.unwrap();
        assert_eq!(stats.total_embeddings, 4);
        assert_eq!(stats.unique_documents, 2);
        assert_eq!(stats.feedback_by_type.get("positive"), Some(&1));
        assert_eq!(stats.feedback_by_type.get("correction"), Some(&1));
    }

    proptest! {
        #[test]
        fn prop_similar_results_sorted_above_threshold(
            vectors in prop::collection::vec(prop::collection::vec(-1.0f32..1.0, 3), 1..20),
            query in prop::collection::vec(-1.0f32..1.0, 3),
            threshold in 0.0f32..1.0,
        ) {
            let results = tokio_test::block_on(async {
                let store = store();
                let records = vectors
                    .iter()
                    .enumerate()
                    .map(|(i, v)| record("doc", i, "texte", v.clone()))
                    .collect();
                store.add_embeddings(records).await.unwrap();
                store
                    .search_similar(&query, 10, Some(threshold), &SearchFilters::none())
                    .await
                    .unwrap()
            });

            prop_assert!(results.len() <= 10);
            prop_assert!(results.windows(2).all(|w| w[0].score >= w[1].score));
            prop_assert!(results.iter().all(|r| r.score >= threshold));
        }
    }
}
