//! Test doubles for the provider, cache and store boundaries

use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use docrag_core::{
    AiProvider, BackendStats, CacheBackend, CacheSize, Chunk, CompletionRequest, EmbeddingRecord, Error,
    ProviderConfig, Result, RetryPolicy, ScoredChunk, SearchFilters, VectorBackend,
};

type MakeError = fn(String) -> Error;

/// Provider config with millisecond delays
pub fn fast_provider_config() -> ProviderConfig {
    let retry = RetryPolicy::completion()
        .with_delays(Duration::from_millis(1), Duration::from_millis(5))
        .with_rate_limit_penalty(Duration::from_millis(1));
    ProviderConfig {
        max_concurrent_requests: 5,
        request_timeout: Duration::from_secs(5),
        embedding_retry: retry.clone(),
        completion_retry: retry,
        max_batch_size: 5,
        inter_call_delay: Duration::ZERO,
        inter_batch_delay: Duration::from_millis(1),
    }
}

/// Hashed bag-of-words embedding; every component is non-negative
pub fn hashed_embedding(text: &str, dimension: usize) -> Vec<f32> {
    let mut vector = vec![0.0f32; dimension];
    for term in docrag_core::query_terms(text) {
        let digest = md5::compute(term.as_bytes());
        let slot = u32::from_le_bytes([digest.0[0], digest.0[1], digest.0[2], digest.0[3]]) as usize % dimension;
        vector[slot] += 1.0;
    }
    if vector.iter().all(|v| *v == 0.0) {
        vector[0] = 1.0;
    }
    vector
}

/// Scripted AI provider.
///
/// Completions are answered from a queue first, then from substring rules
/// matched against system and user prompt, then with a default answer.
pub struct ScriptedProvider {
    dimension: usize,
    reported_dimension: usize,
    vectors: Mutex<HashMap<String, Vec<f32>>>,
    queue: Mutex<VecDeque<Result<String>>>,
    rules: Mutex<Vec<(String, String)>>,
    failures: Mutex<Vec<(String, MakeError)>>,
    delays: Mutex<Vec<(String, Duration)>>,
    embed_failures: Mutex<(usize, Option<MakeError>)>,
    default_answer: String,
    embed_calls: AtomicUsize,
    batch_sizes: Mutex<Vec<usize>>,
    requests: Mutex<Vec<CompletionRequest>>,
}

impl ScriptedProvider {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension,
            reported_dimension: dimension,
            vectors: Mutex::new(HashMap::new()),
            queue: Mutex::new(VecDeque::new()),
            rules: Mutex::new(Vec::new()),
            failures: Mutex::new(Vec::new()),
            delays: Mutex::new(Vec::new()),
            embed_failures: Mutex::new((0, None)),
            default_answer: "Réponse générée [Source 1].".to_string(),
            embed_calls: AtomicUsize::new(0),
            batch_sizes: Mutex::new(Vec::new()),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Report a dimension different from the vectors actually produced
    pub fn with_reported_dimension(mut self, dimension: usize) -> Self {
        self.reported_dimension = dimension;
        self
    }

    /// Fixed vector for an exact text
    pub fn set_vector(&self, text: &str, vector: Vec<f32>) {
        self.vectors.lock().unwrap().insert(text.to_string(), vector);
    }

    pub fn push_completion(&self, answer: impl Into<String>) {
        self.queue.lock().unwrap().push_back(Ok(answer.into()));
    }

    pub fn respond_when(&self, needle: &str, answer: impl Into<String>) {
        self.rules.lock().unwrap().push((needle.to_string(), answer.into()));
    }

    pub fn fail_when(&self, needle: &str, make: MakeError) {
        self.failures.lock().unwrap().push((needle.to_string(), make));
    }

    pub fn delay_when(&self, needle: &str, delay: Duration) {
        self.delays.lock().unwrap().push((needle.to_string(), delay));
    }

    pub fn fail_next_embeddings(&self, count: usize, make: MakeError) {
        *self.embed_failures.lock().unwrap() = (count, Some(make));
    }

    pub fn embed_calls(&self) -> usize {
        self.embed_calls.load(Ordering::SeqCst)
    }

    pub fn batch_sizes(&self) -> Vec<usize> {
        self.batch_sizes.lock().unwrap().clone()
    }

    pub fn requests(&self) -> Vec<CompletionRequest> {
        self.requests.lock().unwrap().clone()
    }

    /// Requests whose user prompt contains `needle`
    pub fn requests_containing(&self, needle: &str) -> Vec<CompletionRequest> {
        self.requests()
            .into_iter()
            .filter(|r| r.prompt.contains(needle))
            .collect()
    }

    fn next_embed_failure(&self) -> Option<Error> {
        let mut failures = self.embed_failures.lock().unwrap();
        if failures.0 == 0 {
            return None;
        }
        failures.0 -= 1;
        failures.1.map(|make| make("scripted embedding failure".to_string()))
    }

    fn vector_for(&self, text: &str) -> Vec<f32> {
        self.vectors
            .lock()
            .unwrap()
            .get(text)
            .cloned()
            .unwrap_or_else(|| hashed_embedding(text, self.dimension))
    }
}

#[async_trait]
impl AiProvider for ScriptedProvider {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        self.embed_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(e) = self.next_embed_failure() {
            return Err(e);
        }
        Ok(self.vector_for(text))
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        self.embed_calls.fetch_add(1, Ordering::SeqCst);
        self.batch_sizes.lock().unwrap().push(texts.len());
        if let Some(e) = self.next_embed_failure() {
            return Err(e);
        }
        Ok(texts.iter().map(|t| self.vector_for(t)).collect())
    }

    async fn complete(&self, request: &CompletionRequest) -> Result<String> {
        self.requests.lock().unwrap().push(request.clone());
        let haystack = format!("{}\n{}", request.system.as_deref().unwrap_or(""), request.prompt);

        let delay = self
            .delays
            .lock()
            .unwrap()
            .iter()
            .find(|(needle, _)| haystack.contains(needle.as_str()))
            .map(|(_, d)| *d);
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let failure = self
            .failures
            .lock()
            .unwrap()
            .iter()
            .find(|(needle, _)| haystack.contains(needle.as_str()))
            .map(|(_, make)| *make);
        if let Some(make) = failure {
            return Err(make("scripted completion failure".to_string()));
        }

        if let Some(answer) = self.queue.lock().unwrap().pop_front() {
            return answer;
        }

        let rule = self
            .rules
            .lock()
            .unwrap()
            .iter()
            .find(|(needle, _)| haystack.contains(needle.as_str()))
            .map(|(_, answer)| answer.clone());
        Ok(rule.unwrap_or_else(|| self.default_answer.clone()))
    }

    fn embedding_model(&self) -> &str {
        "mistral-embed"
    }

    fn completion_model(&self) -> &str {
        "mistral-large-latest"
    }

    fn dimensions(&self) -> usize {
        self.reported_dimension
    }
}

/// Cache backend that is never reachable
pub struct UnavailableCache;

#[async_trait]
impl CacheBackend for UnavailableCache {
    async fn get(&self, _key: &str) -> Result<Option<Vec<u8>>> {
        Err(Error::CacheUnavailable("connection refused".to_string()))
    }

    async fn set(&self, _key: &str, _value: Vec<u8>, _ttl: Duration) -> Result<()> {
        Err(Error::CacheUnavailable("connection refused".to_string()))
    }

    async fn scan_delete(&self, _pattern: &str) -> Result<usize> {
        Err(Error::CacheUnavailable("connection refused".to_string()))
    }

    async fn size(&self, _pattern: &str) -> Result<CacheSize> {
        Err(Error::CacheUnavailable("connection refused".to_string()))
    }

    async fn ping(&self) -> Result<()> {
        Err(Error::CacheUnavailable("connection refused".to_string()))
    }
}

/// Vector backend whose every operation fails
pub struct BrokenVectorBackend;

#[async_trait]
impl VectorBackend for BrokenVectorBackend {
    async fn upsert(&self, _records: Vec<EmbeddingRecord>) -> Result<usize> {
        Err(Error::Store("disk full".to_string()))
    }

    async fn search_vector(&self, _vector: &[f32], _limit: usize, _filters: &SearchFilters) -> Result<Vec<ScoredChunk>> {
        Err(Error::Store("connection reset".to_string()))
    }

    async fn search_lexical(&self, _query: &str, _limit: usize, _filters: &SearchFilters) -> Result<Vec<ScoredChunk>> {
        Err(Error::Store("connection reset".to_string()))
    }

    async fn delete_document(&self, _document_id: &str) -> Result<usize> {
        Err(Error::Store("connection reset".to_string()))
    }

    async fn document_chunks(&self, _document_id: &str) -> Result<Vec<Chunk>> {
        Err(Error::Store("connection reset".to_string()))
    }

    async fn stats(&self) -> Result<BackendStats> {
        Err(Error::Store("connection reset".to_string()))
    }
}

/// A chunk with the given id and text, for store tests
pub fn chunk(document_id: &str, index: usize, text: &str) -> Chunk {
    Chunk {
        id: Chunk::make_id(document_id, index),
        document_id: document_id.to_string(),
        text: text.to_string(),
        index,
        size: text.chars().count(),
        overlap_size: 0,
        section_type: None,
        document_type: None,
        page_number: None,
        confidence: 1.0,
        metadata: docrag_core::ChunkMetadata::new("fixed_size"),
    }
}
