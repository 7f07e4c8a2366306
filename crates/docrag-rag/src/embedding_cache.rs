//! Content-addressed embedding cache.
//!
//! Maps (model, normalized text) to a vector through any [`CacheBackend`].
//! The cache is an optimization only: when the backend fails every operation
//! degrades to a miss (or a zero count) and the failure is logged.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::{debug, info, warn};

use docrag_core::{CacheBackend, CacheSize, Error};

/// Default key prefix, also the root of the default invalidation pattern
pub const KEY_PREFIX: &str = "embed";

/// Result of a batch lookup
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BatchLookup {
    /// Cached vectors keyed by the original text
    pub hits: HashMap<String, Vec<f32>>,
    /// Texts without a cached vector, deduplicated, in first-seen order
    pub misses: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmbeddingCacheStats {
    pub enabled: bool,
    pub total_requests: u64,
    pub hits: u64,
    pub misses: u64,
    pub hit_rate: f64,
    pub ttl_hours: u64,
}

/// Embedding cache in front of a key-value backend
pub struct EmbeddingCache {
    backend: Option<Arc<dyn CacheBackend>>,
    ttl: Duration,
    prefix: String,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl EmbeddingCache {
    pub fn new(backend: Arc<dyn CacheBackend>, ttl: Duration) -> Self {
        Self {
            backend: Some(backend),
            ttl,
            prefix: KEY_PREFIX.to_string(),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// A cache that never stores anything
    pub fn disabled() -> Self {
        Self {
            backend: None,
            ttl: Duration::ZERO,
            prefix: KEY_PREFIX.to_string(),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.backend.is_some()
    }

    /// Cache key for a text under a model.
    ///
    /// Whitespace is collapsed before hashing so that formatting differences
    /// between chunks and queries do not defeat the cache.
    pub fn key(&self, text: &str, model: &str) -> String {
        let mut hasher = blake3::Hasher::new();
        hasher.update(model.as_bytes());
        hasher.update(b":");
        hasher.update(normalize(text).as_bytes());
        format!("{}:{}:{}", self.prefix, model, hasher.finalize().to_hex())
    }

    pub async fn get(&self, text: &str, model: &str) -> Option<Vec<f32>> {
        let backend = self.backend.as_ref()?;
        let key = self.key(text, model);

        match backend.get(&key).await {
            Ok(Some(bytes)) => match decode(&bytes) {
                Some(vector) => {
                    self.hits.fetch_add(1, Ordering::Relaxed);
                    debug!(model, "Embedding cache hit");
                    Some(vector)
                }
                None => {
                    warn!(key, "Discarding malformed cached embedding");
                    self.misses.fetch_add(1, Ordering::Relaxed);
                    None
                }
            },
            Ok(None) => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
            Err(e) => {
                self.degrade("get", &e);
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// Store a vector; `ttl` defaults to the cache TTL. Returns false if not stored.
    pub async fn set(&self, text: &str, vector: &[f32], model: &str, ttl: Option<Duration>) -> bool {
        let Some(backend) = self.backend.as_ref() else {
            return false;
        };
        let key = self.key(text, model);

        match backend.set(&key, encode(vector), ttl.unwrap_or(self.ttl)).await {
            Ok(()) => true,
            Err(e) => {
                self.degrade("set", &e);
                false
            }
        }
    }

    /// Look up several texts at once
    pub async fn batch_get(&self, texts: &[String], model: &str) -> BatchLookup {
        let mut unique: Vec<String> = Vec::new();
        for text in texts {
            if !unique.contains(text) {
                unique.push(text.clone());
            }
        }

        let Some(backend) = self.backend.as_ref() else {
            return BatchLookup {
                hits: HashMap::new(),
                misses: unique,
            };
        };

        let keys: Vec<String> = unique.iter().map(|t| self.key(t, model)).collect();
        let values = match backend.get_many(&keys).await {
            Ok(values) if values.len() == keys.len() => values,
            Ok(values) => {
                warn!(expected = keys.len(), got = values.len(), "Cache backend returned a misaligned batch");
                vec![None; keys.len()]
            }
            Err(e) => {
                self.degrade("get_many", &e);
                vec![None; keys.len()]
            }
        };

        let mut lookup = BatchLookup::default();
        for (text, value) in unique.into_iter().zip(values) {
            match value.as_deref().and_then(decode) {
                Some(vector) => {
                    lookup.hits.insert(text, vector);
                }
                None => lookup.misses.push(text),
            }
        }

        self.hits.fetch_add(lookup.hits.len() as u64, Ordering::Relaxed);
        self.misses.fetch_add(lookup.misses.len() as u64, Ordering::Relaxed);
        debug!(
            model,
            hits = lookup.hits.len(),
            misses = lookup.misses.len(),
            "Embedding cache batch lookup"
        );
        lookup
    }

    /// Store several (text, vector) pairs, returning how many were written
    pub async fn batch_set(&self, pairs: &[(String, Vec<f32>)], model: &str, ttl: Option<Duration>) -> usize {
        let Some(backend) = self.backend.as_ref() else {
            return 0;
        };
        if pairs.is_empty() {
            return 0;
        }

        let entries: Vec<(String, Vec<u8>)> = pairs
            .iter()
            .map(|(text, vector)| (self.key(text, model), encode(vector)))
            .collect();

        match backend.set_many(entries, ttl.unwrap_or(self.ttl)).await {
            Ok(count) => count,
            Err(e) => {
                self.degrade("set_many", &e);
                0
            }
        }
    }

    /// Delete entries matching a glob pattern, by default every embedding
    pub async fn invalidate(&self, pattern: Option<&str>) -> usize {
        let Some(backend) = self.backend.as_ref() else {
            return 0;
        };
        let default_pattern = format!("{}:*", self.prefix);
        let pattern = pattern.unwrap_or(&default_pattern);

        match backend.scan_delete(pattern).await {
            Ok(count) => {
                info!(pattern, count, "Invalidated cached embeddings");
                count
            }
            Err(e) => {
                self.degrade("scan_delete", &e);
                0
            }
        }
    }

    /// Number and approximate size of the cached embeddings
    pub async fn size(&self) -> CacheSize {
        let Some(backend) = self.backend.as_ref() else {
            return CacheSize::default();
        };

        match backend.size(&format!("{}:*", self.prefix)).await {
            Ok(size) => size,
            Err(e) => {
                self.degrade("size", &e);
                CacheSize::default()
            }
        }
    }

    /// Pre-populate the cache with known embeddings
    pub async fn warm(&self, texts: &[String], vectors: &[Vec<f32>], model: &str) -> usize {
        if texts.len() != vectors.len() {
            warn!(
                texts = texts.len(),
                vectors = vectors.len(),
                "Cannot warm cache with mismatched texts and vectors"
            );
            return 0;
        }

        let pairs: Vec<(String, Vec<f32>)> = texts.iter().cloned().zip(vectors.iter().cloned()).collect();
        let count = self.batch_set(&pairs, model, None).await;
        info!(count, model, "Warmed embedding cache");
        count
    }

    /// Whether the backend currently answers
    pub async fn is_available(&self) -> bool {
        match self.backend.as_ref() {
            Some(backend) => backend.ping().await.is_ok(),
            None => false,
        }
    }

    pub fn stats(&self) -> EmbeddingCacheStats {
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let total = hits + misses;

        EmbeddingCacheStats {
            enabled: self.is_enabled(),
            total_requests: total,
            hits,
            misses,
            hit_rate: if total > 0 { hits as f64 / total as f64 } else { 0.0 },
            ttl_hours: self.ttl.as_secs() / 3600,
        }
    }

    pub fn reset_stats(&self) {
        self.hits.store(0, Ordering::Relaxed);
        self.misses.store(0, Ordering::Relaxed);
    }

    fn degrade(&self, operation: &str, error: &Error) {
        let unavailable = Error::CacheUnavailable(error.to_string());
        warn!(operation, error = %unavailable, "Embedding cache degraded to miss");
    }
}

fn normalize(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn encode(vector: &[f32]) -> Vec<u8> {
    vector.iter().flat_map(|v| v.to_le_bytes()).collect()
}

fn decode(bytes: &[u8]) -> Option<Vec<f32>> {
    if bytes.is_empty() || bytes.len() % 4 != 0 {
        return None;
    }
    Some(
        bytes
            .chunks_exact(4)
            .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
            .collect(),
    )
}
