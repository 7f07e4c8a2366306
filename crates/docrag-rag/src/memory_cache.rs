//! In-process cache backend using moka.
//!
//! TinyLFU admission, bounded entry count and per-entry TTL.

use async_trait::async_trait;
use moka::Expiry;
use moka::sync::Cache;
use std::sync::Arc;
use std::time::{Duration, Instant};

use docrag_core::{CacheBackend, CacheSize, Result, key_pattern};

#[derive(Clone)]
struct CachedBytes {
    bytes: Arc<Vec<u8>>,
    ttl: Duration,
}

/// Expire each entry after the TTL it was written with
struct PerEntryTtl;

impl Expiry<String, CachedBytes> for PerEntryTtl {
    fn expire_after_create(&self, _key: &String, value: &CachedBytes, _created_at: Instant) -> Option<Duration> {
        Some(value.ttl)
    }

    fn expire_after_update(
        &self,
        _key: &String,
        value: &CachedBytes,
        _updated_at: Instant,
        _duration_until_expiry: Option<Duration>,
    ) -> Option<Duration> {
        Some(value.ttl)
    }
}

/// Bounded in-memory key-value backend
pub struct MemoryCacheBackend {
    cache: Cache<String, CachedBytes>,
}

impl MemoryCacheBackend {
    /// Create a backend holding at most `max_entries` entries.
    pub fn new(max_entries: u64) -> Self {
        let cache = Cache::builder()
            .max_capacity(max_entries)
            .expire_after(PerEntryTtl)
            .build();

        Self { cache }
    }

    /// Number of entries currently in the cache.
    pub fn len(&self) -> u64 {
        self.cache.run_pending_tasks();
        self.cache.entry_count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for MemoryCacheBackend {
    fn default() -> Self {
        Self::new(100_000)
    }
}

#[async_trait]
impl CacheBackend for MemoryCacheBackend {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.cache.get(key).map(|v| v.bytes.as_ref().clone()))
    }

    async fn set(&self, key: &str, value: Vec<u8>, ttl: Duration) -> Result<()> {
        self.cache.insert(
            key.to_string(),
            CachedBytes {
                bytes: Arc::new(value),
                ttl,
            },
        );
        Ok(())
    }

    async fn scan_delete(&self, pattern: &str) -> Result<usize> {
        let pattern = key_pattern(pattern)?;
        let keys: Vec<String> = self
            .cache
            .iter()
            .filter(|(key, _)| pattern.matches(key))
            .map(|(key, _)| key.as_ref().clone())
            .collect();

        for key in &keys {
            self.cache.invalidate(key);
        }
        self.cache.run_pending_tasks();
        Ok(keys.len())
    }

    async fn size(&self, pattern: &str) -> Result<CacheSize> {
        let pattern = key_pattern(pattern)?;
        self.cache.run_pending_tasks();
        Ok(self
            .cache
            .iter()
            .filter(|(key, _)| pattern.matches(key))
            .fold(CacheSize::default(), |acc, (key, value)| CacheSize {
                keys: acc.keys + 1,
                approx_bytes: acc.approx_bytes + (key.len() + value.bytes.len()) as u64,
            }))
    }

    async fn ping(&self) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_set_get_and_miss() {
        let backend = MemoryCacheBackend::new(100);
        backend.set("a", vec![1, 2, 3], Duration::from_secs(60)).await.unwrap();
        assert_eq!(backend.get("a").await.unwrap(), Some(vec![1, 2, 3]));
        assert_eq!(backend.get("b").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_entries_expire_by_ttl() {
        let backend = MemoryCacheBackend::new(100);
        backend.set("short", vec![1], Duration::from_millis(20)).await.unwrap();
        backend.set("long", vec![2], Duration::from_secs(60)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(backend.get("short").await.unwrap(), None);
        assert_eq!(backend.get("long").await.unwrap(), Some(vec![2]));
    }

    #[tokio::test]
    async fn test_scan_delete_by_pattern() {
        let backend = MemoryCacheBackend::new(100);
        let ttl = Duration::from_secs(60);
        backend.set("embed:m1:a", vec![1], ttl).await.unwrap();
        backend.set("embed:m1:b", vec![1], ttl).await.unwrap();
        backend.set("embed:m2:a", vec![1], ttl).await.unwrap();
        backend.set("other", vec![1], ttl).await.unwrap();

        assert_eq!(backend.scan_delete("embed:m1:*").await.unwrap(), 2);
        assert_eq!(backend.get("embed:m1:a").await.unwrap(), None);
        assert_eq!(backend.get("embed:m2:a").await.unwrap(), Some(vec![1]));
        assert_eq!(backend.scan_delete("embed:*").await.unwrap(), 1);
        assert_eq!(backend.len(), 1);
    }

    #[tokio::test]
    async fn test_size_counts_matching_entries() {
        let backend = MemoryCacheBackend::new(100);
        let ttl = Duration::from_secs(60);
        backend.set("embed:m1:a", vec![0; 10], ttl).await.unwrap();
        backend.set("embed:m1:b", vec![0; 6], ttl).await.unwrap();
        backend.set("other", vec![0; 100], ttl).await.unwrap();

        let size = backend.size("embed:m1:*").await.unwrap();
        assert_eq!(size, CacheSize { keys: 2, approx_bytes: 10 + 10 + 10 + 6 });
        assert_eq!(backend.size("*").await.unwrap().keys, 3);
    }

    #[tokio::test]
    async fn test_invalid_pattern_is_an_error() {
        let backend = MemoryCacheBackend::new(100);
        backend.set("embed:a", vec![1], Duration::from_secs(60)).await.unwrap();

        assert!(matches!(backend.scan_delete("embed:[").await, Err(docrag_core::Error::InvalidInput(_))));
        assert_eq!(backend.get("embed:a").await.unwrap(), Some(vec![1]));
    }
}
