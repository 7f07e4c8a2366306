//! Key-value cache backend trait

use async_trait::async_trait;
use glob::Pattern;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::{Error, Result};

/// Byte-oriented key-value store with per-entry TTL (e.g., Redis, an in-process map)
///
/// Every method may fail when the backend is unreachable. Callers treat the
/// cache as an optimization and degrade to a miss instead of propagating.
#[async_trait]
pub trait CacheBackend: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;

    async fn set(&self, key: &str, value: Vec<u8>, ttl: Duration) -> Result<()>;

    /// Fetch several keys; the result is aligned with `keys`
    async fn get_many(&self, keys: &[String]) -> Result<Vec<Option<Vec<u8>>>> {
        let mut values = Vec::with_capacity(keys.len());
        for key in keys {
            values.push(self.get(key).await?);
        }
        Ok(values)
    }

    /// Store several entries, returning how many were written
    async fn set_many(&self, entries: Vec<(String, Vec<u8>)>, ttl: Duration) -> Result<usize> {
        let mut written = 0;
        for (key, value) in entries {
            self.set(&key, value, ttl).await?;
            written += 1;
        }
        Ok(written)
    }

    /// Delete every key matching a glob pattern; see [`key_pattern`]
    async fn scan_delete(&self, pattern: &str) -> Result<usize>;

    /// Count the keys matching a glob pattern and their approximate size
    async fn size(&self, pattern: &str) -> Result<CacheSize>;

    /// Check that the backend is reachable
    async fn ping(&self) -> Result<()>;
}

/// Key count and approximate footprint of the entries matching a pattern
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheSize {
    pub keys: usize,
    /// Key plus value bytes
    pub approx_bytes: u64,
}

/// Compile a key pattern (`*`, `?`, `[...]`)
pub fn key_pattern(pattern: &str) -> Result<Pattern> {
    Pattern::new(pattern).map_err(|e| Error::InvalidInput(format!("invalid key pattern '{}': {}", pattern, e)))
}
