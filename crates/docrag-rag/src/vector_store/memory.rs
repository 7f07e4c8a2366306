//! In-process vector backend with optional JSON persistence

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::RwLock;
use tracing::{debug, info};

use docrag_core::{
    BackendStats, Chunk, EmbeddingRecord, Error, Result, ScoredChunk, SearchFilters, VectorBackend,
    cosine_similarity, lexical_score, query_terms, rank_order,
};

#[derive(Debug, Default, Serialize, Deserialize)]
struct StoreData {
    records: Vec<EmbeddingRecord>,
    dimension: Option<usize>,
}

/// Brute-force vector backend keyed by chunk id
pub struct InMemoryVectorBackend {
    records: RwLock<HashMap<String, EmbeddingRecord>>,
    data_file: Option<PathBuf>,
}

impl InMemoryVectorBackend {
    pub fn new() -> Self {
        Self {
            records: RwLock::new(HashMap::new()),
            data_file: None,
        }
    }

    /// Open a backend persisted to `data_file`, loading it if it exists
    pub fn open(data_file: impl AsRef<Path>) -> Result<Self> {
        let path = data_file.as_ref().to_path_buf();
        let records = if path.exists() {
            Self::load_from_file(&path)?
        } else {
            HashMap::new()
        };
        info!(path = %path.display(), records = records.len(), "Opened vector store file");

        Ok(Self {
            records: RwLock::new(records),
            data_file: Some(path),
        })
    }

    fn load_from_file(path: &Path) -> Result<HashMap<String, EmbeddingRecord>> {
        let content = fs::read_to_string(path)?;
        let data: StoreData = serde_json::from_str(&content)?;
        Ok(data
            .records
            .into_iter()
            .map(|r| (r.chunk.id.clone(), r))
            .collect())
    }

    fn save_to_file(&self, records: &HashMap<String, EmbeddingRecord>) -> Result<()> {
        let Some(path) = &self.data_file else {
            return Ok(());
        };

        let mut sorted: Vec<EmbeddingRecord> = records.values().cloned().collect();
        sorted.sort_by(|a, b| a.chunk.id.cmp(&b.chunk.id));
        let data = StoreData {
            dimension: sorted.first().map(|r| r.vector.len()),
            records: sorted,
        };

        let content = serde_json::to_string(&data)?;
        fs::write(path, content).map_err(|e| Error::Store(format!("Cannot write {}: {}", path.display(), e)))
    }

    fn read(&self) -> Result<std::sync::RwLockReadGuard<'_, HashMap<String, EmbeddingRecord>>> {
        self.records
            .read()
            .map_err(|e| Error::Store(format!("Lock error: {}", e)))
    }

    fn write(&self) -> Result<std::sync::RwLockWriteGuard<'_, HashMap<String, EmbeddingRecord>>> {
        self.records
            .write()
            .map_err(|e| Error::Store(format!("Lock error: {}", e)))
    }

    fn ranked(mut results: Vec<ScoredChunk>, limit: usize) -> Vec<ScoredChunk> {
        results.sort_by(rank_order);
        results.truncate(limit);
        results
    }
}

impl Default for InMemoryVectorBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl VectorBackend for InMemoryVectorBackend {
    async fn upsert(&self, records: Vec<EmbeddingRecord>) -> Result<usize> {
        let mut store = self.write()?;
        let count = records.len();
        for record in records {
            store.insert(record.chunk.id.clone(), record);
        }
        self.save_to_file(&store)?;
        debug!(count, total = store.len(), "Upserted embeddings");
        Ok(count)
    }

    async fn search_vector(
        &self,
        vector: &[f32],
        limit: usize,
        filters: &SearchFilters,
    ) -> Result<Vec<ScoredChunk>> {
        let store = self.read()?;
        let results = store
            .values()
            .filter(|r| filters.matches(&r.chunk))
            .map(|r| ScoredChunk {
                chunk: r.chunk.clone(),
                score: cosine_similarity(vector, &r.vector),
            })
            .collect();
        Ok(Self::ranked(results, limit))
    }

    async fn search_lexical(
        &self,
        query: &str,
        limit: usize,
        filters: &SearchFilters,
    ) -> Result<Vec<ScoredChunk>> {
        let terms = query_terms(query);
        let store = self.read()?;
        let results = store
            .values()
            .filter(|r| filters.matches(&r.chunk))
            .map(|r| ScoredChunk {
                chunk: r.chunk.clone(),
                score: lexical_score(&terms, &r.chunk.text),
            })
            .filter(|s| s.score > 0.0)
            .collect();
        Ok(Self::ranked(results, limit))
    }

    async fn delete_document(&self, document_id: &str) -> Result<usize> {
        let mut store = self.write()?;
        let before = store.len();
        store.retain(|_, r| r.chunk.document_id != document_id);
        let removed = before - store.len();
        if removed > 0 {
            self.save_to_file(&store)?;
        }
        Ok(removed)
    }

    async fn document_chunks(&self, document_id: &str) -> Result<Vec<Chunk>> {
        let store = self.read()?;
        let mut chunks: Vec<Chunk> = store
            .values()
            .filter(|r| r.chunk.document_id == document_id)
            .map(|r| r.chunk.clone())
            .collect();
        chunks.sort_by_key(|c| c.index);
        Ok(chunks)
    }

    async fn stats(&self) -> Result<BackendStats> {
        let store = self.read()?;
        let mut documents = BTreeSet::new();
        let mut by_document_type: BTreeMap<String, usize> = BTreeMap::new();

        for record in store.values() {
            documents.insert(record.chunk.document_id.as_str());
            if let Some(document_type) = &record.chunk.document_type {
                *by_document_type.entry(document_type.clone()).or_default() += 1;
            }
        }

        Ok(BackendStats {
            total_embeddings: store.len(),
            unique_documents: documents.len(),
            by_document_type,
            dimension: store.values().next().map(|r| r.vector.len()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::chunk;

    fn record(document_id: &str, index: usize, text: &str, vector: Vec<f32>) -> EmbeddingRecord {
        EmbeddingRecord {
            chunk: chunk(document_id, index, text),
            vector,
            model: "mistral-embed".to_string(),
        }
    }

    #[tokio::test]
    async fn test_upsert_overwrites_by_chunk_id() {
        let backend = InMemoryVectorBackend::new();
        backend.upsert(vec![record("d", 0, "ancien", vec![1.0, 0.0])]).await.unwrap();
        backend.upsert(vec![record("d", 0, "nouveau", vec![0.0, 1.0])]).await.unwrap();

        let chunks = backend.document_chunks("d").await.unwrap();
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].text, "nouveau");
    }

    #[tokio::test]
    async fn test_lexical_search_skips_non_matching() {
        let backend = InMemoryVectorBackend::new();
        backend
            .upsert(vec![
                record("d", 0, "Le délai de paiement est de 30 jours", vec![1.0]),
                record("d", 1, "Les pénalités de retard", vec![1.0]),
                record("d", 2, "Sans rapport", vec![1.0]),
            ])
            .await
            .unwrap();

        let results = backend
            .search_lexical("délai de paiement", 10, &SearchFilters::none())
            .await
            .unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].chunk.index, 0);
        assert_eq!(results[0].score, 1.0);
    }

    #[tokio::test]
    async fn test_persists_to_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.json");

        {
            let backend = InMemoryVectorBackend::open(&path).unwrap();
            backend
                .upsert(vec![record("d", 0, "texte", vec![0.5, 0.5]), record("e", 0, "autre", vec![1.0, 0.0])])
                .await
                .unwrap();
            assert_eq!(backend.delete_document("e").await.unwrap(), 1);
        }

        let reopened = InMemoryVectorBackend::open(&path).unwrap();
        let stats = reopened.stats().await.unwrap();
        assert_eq!(stats.total_embeddings, 1);
        assert_eq!(stats.dimension, Some(2));
    }
}
