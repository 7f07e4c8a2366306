//! Indexing pipeline: chunk, embed through the cache, store

use async_trait::async_trait;
use futures::future::join_all;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Semaphore;
use tracing::{error, info};

use docrag_core::{
    DocumentIndexer, EmbeddingRecord, Error, IndexingResult, IndexingStatus, ProcessedDocument,
    Result,
};

use crate::chunker::Chunker;
use crate::provider::ProviderAdapter;
use crate::vector_store::VectorStoreService;

/// Document indexer backed by the chunker, provider adapter and vector store
pub struct RagIndexer {
    chunker: Chunker,
    provider: Arc<ProviderAdapter>,
    store: Arc<VectorStoreService>,
    max_concurrency: usize,
}

impl RagIndexer {
    pub fn new(
        chunker: Chunker,
        provider: Arc<ProviderAdapter>,
        store: Arc<VectorStoreService>,
        max_concurrency: usize,
    ) -> Self {
        Self {
            chunker,
            provider,
            store,
            max_concurrency: max_concurrency.max(1),
        }
    }

    pub fn chunker(&self) -> &Chunker {
        &self.chunker
    }

    /// Index a plain-text file; form feeds separate pages and the file stem is the document id
    pub async fn index_file(&self, path: &Path, force_reindex: bool) -> Result<IndexingResult> {
        let content = tokio::fs::read_to_string(path).await?;
        let document_id = document_id_for(path)?;
        let document = ProcessedDocument::from_paged_text(&content);
        self.index_document(&document_id, &document, force_reindex).await
    }

    async fn run(&self, document_id: &str, document: &ProcessedDocument, force_reindex: bool) -> Result<IndexingResult> {
        let started = Instant::now();

        let existing = self.store.chunks_for_document(document_id, None).await?;
        if !existing.is_empty() {
            if !force_reindex {
                info!(document_id, chunks = existing.len(), "Document already indexed, skipping");
                return Ok(IndexingResult {
                    success: true,
                    document_id: document_id.to_string(),
                    num_chunks: existing.len(),
                    num_embeddings: existing.len(),
                    processing_time_ms: started.elapsed().as_millis() as u64,
                    skipped: true,
                    errors: Vec::new(),
                });
            }
            let removed = self.store.delete_embeddings(document_id).await?;
            info!(document_id, removed, "Deleted previous embeddings before re-indexing");
        }

        let chunks = self.chunker.chunk_default(document_id, document)?;
        if chunks.is_empty() {
            return Err(Error::InvalidInput(format!(
                "Document {} produced no chunks",
                document_id
            )));
        }

        let texts: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();
        let vectors = self.provider.embed_batch(&texts).await?;
        let model = self.provider.embedding_model().to_string();

        let records: Vec<EmbeddingRecord> = chunks
            .into_iter()
            .zip(vectors)
            .map(|(chunk, vector)| EmbeddingRecord {
                chunk,
                vector,
                model: model.clone(),
            })
            .collect();
        let num_chunks = records.len();
        let num_embeddings = self.store.add_embeddings(records).await?;

        let processing_time_ms = started.elapsed().as_millis() as u64;
        info!(document_id, num_chunks, num_embeddings, processing_time_ms, "Indexed document");

        Ok(IndexingResult {
            success: true,
            document_id: document_id.to_string(),
            num_chunks,
            num_embeddings,
            processing_time_ms,
            skipped: false,
            errors: Vec::new(),
        })
    }
}

fn document_id_for(path: &Path) -> Result<String> {
    path.file_stem()
        .and_then(|s| s.to_str())
        .filter(|s| !s.trim().is_empty())
        .map(str::to_string)
        .ok_or_else(|| Error::InvalidInput(format!("Cannot derive a document id from {}", path.display())))
}

#[async_trait]
impl DocumentIndexer for RagIndexer {
    async fn index_document(
        &self,
        document_id: &str,
        document: &ProcessedDocument,
        force_reindex: bool,
    ) -> Result<IndexingResult> {
        let started = Instant::now();
        match self.run(document_id, document, force_reindex).await {
            Ok(result) => Ok(result),
            Err(e) => {
                error!(document_id, error = %e, "Indexing failed");
                let mut result = IndexingResult::failed(document_id, e.to_string());
                result.processing_time_ms = started.elapsed().as_millis() as u64;
                Ok(result)
            }
        }
    }

    async fn index_documents(
        &self,
        documents: Vec<(String, ProcessedDocument)>,
        force_reindex: bool,
    ) -> Result<Vec<IndexingResult>> {
        let permits = Semaphore::new(self.max_concurrency);
        let results = join_all(documents.iter().map(|(document_id, document)| {
            let permits = &permits;
            async move {
                let _permit = permits.acquire().await.ok();
                self.index_document(document_id, document, force_reindex)
                    .await
                    .unwrap_or_else(|e| IndexingResult::failed(document_id.as_str(), e.to_string()))
            }
        }))
        .await;

        let succeeded = results.iter().filter(|r| r.success).count();
        info!(total = results.len(), succeeded, "Indexed document batch");
        Ok(results)
    }

    async fn indexing_status(&self, document_id: &str) -> Result<IndexingStatus> {
        let chunks = self.store.chunks_for_document(document_id, None).await?;
        Ok(IndexingStatus {
            document_id: document_id.to_string(),
            indexed: !chunks.is_empty(),
            num_embeddings: chunks.len(),
            document_type: chunks.iter().find_map(|c| c.document_type.clone()),
        })
    }
}
