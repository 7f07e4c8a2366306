//! Document indexer trait and types

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::Result;
use crate::document::ProcessedDocument;

/// Result of indexing one document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexingResult {
    pub success: bool,
    pub document_id: String,
    pub num_chunks: usize,
    pub num_embeddings: usize,
    pub processing_time_ms: u64,
    /// True when the document was already indexed and left untouched
    #[serde(default)]
    pub skipped: bool,
    pub errors: Vec<String>,
}

impl IndexingResult {
    pub fn failed(document_id: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            success: false,
            document_id: document_id.into(),
            num_chunks: 0,
            num_embeddings: 0,
            processing_time_ms: 0,
            skipped: false,
            errors: vec![error.into()],
        }
    }
}

/// Whether a document currently has embeddings in the store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexingStatus {
    pub document_id: String,
    pub indexed: bool,
    pub num_embeddings: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub document_type: Option<String>,
}

/// Trait for document indexers
///
/// Turns processed documents into stored embeddings. Re-indexing an already
/// indexed document is a no-op unless `force_reindex` is set, in which case
/// the previous embeddings are deleted first.
#[async_trait]
pub trait DocumentIndexer: Send + Sync {
    /// Index a single document
    async fn index_document(
        &self,
        document_id: &str,
        document: &ProcessedDocument,
        force_reindex: bool,
    ) -> Result<IndexingResult>;

    /// Index multiple documents with bounded parallelism
    async fn index_documents(
        &self,
        documents: Vec<(String, ProcessedDocument)>,
        force_reindex: bool,
    ) -> Result<Vec<IndexingResult>>;

    /// Report the indexing status of a document
    async fn indexing_status(&self, document_id: &str) -> Result<IndexingStatus>;
}
