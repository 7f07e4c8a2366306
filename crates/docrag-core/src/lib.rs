//! Core traits and types for DocRAG
//!
//! This crate defines the data model shared by the retrieval engine: processed
//! documents and chunks, query results, the error taxonomy and configuration.
//! It also defines the three I/O boundaries (AI provider, cache backend, vector
//! backend) as traits so that every component can be tested against fakes.

pub mod cache;
pub mod config;
pub mod document;
pub mod document_indexer;
pub mod error;
pub mod llm;
pub mod query;
pub mod retry;
pub mod vector_store;

#[cfg(test)]
mod tests;

pub use cache::{CacheBackend, CacheSize, key_pattern};
pub use config::{
    CacheConfig, ChunkingConfig, CostConfig, EmbeddingConfig, ProviderConfig, RagConfig,
    RetrievalConfig,
};
pub use document::{
    Chunk, ChunkMetadata, ChunkingStrategy, EmbeddingRecord, PageInfo, ProcessedDocument,
    StructuredSection, Table,
};
pub use document_indexer::{DocumentIndexer, IndexingResult, IndexingStatus};
pub use error::{Error, Result};
pub use llm::{AiProvider, CompletionRequest};
pub use query::{
    AnswerCacheEntry, ConversationTurn, EngineKind, ExpertiseLevel, FeedbackEntry, FeedbackType,
    QueryMetadata, QueryResult, QueryType, RouterMetadata, ScoredChunk, SearchFilters, Source,
    SourceMetadata, SubQuestion, SubQuestionSummary, UserContext, rank_order,
};
pub use retry::RetryPolicy;
pub use vector_store::{BackendStats, VectorBackend, cosine_similarity, lexical_score, query_terms};
