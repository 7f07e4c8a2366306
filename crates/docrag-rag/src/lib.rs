//! Retrieval-augmented generation engine for DocRAG
//!
//! Documents are chunked, embedded through a cache in front of the AI
//! provider, and stored in a vector backend. Queries run through one of three
//! engines. [`RagSystem`] wires everything together from a [`RagConfig`].
//!
//! [`RagConfig`]: docrag_core::RagConfig

pub mod chunker;
pub mod embedding_cache;
pub mod engine;
pub mod indexer;
pub mod memory_cache;
pub mod provider;
pub mod system;
pub mod vector_store;

#[cfg(test)]
mod testing;

pub use chunker::{Chunker, ChunkingOutcome, StructureProfile};
pub use embedding_cache::{EmbeddingCache, EmbeddingCacheStats};
pub use engine::{
    ComplexityAnalysis, QueryClassifier, QueryOptions, RouterQueryEngine, SimpleQueryEngine,
    SubQuestionQueryEngine,
};
pub use indexer::RagIndexer;
pub use memory_cache::MemoryCacheBackend;
pub use provider::{HealthReport, ProviderAdapter, UsageSnapshot};
pub use system::RagSystem;
pub use vector_store::{
    FeedbackInput, InMemoryVectorBackend, IndexStats, QdrantVectorBackend, VectorStoreService,
};
