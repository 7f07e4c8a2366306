//! Wiring of the whole engine from one configuration

use std::sync::Arc;
use tracing::info;

use docrag_core::{
    AiProvider, CacheBackend, ConversationTurn, DocumentIndexer, Error, QueryResult, RagConfig,
    Result, UserContext, VectorBackend,
};

use crate::chunker::{Chunker, StructureProfile};
use crate::embedding_cache::EmbeddingCache;
use crate::engine::{QueryOptions, RouterQueryEngine, SimpleQueryEngine, SubQuestionQueryEngine};
use crate::indexer::RagIndexer;
use crate::memory_cache::MemoryCacheBackend;
use crate::provider::ProviderAdapter;
use crate::vector_store::VectorStoreService;

/// Handles to every component, built once and shared by the front ends
pub struct RagSystem {
    config: RagConfig,
    provider: Arc<ProviderAdapter>,
    store: Arc<VectorStoreService>,
    indexer: RagIndexer,
    router: RouterQueryEngine,
}

impl RagSystem {
    /// Build with the in-process cache backend
    pub fn new(config: RagConfig, provider: Arc<dyn AiProvider>, vectors: Arc<dyn VectorBackend>) -> Result<Self> {
        let cache: Arc<dyn CacheBackend> = Arc::new(MemoryCacheBackend::new(config.cache.max_entries));
        Self::with_cache_backend(config, provider, vectors, cache)
    }

    pub fn with_cache_backend(
        config: RagConfig,
        provider: Arc<dyn AiProvider>,
        vectors: Arc<dyn VectorBackend>,
        cache_backend: Arc<dyn CacheBackend>,
    ) -> Result<Self> {
        config.validate()?;
        if provider.dimensions() != config.embedding.dimension {
            return Err(Error::Configuration(format!(
                "provider produces {}-dimensional embeddings but VECTOR_DIMENSION is {}",
                provider.dimensions(),
                config.embedding.dimension
            )));
        }

        let cache = if config.cache.enable_embedding_cache {
            EmbeddingCache::new(cache_backend, config.cache.embedding_ttl)
        } else {
            EmbeddingCache::disabled()
        };
        let provider = Arc::new(ProviderAdapter::new(
            provider,
            Arc::new(cache),
            config.provider.clone(),
            config.cost.clone(),
        ));

        let store = Arc::new(
            VectorStoreService::new(vectors, config.embedding.dimension, &config.retrieval)
                .with_answer_cache(config.cache.enable_query_cache, config.cache.query_ttl),
        );

        let chunker = Chunker::new(config.chunking.clone(), StructureProfile::default());
        let indexer = RagIndexer::new(
            chunker,
            provider.clone(),
            store.clone(),
            config.provider.max_concurrent_requests,
        );

        let simple = Arc::new(SimpleQueryEngine::new(
            store.clone(),
            provider.clone(),
            config.retrieval.clone(),
        ));
        let subquestion = Arc::new(
            SubQuestionQueryEngine::new(
                simple.clone(),
                config.retrieval.max_subquestions,
                config.provider.max_concurrent_requests,
            )
            .with_subquestion_timeout(config.provider.request_timeout * 4),
        );
        let router = RouterQueryEngine::new(simple, subquestion);

        info!(
            embedding_model = provider.embedding_model(),
            completion_model = provider.completion_model(),
            dimension = config.embedding.dimension,
            "RAG system ready"
        );

        Ok(Self {
            config,
            provider,
            store,
            indexer,
            router,
        })
    }

    pub fn config(&self) -> &RagConfig {
        &self.config
    }

    pub fn provider(&self) -> &Arc<ProviderAdapter> {
        &self.provider
    }

    pub fn store(&self) -> &Arc<VectorStoreService> {
        &self.store
    }

    pub fn indexer(&self) -> &RagIndexer {
        &self.indexer
    }

    pub fn router(&self) -> &RouterQueryEngine {
        &self.router
    }

    pub fn chunker(&self) -> &Chunker {
        self.indexer.chunker()
    }

    /// Routed query with default options
    pub async fn ask(&self, query: &str) -> QueryResult {
        self.router.query(query, &QueryOptions::default(), None).await
    }

    pub async fn ask_as(&self, query: &str, user: &UserContext, history: &[ConversationTurn]) -> QueryResult {
        self.router.adaptive_query(query, user, history).await
    }

    pub fn as_indexer(&self) -> &dyn DocumentIndexer {
        &self.indexer
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{ScriptedProvider, fast_provider_config};
    use crate::vector_store::InMemoryVectorBackend;
    use docrag_core::{EmbeddingConfig, ProcessedDocument};

    fn config(dimension: usize) -> RagConfig {
        RagConfig {
            embedding: EmbeddingConfig {
                dimension,
                ..EmbeddingConfig::default()
            },
            provider: fast_provider_config(),
            ..RagConfig::default()
        }
    }

    #[test]
    fn test_dimension_mismatch_is_a_configuration_error() {
        let result = RagSystem::new(
            config(1024),
            Arc::new(ScriptedProvider::new(16)),
            Arc::new(InMemoryVectorBackend::new()),
        );
        assert!(matches!(result, Err(Error::Configuration(_))));
    }

    #[tokio::test]
    async fn test_index_then_ask() {
        let provider = Arc::new(ScriptedProvider::new(16));
        let system = RagSystem::new(config(16), provider.clone(), Arc::new(InMemoryVectorBackend::new())).unwrap();

        let text = "Article 1 - Objet\n\nLe présent marché porte sur la maintenance des ascenseurs du siège.\n\nArticle 2 - Durée\n\nLe marché est conclu pour une durée de douze mois à compter de la notification.";
        let result = system
            .as_indexer()
            .index_document("ccap", &ProcessedDocument::from_text(text), false)
            .await
            .unwrap();
        assert!(result.success);

        let stats = system.store().index_stats().await.unwrap();
        assert_eq!(stats.total_embeddings, result.num_embeddings);

        let answer = system.ask("Quelle est la durée du marché ?").await;
        assert!(answer.metadata.router.is_some());
    }
}
