//! Intent-routed engine dispatching to the simple or decomposition path

use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, warn};

use docrag_core::{
    CompletionRequest, ConversationTurn, EngineKind, ExpertiseLevel, QueryResult, QueryType,
    RouterMetadata, UserContext,
};

use crate::engine::classifier::QueryClassifier;
use crate::engine::prompts;
use crate::engine::simple::{QueryOptions, SimpleQueryEngine};
use crate::engine::subquestion::SubQuestionQueryEngine;

/// Chunks retrieved for aggregation queries unless the caller asks otherwise
pub const AGGREGATION_TOP_K: usize = 10;

/// Sub-question cap for comparison and analytical queries
pub const NARROW_DECOMPOSITION: usize = 3;

pub struct RouterQueryEngine {
    classifier: QueryClassifier,
    simple: Arc<SimpleQueryEngine>,
    subquestion: Arc<SubQuestionQueryEngine>,
}

impl RouterQueryEngine {
    pub fn new(simple: Arc<SimpleQueryEngine>, subquestion: Arc<SubQuestionQueryEngine>) -> Self {
        Self {
            classifier: QueryClassifier::new(simple.provider().clone()),
            simple,
            subquestion,
        }
    }

    pub fn simple(&self) -> &Arc<SimpleQueryEngine> {
        &self.simple
    }

    /// Intent of a query without executing it
    pub async fn route(&self, query: &str) -> QueryType {
        self.classifier.classify(query).await
    }

    /// Classify, dispatch, reformat. `force_engine` skips classification.
    pub async fn query(&self, query: &str, options: &QueryOptions, force_engine: Option<EngineKind>) -> QueryResult {
        let started = Instant::now();

        let (query_type, mut result, engine_used) = match force_engine {
            Some(EngineKind::Simple) => (
                QueryType::Simple,
                self.simple.query(query, options).await,
                EngineKind::Simple,
            ),
            Some(EngineKind::SubQuestion) => (
                QueryType::Complex,
                self.subquestion.query(query, options, None).await,
                EngineKind::SubQuestion,
            ),
            None => {
                let query_type = self.classifier.classify_within(query, options.timeout).await;
                let (result, engine_used) = self.dispatch(query_type, query, options).await;
                (query_type, result, engine_used)
            }
        };

        let processing_time_ms = started.elapsed().as_millis() as u64;
        info!(
            query_type = %query_type,
            engine = engine_used.as_str(),
            forced = force_engine.is_some(),
            processing_time_ms,
            "Routed query"
        );

        result.metadata.router = Some(RouterMetadata {
            query_type,
            engine_used,
            processing_time_ms,
            forced: force_engine.is_some(),
        });
        result
    }

    async fn dispatch(&self, query_type: QueryType, query: &str, options: &QueryOptions) -> (QueryResult, EngineKind) {
        match query_type {
            QueryType::Simple => (self.simple.query(query, options).await, EngineKind::Simple),
            QueryType::Temporal => {
                let options = options.clone().with_hybrid(true);
                (self.simple.query(query, &options).await, EngineKind::Simple)
            }
            QueryType::Complex => (
                self.subquestion.query(query, options, None).await,
                EngineKind::SubQuestion,
            ),
            QueryType::Comparison | QueryType::Analytical => (
                self.subquestion
                    .query(query, options, Some(NARROW_DECOMPOSITION))
                    .await,
                EngineKind::SubQuestion,
            ),
            QueryType::Aggregation => {
                let mut options = options.clone().with_hybrid(true);
                options.top_k = Some(options.top_k.unwrap_or(AGGREGATION_TOP_K));
                let mut result = self.simple.query(query, &options).await;
                let prompt = prompts::aggregation_prompt(query, &result.answer);
                self.reformat(&mut result, prompts::AGGREGATION_SYSTEM, prompt, "structured_list", options.timeout)
                    .await;
                (result, EngineKind::Simple)
            }
            QueryType::Procedural => {
                let mut result = self.simple.query(query, options).await;
                let prompt = prompts::procedural_prompt(query, &result.answer);
                self.reformat(&mut result, prompts::PROCEDURAL_SYSTEM, prompt, "procedural", options.timeout)
                    .await;
                (result, EngineKind::Simple)
            }
            QueryType::Compliance => {
                let mut result = self.simple.query(query, options).await;
                let prompt = prompts::compliance_prompt(query, &result.answer);
                self.reformat(&mut result, prompts::COMPLIANCE_SYSTEM, prompt, "compliance", options.timeout)
                    .await;
                result.metadata.requires_validation = true;
                (result, EngineKind::Simple)
            }
        }
    }

    /// Rewrite a grounded answer into a type-specific layout.
    ///
    /// Answers without sources are left alone; a failed rewrite keeps the
    /// simple engine's answer.
    async fn reformat(
        &self,
        result: &mut QueryResult,
        system: &str,
        prompt: String,
        format: &str,
        limit: Option<Duration>,
    ) {
        if result.sources.is_empty() {
            return;
        }

        let request = CompletionRequest::new(prompt)
            .with_system(system)
            .with_temperature(0.1);
        match self.simple.provider().complete_with(&request, limit).await {
            Ok(answer) => {
                result.answer = answer;
                result.metadata.format = Some(format.to_string());
            }
            Err(e) => warn!(error = %e, format, "Reformatting failed, keeping simple answer"),
        }
    }

    /// Answer with the user's expertise and recent conversation taken into account
    pub async fn adaptive_query(&self, query: &str, user: &UserContext, history: &[ConversationTurn]) -> QueryResult {
        let mut options = QueryOptions::default().with_top_k(user.expertise.top_k());
        options.background = prompts::conversation_context(history);

        let mut result = self.query(query, &options, None).await;

        if user.expertise == ExpertiseLevel::Novice && !result.sources.is_empty() && result.metadata.error.is_none() {
            let request = CompletionRequest::new(prompts::simplify_prompt(&result.answer))
                .with_system(prompts::SIMPLIFY_SYSTEM)
                .with_temperature(0.2);
            match self.simple.provider().complete_with(&request, options.timeout).await {
                Ok(simplified) => result.answer = simplified,
                Err(e) => warn!(error = %e, "Simplification failed, keeping original answer"),
            }
        }

        result.metadata.extra.insert(
            "expertise".to_string(),
            serde_json::to_value(user.expertise).unwrap_or_default(),
        );
        if let Some(user_id) = &user.user_id {
            result
                .metadata
                .extra
                .insert("user_id".to_string(), serde_json::Value::from(user_id.as_str()));
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::ProviderAdapter;
    use crate::testing::{ScriptedProvider, chunk, fast_provider_config};
    use crate::vector_store::{InMemoryVectorBackend, VectorStoreService};
    use docrag_core::{EmbeddingRecord, Error, RetrievalConfig};

    const DIM: usize = 3;

    struct Fixture {
        provider: Arc<ScriptedProvider>,
        router: RouterQueryEngine,
    }

    async fn fixture() -> Fixture {
        let provider = Arc::new(ScriptedProvider::new(DIM));
        let adapter = Arc::new(ProviderAdapter::uncached(provider.clone(), fast_provider_config()));
        let store = Arc::new(VectorStoreService::new(
            Arc::new(InMemoryVectorBackend::new()),
            DIM,
            &RetrievalConfig::default(),
        ));
        store
            .add_embeddings(vec![
                EmbeddingRecord {
                    chunk: chunk("rc", 0, "Les offres sont déposées sur la plateforme avant le 15 mars."),
                    vector: vec![1.0, 0.0, 0.0],
                    model: "mistral-embed".to_string(),
                },
                EmbeddingRecord {
                    chunk: chunk("rc", 1, "Le dossier doit comporter une attestation d'assurance."),
                    vector: vec![0.0, 1.0, 0.0],
                    model: "mistral-embed".to_string(),
                },
            ])
            .await
            .unwrap();

        let simple = Arc::new(SimpleQueryEngine::new(store, adapter, RetrievalConfig::default()));
        let subquestion = Arc::new(SubQuestionQueryEngine::new(simple.clone(), 5, 3));
        Fixture {
            provider,
            router: RouterQueryEngine::new(simple, subquestion),
        }
    }

    fn router_metadata(result: &QueryResult) -> &RouterMetadata {
        result.metadata.router.as_ref().unwrap()
    }

    #[tokio::test]
    async fn test_how_to_query_gets_procedural_steps() {
        let f = fixture().await;
        f.provider.set_vector("Comment soumettre une offre ?", vec![1.0, 0.0, 0.0]);
        f.provider.respond_when("Présente sous forme d'étapes", "Étape 1: Déposer l'offre sur la plateforme.");

        let result = f
            .router
            .query("Comment soumettre une offre ?", &QueryOptions::default(), None)
            .await;

        let router = router_metadata(&result);
        assert_eq!(router.query_type, QueryType::Procedural);
        assert_eq!(router.engine_used, EngineKind::Simple);
        assert!(!router.forced);
        assert_eq!(result.metadata.format.as_deref(), Some("procedural"));
        assert_eq!(result.answer, "Étape 1: Déposer l'offre sur la plateforme.");

        let reformat: Vec<_> = f
            .provider
            .requests()
            .into_iter()
            .filter(|r| r.system.as_deref() == Some(prompts::PROCEDURAL_SYSTEM))
            .collect();
        assert_eq!(reformat.len(), 1);
        assert_eq!(reformat[0].temperature, Some(0.1));
    }

    #[tokio::test]
    async fn test_compliance_requires_validation() {
        let f = fixture().await;
        let query = "Le dossier est-il conforme aux obligations réglementaires ?";
        f.provider.set_vector(query, vec![0.0, 1.0, 0.0]);

        let result = f.router.query(query, &QueryOptions::default(), None).await;
        assert_eq!(router_metadata(&result).query_type, QueryType::Compliance);
        assert_eq!(result.metadata.format.as_deref(), Some("compliance"));
        assert!(result.metadata.requires_validation);
    }

    #[tokio::test]
    async fn test_temporal_query_without_relevant_chunks_gets_fallback() {
        let f = fixture().await;
        let query = "Quand tombe la date de dépôt ?";
        f.provider.set_vector(query, vec![0.0, 0.0, 1.0]);

        let result = f.router.query(query, &QueryOptions::default(), None).await;
        assert_eq!(router_metadata(&result).query_type, QueryType::Temporal);
        assert_eq!(result.metadata.search_type.as_deref(), Some("hybrid"));
        assert_eq!(result.answer, prompts::NO_RESULTS_ANSWER);
        assert_eq!(result.confidence, 0.0);
        assert!(result.sources.is_empty());
        assert!(f.provider.requests_containing("Contexte disponible").is_empty());
    }

    #[tokio::test]
    async fn test_caller_timeout_reaches_reformatting() {
        let f = fixture().await;
        f.provider.set_vector("Comment soumettre une offre ?", vec![1.0, 0.0, 0.0]);
        f.provider.delay_when("Présente sous forme d'étapes", Duration::from_secs(1));
        let options = QueryOptions::default().with_timeout(Duration::from_millis(50));

        let started = Instant::now();
        let result = f.router.query("Comment soumettre une offre ?", &options, None).await;

        assert!(started.elapsed() < Duration::from_millis(600), "took {:?}", started.elapsed());
        assert_eq!(router_metadata(&result).query_type, QueryType::Procedural);
        assert!(result.metadata.format.is_none());
        assert_eq!(result.answer, "Réponse générée [Source 1].");
    }

    #[tokio::test]
    async fn test_aggregation_uses_wide_hybrid_retrieval() {
        let f = fixture().await;
        let query = "Combien de pièces et liste des documents ?";
        f.provider.set_vector(query, vec![0.5, 0.5, 0.0]);

        let result = f.router.query(query, &QueryOptions::default(), None).await;
        assert_eq!(router_metadata(&result).query_type, QueryType::Aggregation);
        assert_eq!(result.metadata.search_type.as_deref(), Some("hybrid"));
        assert_eq!(result.metadata.format.as_deref(), Some("structured_list"));
    }

    #[tokio::test]
    async fn test_no_sources_skips_reformatting() {
        let f = fixture().await;
        f.provider.set_vector("Comment obtenir un visa ?", vec![0.0, 0.0, 1.0]);

        let result = f
            .router
            .query("Comment obtenir un visa ?", &QueryOptions::default(), None)
            .await;
        assert_eq!(result.answer, prompts::NO_RESULTS_ANSWER);
        assert!(result.metadata.format.is_none());
        assert!(f.provider.requests_containing("Présente sous forme d'étapes").is_empty());
    }

    #[tokio::test]
    async fn test_failed_reformat_keeps_simple_answer() {
        let f = fixture().await;
        f.provider.set_vector("Comment soumettre une offre ?", vec![1.0, 0.0, 0.0]);
        f.provider.respond_when("Question: Comment soumettre", "Sur la plateforme [Source 1].");
        f.provider.fail_when("Présente sous forme d'étapes", Error::Authentication);

        let result = f
            .router
            .query("Comment soumettre une offre ?", &QueryOptions::default(), None)
            .await;
        assert_eq!(result.answer, "Sur la plateforme [Source 1].");
        assert!(result.metadata.format.is_none());
    }

    #[tokio::test]
    async fn test_forced_engine_skips_classification() {
        let f = fixture().await;
        f.provider.set_vector("Comment soumettre une offre ?", vec![1.0, 0.0, 0.0]);

        let result = f
            .router
            .query("Comment soumettre une offre ?", &QueryOptions::default(), Some(EngineKind::Simple))
            .await;

        let router = router_metadata(&result);
        assert!(router.forced);
        assert_eq!(router.engine_used, EngineKind::Simple);
        assert!(f.provider.requests_containing("Classifie cette question").is_empty());
        assert!(result.metadata.format.is_none());
    }

    #[tokio::test]
    async fn test_adaptive_query_for_novice() {
        let f = fixture().await;
        let query = "Quelle est la date limite de dépôt ?";
        f.provider.set_vector(query, vec![1.0, 0.0, 0.0]);
        f.provider.respond_when("Simplifie:", "Vous avez jusqu'au 15 mars.");
        let history = vec![ConversationTurn {
            question: "Où déposer l'offre ?".to_string(),
            answer: "Sur la plateforme.".to_string(),
        }];
        let user = UserContext {
            expertise: ExpertiseLevel::Novice,
            user_id: Some("u1".to_string()),
        };

        let result = f.router.adaptive_query(query, &user, &history).await;

        assert_eq!(result.answer, "Vous avez jusqu'au 15 mars.");
        let answer_requests = f.provider.requests_containing("Contexte disponible");
        assert_eq!(answer_requests.len(), 1);
        assert!(answer_requests[0].prompt.starts_with("Contexte de la conversation:\nQ: Où déposer l'offre ?"));
        assert_eq!(result.metadata.extra.get("user_id"), Some(&serde_json::Value::from("u1")));
    }
}
