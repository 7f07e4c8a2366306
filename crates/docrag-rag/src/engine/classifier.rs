//! Query intent classification: pattern table plus provider arbitration

use regex::Regex;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use docrag_core::{CompletionRequest, QueryType};

use crate::engine::prompts;
use crate::provider::ProviderAdapter;

/// Pattern matches at which a type wins without asking the provider
pub const STRONG_SIGNAL: usize = 2;

/// Tie-break among equally strong pattern signals, highest first
pub const TYPE_PRIORITY: [QueryType; 8] = [
    QueryType::Compliance,
    QueryType::Comparison,
    QueryType::Procedural,
    QueryType::Aggregation,
    QueryType::Temporal,
    QueryType::Analytical,
    QueryType::Complex,
    QueryType::Simple,
];

fn default_patterns() -> Vec<(QueryType, Vec<&'static str>)> {
    vec![
        (
            QueryType::Simple,
            vec![
                r"qu'est[- ]ce que",
                r"définition",
                r"signifie",
                r"^quel(?:le)?\s+(?:est|sont)",
                r"^où\s+",
                r"^quand\s+",
            ],
        ),
        (
            QueryType::Comparison,
            vec![
                r"compar\w+",
                r"différence",
                r"versus",
                r"contre",
                r"meilleur",
                r"préfér\w+",
                r"avantage",
                r"inconvénient",
            ],
        ),
        (
            QueryType::Aggregation,
            vec![
                r"combien",
                r"liste[rz]?",
                r"énumér\w+",
                r"tous?\s+les",
                r"chaque",
                r"résume[rz]?",
                r"synthèse",
            ],
        ),
        (
            QueryType::Procedural,
            vec![
                r"comment",
                r"étapes?",
                r"procédure",
                r"processus",
                r"méthode",
                r"façon de",
                r"manière de",
            ],
        ),
        (
            QueryType::Analytical,
            vec![
                r"analys\w+",
                r"évaluer",
                r"interpréter",
                r"expliquer pourquoi",
                r"raisons?",
                r"causes?",
                r"conséquences?",
            ],
        ),
        (
            QueryType::Temporal,
            vec![
                r"quand",
                r"délai",
                r"date",
                r"période",
                r"avant",
                r"après",
                r"pendant",
                r"historique",
                r"évolution",
            ],
        ),
        (
            QueryType::Compliance,
            vec![
                r"conforme",
                r"conformité",
                r"réglementaire",
                r"légal",
                r"obligation",
                r"doit",
                r"requis",
                r"norme",
                r"standard",
            ],
        ),
    ]
}

/// Pattern match counts per type, for types with at least one match
pub type Signals = BTreeMap<QueryType, usize>;

pub struct QueryClassifier {
    patterns: Vec<(QueryType, Vec<Regex>)>,
    provider: Arc<ProviderAdapter>,
}

impl QueryClassifier {
    pub fn new(provider: Arc<ProviderAdapter>) -> Self {
        let patterns = default_patterns()
            .into_iter()
            .map(|(query_type, patterns)| {
                let compiled = patterns
                    .into_iter()
                    .filter_map(|p| Regex::new(p).ok())
                    .collect();
                (query_type, compiled)
            })
            .collect();

        Self { patterns, provider }
    }

    /// Count pattern matches per type on the lowercased query
    pub fn signals(&self, query: &str) -> Signals {
        let lower = query.to_lowercase();
        self.patterns
            .iter()
            .filter_map(|(query_type, patterns)| {
                let matches = patterns.iter().filter(|p| p.is_match(&lower)).count();
                (matches > 0).then_some((*query_type, matches))
            })
            .collect()
    }

    /// Classify a query, consulting the provider only without a strong signal
    pub async fn classify(&self, query: &str) -> QueryType {
        self.classify_within(query, None).await
    }

    /// [`classify`](Self::classify) with a limit on the provider call
    pub async fn classify_within(&self, query: &str, limit: Option<Duration>) -> QueryType {
        let signals = self.signals(query);

        if let Some(strong) = strongest(&signals).filter(|t| signals[t] >= STRONG_SIGNAL) {
            debug!(query_type = %strong, "Strong pattern signal");
            return strong;
        }

        let llm_type = self.classify_with_provider(query, limit).await;
        let decided = decide(&signals, llm_type);
        debug!(query_type = %decided, llm = %llm_type, signals = ?signals, "Classified query");
        decided
    }

    async fn classify_with_provider(&self, query: &str, limit: Option<Duration>) -> QueryType {
        let request = CompletionRequest::new(prompts::classify_prompt(query))
            .with_system(prompts::CLASSIFY_SYSTEM)
            .with_temperature(0.1)
            .with_max_tokens(20);

        match self.provider.complete_with(&request, limit).await {
            Ok(label) => QueryType::from_label(&label).unwrap_or(QueryType::Complex),
            Err(e) => {
                warn!(error = %e, "Provider classification failed");
                QueryType::Complex
            }
        }
    }
}

fn rank(query_type: QueryType) -> usize {
    TYPE_PRIORITY
        .iter()
        .position(|t| *t == query_type)
        .unwrap_or(TYPE_PRIORITY.len())
}

/// Type with the most matches, ties broken by [`TYPE_PRIORITY`]
pub fn strongest(signals: &Signals) -> Option<QueryType> {
    signals
        .iter()
        .max_by(|(a, ca), (b, cb)| ca.cmp(cb).then_with(|| rank(**b).cmp(&rank(**a))))
        .map(|(t, _)| *t)
}

/// Combine weak pattern signals with the provider's answer
pub fn decide(signals: &Signals, llm_type: QueryType) -> QueryType {
    if signals.contains_key(&llm_type) {
        return llm_type;
    }
    strongest(signals).unwrap_or(llm_type)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{ScriptedProvider, fast_provider_config};

    fn classifier() -> (Arc<ScriptedProvider>, QueryClassifier) {
        let provider = Arc::new(ScriptedProvider::new(3));
        let adapter = Arc::new(ProviderAdapter::uncached(provider.clone(), fast_provider_config()));
        (provider, QueryClassifier::new(adapter))
    }

    #[test]
    fn test_all_patterns_compile() {
        let (_, classifier) = classifier();
        let expected: usize = default_patterns().iter().map(|(_, p)| p.len()).sum();
        let compiled: usize = classifier.patterns.iter().map(|(_, p)| p.len()).sum();
        assert_eq!(compiled, expected);
    }

    #[test]
    fn test_signals_count_matches() {
        let (_, classifier) = classifier();
        let signals = classifier.signals("Comparer les avantages du CCAP et du CCTP");
        assert_eq!(signals.get(&QueryType::Comparison), Some(&2));
        assert!(!signals.contains_key(&QueryType::Simple));
    }

    #[test]
    fn test_tie_break_follows_priority() {
        let signals = Signals::from([(QueryType::Temporal, 1), (QueryType::Compliance, 1), (QueryType::Simple, 1)]);
        assert_eq!(strongest(&signals), Some(QueryType::Compliance));

        let signals = Signals::from([(QueryType::Temporal, 2), (QueryType::Compliance, 1)]);
        assert_eq!(strongest(&signals), Some(QueryType::Temporal));
        assert_eq!(strongest(&Signals::new()), None);
    }

    #[test]
    fn test_decide_prefers_agreeing_provider() {
        let signals = Signals::from([(QueryType::Temporal, 1), (QueryType::Procedural, 1)]);
        assert_eq!(decide(&signals, QueryType::Temporal), QueryType::Temporal);
        assert_eq!(decide(&signals, QueryType::Analytical), QueryType::Procedural);
        assert_eq!(decide(&Signals::new(), QueryType::Analytical), QueryType::Analytical);
    }

    #[tokio::test]
    async fn test_strong_signal_skips_provider() {
        let (provider, classifier) = classifier();
        let query_type = classifier
            .classify("Le dossier est-il conforme aux obligations réglementaires ?")
            .await;
        assert_eq!(query_type, QueryType::Compliance);
        assert!(provider.requests().is_empty());
    }

    #[tokio::test]
    async fn test_weak_signal_consults_provider() {
        let (provider, classifier) = classifier();
        provider.push_completion("procedural");

        let query_type = classifier.classify("Comment soumettre une offre ?").await;
        assert_eq!(query_type, QueryType::Procedural);

        let requests = provider.requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].max_tokens, Some(20));
    }

    #[tokio::test]
    async fn test_unrecognised_label_defaults_to_complex() {
        let (provider, classifier) = classifier();
        provider.push_completion("je ne sais pas");
        assert_eq!(classifier.classify("Parlez-moi du marché").await, QueryType::Complex);
    }
}
