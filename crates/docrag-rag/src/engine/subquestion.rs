//! Decomposition engine: split a complex query, answer the parts, synthesize

use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tracing::{debug, error, info, warn};

use docrag_core::{
    CompletionRequest, EngineKind, Error, QueryMetadata, QueryResult, Result, Source, SubQuestion,
};

use crate::engine::prompts;
use crate::engine::simple::{QueryOptions, SimpleQueryEngine};

/// Complexity score under which `query_with_analysis` uses the simple engine
pub const COMPLEXITY_THRESHOLD: f32 = 0.3;

const SUBQUESTION_LABEL_CHARS: usize = 100;

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct Decomposition {
    subquestions: Vec<RawSubQuestion>,
}

#[derive(Debug, Deserialize)]
struct RawSubQuestion {
    question: String,
    #[serde(default)]
    context: String,
    #[serde(default)]
    priority: Option<u32>,
    #[serde(default)]
    dependencies: Vec<DependencyRef>,
}

/// A dependency as written by the model: a 1-based number, `"q2"`, or the question text
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum DependencyRef {
    Position(u64),
    Text(String),
}

impl DependencyRef {
    fn resolve(&self, questions: &[String]) -> Option<usize> {
        let position = match self {
            DependencyRef::Position(n) => Some(*n as usize),
            DependencyRef::Text(text) => {
                let text = text.trim();
                let digits = text
                    .strip_prefix('q')
                    .or_else(|| text.strip_prefix('Q'))
                    .unwrap_or(text);
                digits.parse::<usize>().ok()
            }
        };

        match position {
            Some(n) if (1..=questions.len()).contains(&n) => Some(n - 1),
            Some(_) => None,
            None => {
                let DependencyRef::Text(text) = self else {
                    return None;
                };
                let wanted = text.trim().to_lowercase();
                questions.iter().position(|q| q.trim().to_lowercase() == wanted)
            }
        }
    }
}

/// Parse a decomposition response.
///
/// The whole response must be the JSON object (optionally inside one code
/// fence). Any empty question, unresolvable or self dependency, or dependency
/// cycle rejects the whole decomposition. The result is sorted by priority
/// with dependencies renumbered accordingly.
pub fn parse_decomposition(raw: &str, max_subquestions: usize) -> Result<Vec<SubQuestion>> {
    let body = strip_code_fence(raw);
    let decomposition: Decomposition = serde_json::from_str(body)
        .map_err(|e| Error::DecompositionParse(format!("Invalid decomposition JSON: {}", e)))?;

    let raw_questions: Vec<RawSubQuestion> = decomposition
        .subquestions
        .into_iter()
        .take(max_subquestions)
        .collect();

    let texts: Vec<String> = raw_questions.iter().map(|q| q.question.clone()).collect();
    if let Some(position) = texts.iter().position(|q| q.trim().is_empty()) {
        return Err(Error::DecompositionParse(format!(
            "Sub-question {} is empty",
            position + 1
        )));
    }

    let mut subquestions = Vec::with_capacity(raw_questions.len());
    for (index, raw) in raw_questions.into_iter().enumerate() {
        let mut dependencies = BTreeSet::new();
        for dependency in &raw.dependencies {
            let target = dependency.resolve(&texts).ok_or_else(|| {
                Error::DecompositionParse(format!(
                    "Sub-question {} has an unresolvable dependency {:?}",
                    index + 1,
                    dependency
                ))
            })?;
            if target == index {
                return Err(Error::DecompositionParse(format!(
                    "Sub-question {} depends on itself",
                    index + 1
                )));
            }
            dependencies.insert(target);
        }

        let mut subquestion = SubQuestion::new(raw.question.trim(), raw.priority.unwrap_or(index as u32 + 1));
        subquestion.context = raw.context;
        subquestion.dependencies = dependencies;
        subquestions.push(subquestion);
    }

    if execution_order(&subquestions).len() != subquestions.len() {
        return Err(Error::DecompositionParse(
            "Sub-question dependencies form a cycle".to_string(),
        ));
    }

    Ok(sort_by_priority(subquestions))
}

fn strip_code_fence(raw: &str) -> &str {
    let trimmed = raw.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let rest = rest.strip_prefix("json").unwrap_or(rest);
    rest.strip_suffix("```").unwrap_or(rest).trim()
}

fn sort_by_priority(subquestions: Vec<SubQuestion>) -> Vec<SubQuestion> {
    let mut order: Vec<usize> = (0..subquestions.len()).collect();
    order.sort_by_key(|&i| (subquestions[i].priority, i));

    let mut new_position = vec![0; subquestions.len()];
    for (position, &old) in order.iter().enumerate() {
        new_position[old] = position;
    }

    let mut slots: Vec<Option<SubQuestion>> = subquestions.into_iter().map(Some).collect();
    order
        .iter()
        .filter_map(|&old| slots[old].take())
        .map(|mut sq| {
            sq.dependencies = sq.dependencies.iter().map(|d| new_position[*d]).collect();
            sq
        })
        .collect()
}

/// Dependency-respecting order, lowest position first among ready sub-questions.
///
/// Returns fewer positions than sub-questions when dependencies form a cycle.
pub fn execution_order(subquestions: &[SubQuestion]) -> Vec<usize> {
    let mut remaining: Vec<usize> = subquestions.iter().map(|sq| sq.dependencies.len()).collect();
    let mut ready: BTreeSet<usize> = (0..subquestions.len()).filter(|&i| remaining[i] == 0).collect();
    let mut order = Vec::with_capacity(subquestions.len());

    while let Some(next) = ready.pop_first() {
        order.push(next);
        for (i, sq) in subquestions.iter().enumerate() {
            if sq.dependencies.contains(&next) {
                remaining[i] -= 1;
                if remaining[i] == 0 {
                    ready.insert(i);
                }
            }
        }
    }

    order
}

/// Heuristic complexity indicators of a query
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComplexityAnalysis {
    pub indicators: BTreeMap<String, bool>,
    pub score: f32,
    pub engine_used: EngineKind,
}

const CONJUNCTIONS: &[&str] = &["et", "ou", "ainsi que", "également"];
const COMPARISON_WORDS: &[&str] = &["comparer", "différence", "versus", "contre"];
const LIST_WORDS: &[&str] = &["liste", "énumérer", "tous les", "chaque"];
const TEMPORAL_WORDS: &[&str] = &["avant", "après", "pendant", "historique"];

/// Fraction of complexity indicators present in `query`
pub fn analyze_complexity(query: &str) -> (BTreeMap<String, bool>, f32) {
    let words: Vec<String> = query
        .to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(str::to_string)
        .collect();
    let padded = format!(" {} ", words.join(" "));
    let mentions = |phrases: &[&str]| phrases.iter().any(|p| padded.contains(&format!(" {} ", p)));

    let indicators: BTreeMap<String, bool> = [
        ("multiple_questions", query.matches('?').count() > 1),
        ("conjunctions", mentions(CONJUNCTIONS)),
        ("comparisons", mentions(COMPARISON_WORDS)),
        ("lists", mentions(LIST_WORDS)),
        ("temporal", mentions(TEMPORAL_WORDS)),
        ("length", query.chars().count() > 150),
    ]
    .into_iter()
    .map(|(name, present)| (name.to_string(), present))
    .collect();

    let present = indicators.values().filter(|v| **v).count();
    let score = present as f32 / indicators.len() as f32;
    (indicators, score)
}

struct Outcome {
    answer: String,
    sources: Vec<Source>,
    confidence: f32,
}

pub struct SubQuestionQueryEngine {
    simple: Arc<SimpleQueryEngine>,
    max_subquestions: usize,
    max_concurrency: usize,
    subquestion_timeout: Duration,
}

impl SubQuestionQueryEngine {
    pub fn new(simple: Arc<SimpleQueryEngine>, max_subquestions: usize, max_concurrency: usize) -> Self {
        Self {
            simple,
            max_subquestions,
            max_concurrency: max_concurrency.max(1),
            subquestion_timeout: Duration::from_secs(120),
        }
    }

    /// Limit for answering one sub-question; a timeout yields a placeholder answer
    pub fn with_subquestion_timeout(mut self, timeout: Duration) -> Self {
        self.subquestion_timeout = timeout;
        self
    }

    pub fn simple(&self) -> &Arc<SimpleQueryEngine> {
        &self.simple
    }

    /// Ask the provider to split `query`; any failure yields an empty list
    pub async fn decompose(&self, query: &str, max_subquestions: usize) -> Vec<SubQuestion> {
        self.decompose_within(query, max_subquestions, None).await
    }

    async fn decompose_within(&self, query: &str, max_subquestions: usize, limit: Option<Duration>) -> Vec<SubQuestion> {
        let request = CompletionRequest::new(prompts::decompose_prompt(query))
            .with_system(prompts::decompose_system(max_subquestions))
            .with_temperature(0.3);

        let raw = match self.simple.provider().complete_with(&request, limit).await {
            Ok(raw) => raw,
            Err(e) => {
                warn!(error = %e, "Decomposition call failed");
                return Vec::new();
            }
        };

        match parse_decomposition(&raw, max_subquestions) {
            Ok(subquestions) => subquestions,
            Err(e) => {
                warn!(error = %e, "Rejected decomposition");
                Vec::new()
            }
        }
    }

    /// Answer a complex query by decomposition, falling back to the simple engine
    pub async fn query(&self, query: &str, options: &QueryOptions, max_subquestions: Option<usize>) -> QueryResult {
        let started = Instant::now();
        let max = max_subquestions.unwrap_or(self.max_subquestions).max(1);

        let mut subquestions = self.decompose_within(query, max, options.timeout).await;
        if subquestions.is_empty() {
            warn!("No usable sub-questions, falling back to simple engine");
            return self.simple.query(query, options).await;
        }
        info!(count = subquestions.len(), "Decomposed query");

        let parallel = subquestions.iter().all(|sq| sq.dependencies.is_empty());
        if parallel {
            self.execute_parallel(&mut subquestions, options).await;
        } else {
            self.execute_sequential(&mut subquestions, options).await;
        }

        let answer = match self.synthesize_within(query, &subquestions, options.timeout).await {
            Ok(answer) => answer,
            Err(e) => {
                error!(error = %e, "Synthesis failed, falling back to simple engine");
                return self.simple.query(query, options).await;
            }
        };

        let mut metadata = QueryMetadata {
            engine: Some(EngineKind::SubQuestion),
            top_k: options.top_k,
            subquestions: subquestions.iter().map(SubQuestion::summary).collect(),
            ..Default::default()
        };
        metadata.extra.insert(
            "execution".to_string(),
            serde_json::Value::from(if parallel { "parallel" } else { "sequential" }),
        );
        metadata.processing_time_ms = started.elapsed().as_millis() as u64;

        QueryResult {
            query: query.to_string(),
            answer,
            sources: combine_sources(&subquestions),
            confidence: combined_confidence(&subquestions),
            metadata,
        }
    }

    /// One provider call combining the sub-answers
    pub async fn synthesize(&self, query: &str, subquestions: &[SubQuestion]) -> Result<String> {
        self.synthesize_within(query, subquestions, None).await
    }

    async fn synthesize_within(&self, query: &str, subquestions: &[SubQuestion], limit: Option<Duration>) -> Result<String> {
        let request = CompletionRequest::new(prompts::synthesis_prompt(query, subquestions))
            .with_system(prompts::SYNTHESIS_SYSTEM)
            .with_temperature(0.1);
        self.simple.provider().complete_with(&request, limit).await
    }

    /// Pick the simple or decomposition path from heuristic complexity
    pub async fn query_with_analysis(&self, query: &str, options: &QueryOptions) -> (QueryResult, ComplexityAnalysis) {
        let (indicators, score) = analyze_complexity(query);
        let engine_used = if score < COMPLEXITY_THRESHOLD {
            EngineKind::Simple
        } else {
            EngineKind::SubQuestion
        };
        debug!(score, engine = engine_used.as_str(), "Analyzed query complexity");

        let result = match engine_used {
            EngineKind::Simple => self.simple.query(query, options).await,
            EngineKind::SubQuestion => self.query(query, options, None).await,
        };

        (
            result,
            ComplexityAnalysis {
                indicators,
                score,
                engine_used,
            },
        )
    }

    async fn execute_parallel(&self, subquestions: &mut [SubQuestion], options: &QueryOptions) {
        let permits = Semaphore::new(self.max_concurrency);
        let outcomes = join_all(subquestions.iter().map(|sq| {
            let permits = &permits;
            async move {
                let _permit = permits.acquire().await.ok();
                self.answer_one(&sq.question, options).await
            }
        }))
        .await;

        for (sq, outcome) in subquestions.iter_mut().zip(outcomes) {
            apply(sq, outcome);
        }
    }

    async fn execute_sequential(&self, subquestions: &mut [SubQuestion], options: &QueryOptions) {
        for position in execution_order(subquestions) {
            let answered: Vec<(&str, &str)> = subquestions[position]
                .dependencies
                .iter()
                .filter_map(|&d| {
                    let dependency = &subquestions[d];
                    dependency
                        .answer
                        .as_deref()
                        .map(|answer| (dependency.question.as_str(), answer))
                })
                .collect();

            let mut step_options = options.clone();
            if let Some(context) = prompts::dependency_context(&answered) {
                step_options.background = Some(match &options.background {
                    Some(existing) => format!("{}\n\n{}", existing, context),
                    None => context,
                });
            }

            let question = subquestions[position].question.clone();
            let outcome = self.answer_one(&question, &step_options).await;
            apply(&mut subquestions[position], outcome);
        }
    }

    async fn answer_one(&self, question: &str, options: &QueryOptions) -> Outcome {
        let attempt = tokio::time::timeout(self.subquestion_timeout, self.simple.try_query(question, options)).await;

        let failure = match attempt {
            Ok(Ok(result)) => {
                return Outcome {
                    answer: result.answer,
                    sources: result.sources,
                    confidence: result.confidence,
                };
            }
            Ok(Err(e)) => e,
            Err(_) => Error::Timeout(format!(
                "sub-question exceeded {} ms",
                self.subquestion_timeout.as_millis()
            )),
        };

        warn!(question, error = %failure, "Sub-question failed");
        Outcome {
            answer: prompts::subquestion_error_answer(&failure.to_string()),
            sources: Vec::new(),
            confidence: 0.0,
        }
    }
}

fn apply(subquestion: &mut SubQuestion, outcome: Outcome) {
    let label: String = subquestion.question.chars().take(SUBQUESTION_LABEL_CHARS).collect();
    subquestion.answer = Some(outcome.answer);
    subquestion.confidence = outcome.confidence;
    subquestion.sources = outcome
        .sources
        .into_iter()
        .map(|mut source| {
            source.metadata.subquestion = Some(label.clone());
            source
        })
        .collect();
}

/// Mean confidence of sub-questions that produced a real answer
pub fn combined_confidence(subquestions: &[SubQuestion]) -> f32 {
    let counted: Vec<f32> = subquestions
        .iter()
        .filter(|sq| {
            sq.answer
                .as_deref()
                .map(|a| !a.trim().is_empty() && !a.starts_with(prompts::NO_INFORMATION_PREFIX))
                .unwrap_or(false)
        })
        .map(|sq| sq.confidence)
        .collect();

    if counted.is_empty() {
        return 0.0;
    }
    (counted.iter().sum::<f32>() / counted.len() as f32).clamp(0.0, 1.0)
}

/// Union of sub-question sources, one per chunk (best score kept), best first
pub fn combine_sources(subquestions: &[SubQuestion]) -> Vec<Source> {
    let mut best: HashMap<&str, &Source> = HashMap::new();
    for source in subquestions.iter().flat_map(|sq| sq.sources.iter()) {
        best.entry(source.chunk_id.as_str())
            .and_modify(|current| {
                if source.score > current.score {
                    *current = source;
                }
            })
            .or_insert(source);
    }

    let mut sources: Vec<Source> = best.into_values().cloned().collect();
    sources.sort_by(|a, b| b.score.total_cmp(&a.score).then_with(|| a.chunk_id.cmp(&b.chunk_id)));
    sources
}
