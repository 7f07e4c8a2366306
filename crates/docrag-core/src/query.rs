//! Query-side types: search results, answers, sub-questions and feedback

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use crate::document::Chunk;

/// Maximum characters of chunk text copied into a source excerpt
pub const EXCERPT_CHARS: usize = 200;

/// Exact-match predicates over chunk metadata
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchFilters {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub document_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub document_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub section_type: Option<String>,
}

impl SearchFilters {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn document(document_id: impl Into<String>) -> Self {
        Self {
            document_id: Some(document_id.into()),
            ..Default::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.document_id.is_none() && self.document_type.is_none() && self.section_type.is_none()
    }

    pub fn matches(&self, chunk: &Chunk) -> bool {
        fn check(expected: &Option<String>, actual: Option<&String>) -> bool {
            match expected {
                Some(value) => actual == Some(value),
                None => true,
            }
        }

        check(&self.document_id, Some(&chunk.document_id))
            && check(&self.document_type, chunk.document_type.as_ref())
            && check(&self.section_type, chunk.section_type.as_ref())
    }
}

/// A chunk with the score it received from one search
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredChunk {
    pub chunk: Chunk,
    pub score: f32,
}

/// Order by score descending, then chunk id ascending
pub fn rank_order(a: &ScoredChunk, b: &ScoredChunk) -> std::cmp::Ordering {
    b.score
        .total_cmp(&a.score)
        .then_with(|| a.chunk.id.cmp(&b.chunk.id))
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SourceMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub document_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub section_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page_number: Option<u32>,
    pub chunk_index: usize,
    /// Sub-question that retrieved this source, when produced by decomposition
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subquestion: Option<String>,
}

/// A retrieved passage cited by an answer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Source {
    pub chunk_id: String,
    pub document_id: String,
    pub excerpt: String,
    pub score: f32,
    pub metadata: SourceMetadata,
}

impl Source {
    pub fn from_scored(scored: &ScoredChunk) -> Self {
        let chunk = &scored.chunk;
        let excerpt = if chunk.text.chars().count() > EXCERPT_CHARS {
            let head: String = chunk.text.chars().take(EXCERPT_CHARS).collect();
            format!("{}...", head)
        } else {
            chunk.text.clone()
        };

        Self {
            chunk_id: chunk.id.clone(),
            document_id: chunk.document_id.clone(),
            excerpt,
            score: (scored.score * 1000.0).round() / 1000.0,
            metadata: SourceMetadata {
                document_type: chunk.document_type.clone(),
                section_type: chunk.section_type.clone(),
                page_number: chunk.page_number,
                chunk_index: chunk.index,
                subquestion: None,
            },
        }
    }
}

/// Closed set of query intents understood by the router
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryType {
    Simple,
    Complex,
    Comparison,
    Aggregation,
    Procedural,
    Analytical,
    Temporal,
    Compliance,
}

impl QueryType {
    pub const ALL: [QueryType; 8] = [
        QueryType::Simple,
        QueryType::Complex,
        QueryType::Comparison,
        QueryType::Aggregation,
        QueryType::Procedural,
        QueryType::Analytical,
        QueryType::Temporal,
        QueryType::Compliance,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            QueryType::Simple => "simple",
            QueryType::Complex => "complex",
            QueryType::Comparison => "comparison",
            QueryType::Aggregation => "aggregation",
            QueryType::Procedural => "procedural",
            QueryType::Analytical => "analytical",
            QueryType::Temporal => "temporal",
            QueryType::Compliance => "compliance",
        }
    }

    /// Find the first type name mentioned in free text
    pub fn from_label(text: &str) -> Option<Self> {
        let lower = text.to_lowercase();
        Self::ALL.into_iter().find(|t| lower.contains(t.as_str()))
    }
}

impl std::fmt::Display for QueryType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EngineKind {
    Simple,
    #[serde(rename = "subquestion")]
    SubQuestion,
}

impl EngineKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EngineKind::Simple => "simple",
            EngineKind::SubQuestion => "subquestion",
        }
    }

    pub fn parse(name: &str) -> Option<Self> {
        match name.trim().to_lowercase().as_str() {
            "simple" => Some(EngineKind::Simple),
            "subquestion" | "sub_question" | "sub-question" => Some(EngineKind::SubQuestion),
            _ => None,
        }
    }
}

/// Routing decision attached to every routed result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RouterMetadata {
    pub query_type: QueryType,
    pub engine_used: EngineKind,
    pub processing_time_ms: u64,
    #[serde(default)]
    pub forced: bool,
}

/// Answered sub-question as recorded in result metadata
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubQuestionSummary {
    pub question: String,
    pub priority: u32,
    pub dependencies: Vec<usize>,
    pub answer: Option<String>,
    pub num_sources: usize,
    pub confidence: f32,
}

/// Typed result metadata with one open map for anything else
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueryMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub engine: Option<EngineKind>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub search_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_k: Option<usize>,
    #[serde(default)]
    pub processing_time_ms: u64,
    #[serde(default)]
    pub cached: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub feedback_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub format: Option<String>,
    #[serde(default)]
    pub requires_validation: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub subquestions: Vec<SubQuestionSummary>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub router: Option<RouterMetadata>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub extra: BTreeMap<String, serde_json::Value>,
}

/// Answer returned by every query engine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryResult {
    pub query: String,
    pub answer: String,
    pub sources: Vec<Source>,
    pub confidence: f32,
    pub metadata: QueryMetadata,
}

impl QueryResult {
    /// A zero-confidence answer with no sources
    pub fn degraded(query: impl Into<String>, answer: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            answer: answer.into(),
            sources: Vec::new(),
            confidence: 0.0,
            metadata: QueryMetadata::default(),
        }
    }
}

/// Atomic question decomposed from a complex query.
///
/// `dependencies` holds positions of other sub-questions in the same batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubQuestion {
    pub question: String,
    #[serde(default)]
    pub context: String,
    pub priority: u32,
    #[serde(default)]
    pub dependencies: BTreeSet<usize>,
    #[serde(default)]
    pub answer: Option<String>,
    #[serde(default)]
    pub sources: Vec<Source>,
    #[serde(default)]
    pub confidence: f32,
}

impl SubQuestion {
    pub fn new(question: impl Into<String>, priority: u32) -> Self {
        Self {
            question: question.into(),
            context: String::new(),
            priority,
            dependencies: BTreeSet::new(),
            answer: None,
            sources: Vec::new(),
            confidence: 0.0,
        }
    }

    pub fn summary(&self) -> SubQuestionSummary {
        SubQuestionSummary {
            question: self.question.clone(),
            priority: self.priority,
            dependencies: self.dependencies.iter().copied().collect(),
            answer: self.answer.clone(),
            num_sources: self.sources.len(),
            confidence: self.confidence,
        }
    }
}

/// Cached full answer keyed by the hash of the raw query text
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnswerCacheEntry {
    pub query_hash: String,
    pub query_text: String,
    pub query_embedding: Vec<f32>,
    pub response: QueryResult,
    pub ttl_seconds: u64,
    pub hit_count: u64,
    pub created_at: DateTime<Utc>,
    pub last_accessed: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl AnswerCacheEntry {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeedbackType {
    Positive,
    Negative,
    Correction,
    General,
}

impl FeedbackType {
    pub fn as_str(&self) -> &'static str {
        match self {
            FeedbackType::Positive => "positive",
            FeedbackType::Negative => "negative",
            FeedbackType::Correction => "correction",
            FeedbackType::General => "general",
        }
    }
}

/// One entry of the append-only feedback log
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedbackEntry {
    pub id: String,
    pub query: String,
    pub response: String,
    pub feedback_type: FeedbackType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rating: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExpertiseLevel {
    Novice,
    #[default]
    Intermediate,
    Expert,
}

impl ExpertiseLevel {
    /// Number of chunks retrieved for this kind of user
    pub fn top_k(&self) -> usize {
        match self {
            ExpertiseLevel::Novice => 3,
            ExpertiseLevel::Intermediate => 5,
            ExpertiseLevel::Expert => 10,
        }
    }

    pub fn parse(name: &str) -> Option<Self> {
        match name.trim().to_lowercase().as_str() {
            "novice" | "beginner" => Some(ExpertiseLevel::Novice),
            "intermediate" | "default" => Some(ExpertiseLevel::Intermediate),
            "expert" => Some(ExpertiseLevel::Expert),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UserContext {
    pub expertise: ExpertiseLevel,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
}

/// One question/answer exchange of a conversation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationTurn {
    pub question: String,
    pub answer: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::ChunkMetadata;

    fn chunk(id: &str, text: &str) -> Chunk {
        Chunk {
            id: id.to_string(),
            document_id: "doc".to_string(),
            text: text.to_string(),
            index: 0,
            size: text.chars().count(),
            overlap_size: 0,
            section_type: Some("article_1".to_string()),
            document_type: None,
            page_number: Some(2),
            confidence: 1.0,
            metadata: ChunkMetadata::new("structural"),
        }
    }

    #[test]
    fn test_filters_match_exact_values() {
        let c = chunk("a", "text");
        assert!(SearchFilters::none().matches(&c));
        assert!(SearchFilters::document("doc").matches(&c));
        assert!(!SearchFilters::document("other").matches(&c));

        let typed = SearchFilters {
            document_type: Some("CCTP".to_string()),
            ..Default::default()
        };
        assert!(!typed.matches(&c));
    }

    #[test]
    fn test_source_excerpt_and_rounding() {
        let long = "é".repeat(250);
        let source = Source::from_scored(&ScoredChunk {
            chunk: chunk("a", &long),
            score: 0.87654,
        });
        assert_eq!(source.excerpt.chars().count(), EXCERPT_CHARS + 3);
        assert!(source.excerpt.ends_with("..."));
        assert_eq!(source.score, 0.877);
        assert_eq!(source.metadata.page_number, Some(2));
    }

    #[test]
    fn test_rank_order_breaks_ties_by_id() {
        let mut results = vec![
            ScoredChunk { chunk: chunk("b", "x"), score: 0.5 },
            ScoredChunk { chunk: chunk("a", "x"), score: 0.5 },
            ScoredChunk { chunk: chunk("c", "x"), score: 0.9 },
        ];
        results.sort_by(rank_order);
        let ids: Vec<_> = results.iter().map(|r| r.chunk.id.as_str()).collect();
        assert_eq!(ids, vec!["c", "a", "b"]);
    }

    #[test]
    fn test_query_type_from_label() {
        assert_eq!(QueryType::from_label("  Procedural\n"), Some(QueryType::Procedural));
        assert_eq!(QueryType::from_label("compliance"), Some(QueryType::Compliance));
        assert_eq!(QueryType::from_label("je ne sais pas"), None);
    }

    #[test]
    fn test_expertise_top_k() {
        assert_eq!(ExpertiseLevel::Novice.top_k(), 3);
        assert_eq!(ExpertiseLevel::default().top_k(), 5);
        assert_eq!(ExpertiseLevel::Expert.top_k(), 10);
    }
}
