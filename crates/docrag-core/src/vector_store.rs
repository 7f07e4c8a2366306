//! Vector store backend trait and types

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::Result;
use crate::document::{Chunk, EmbeddingRecord};
use crate::query::{ScoredChunk, SearchFilters};

/// Aggregate figures reported by a backend
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BackendStats {
    pub total_embeddings: usize,
    pub unique_documents: usize,
    pub by_document_type: BTreeMap<String, usize>,
    pub dimension: Option<usize>,
}

/// Trait for vector-capable stores (e.g., in-memory, Qdrant)
///
/// This trait defines the persistence boundary used by the vector store service.
/// Search methods return results ordered by score descending with ties broken by
/// chunk id ascending.
#[async_trait]
pub trait VectorBackend: Send + Sync {
    /// Insert or overwrite records keyed by chunk id
    async fn upsert(&self, records: Vec<EmbeddingRecord>) -> Result<usize>;

    /// Nearest neighbours by cosine similarity, restricted by `filters`
    async fn search_vector(
        &self,
        vector: &[f32],
        limit: usize,
        filters: &SearchFilters,
    ) -> Result<Vec<ScoredChunk>>;

    /// Chunks ranked by lexical overlap with `query`; only positive scores are returned
    async fn search_lexical(
        &self,
        query: &str,
        limit: usize,
        filters: &SearchFilters,
    ) -> Result<Vec<ScoredChunk>>;

    /// Remove every record of a document, returning how many were removed
    async fn delete_document(&self, document_id: &str) -> Result<usize>;

    /// All chunks of a document ordered by chunk index
    async fn document_chunks(&self, document_id: &str) -> Result<Vec<Chunk>>;

    async fn stats(&self) -> Result<BackendStats>;
}

/// Cosine similarity; zero for mismatched lengths or zero vectors
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return 0.0;
    }

    let dot_product: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }

    dot_product / (norm_a * norm_b)
}

/// Distinct lowercase terms of a query
pub fn query_terms(query: &str) -> Vec<String> {
    let mut terms: Vec<String> = Vec::new();
    for term in query
        .to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
    {
        if !terms.iter().any(|t| t == term) {
            terms.push(term.to_string());
        }
    }
    terms
}

/// Fraction of query terms contained in the text
pub fn lexical_score(terms: &[String], text: &str) -> f32 {
    if terms.is_empty() {
        return 0.0;
    }

    let content = text.to_lowercase();
    let matches = terms.iter().filter(|t| content.contains(t.as_str())).count();
    matches as f32 / terms.len() as f32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cosine_similarity() {
        assert!((cosine_similarity(&[1.0, 0.0], &[1.0, 0.0]) - 1.0).abs() < 1e-6);
        assert!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]).abs() < 1e-6);
        assert_eq!(cosine_similarity(&[1.0], &[1.0, 0.0]), 0.0);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 0.0]), 0.0);
    }

    #[test]
    fn test_lexical_score() {
        let terms = query_terms("Délai de paiement, délai");
        assert_eq!(terms, vec!["délai", "de", "paiement"]);
        assert_eq!(lexical_score(&terms, "Le délai de paiement est de 30 jours"), 1.0);
        assert!((lexical_score(&terms, "Le délai est fixé") - 1.0 / 3.0).abs() < 1e-6);
        assert_eq!(lexical_score(&[], "anything"), 0.0);
    }
}
