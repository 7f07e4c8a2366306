//! Document chunking
//!
//! Splits a [`ProcessedDocument`] into an ordered list of [`Chunk`]s under one of
//! four strategies. Whatever the strategy, the returned chunks satisfy:
//!
//! - indices are contiguous from 0 and ids are `md5("{document_id}_{index}")`
//! - every chunk has at least `min_chunk_chars` non-blank characters
//! - `0 <= overlap_size < size`

mod profile;
mod splitter;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use docrag_core::{
    Chunk, ChunkMetadata, ChunkingConfig, ChunkingStrategy, Error, ProcessedDocument, Result,
};

pub use profile::{DocumentTypeMarker, Heading, SectionPattern, StructureProfile};
pub use splitter::{char_len, pack, split_paragraphs, split_sentences};

use splitter::{char_offset, slice_chars, tail_chars, windows};

/// Characters per token for fixed-size windows
const FIXED_CHARS_PER_TOKEN: usize = 3;
/// Characters per token for semantic budgets, refinement and overlap injection
const SEMANTIC_CHARS_PER_TOKEN: usize = 4;

/// Chunks produced for a named strategy plus any non-fatal warnings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkingOutcome {
    pub strategy: ChunkingStrategy,
    pub chunks: Vec<Chunk>,
    pub warnings: Vec<String>,
}

/// A chunk before indices and ids are assigned
#[derive(Debug, Clone)]
struct Draft {
    text: String,
    overlap_size: usize,
    section_type: Option<String>,
    document_type: Option<String>,
    page_number: Option<u32>,
    metadata: ChunkMetadata,
}

impl Draft {
    fn new(text: impl Into<String>, metadata: ChunkMetadata) -> Self {
        Self {
            text: text.into(),
            overlap_size: 0,
            section_type: None,
            document_type: None,
            page_number: None,
            metadata,
        }
    }

    fn with_section(mut self, section_type: impl Into<String>) -> Self {
        self.section_type = Some(section_type.into());
        self
    }

    fn with_page(mut self, page_number: Option<u32>) -> Self {
        self.page_number = page_number;
        self
    }

    fn content_len(&self) -> usize {
        char_len(self.text.trim())
    }
}

/// Strategy-driven document chunker
#[derive(Debug, Clone)]
pub struct Chunker {
    config: ChunkingConfig,
    profile: StructureProfile,
}

impl Default for Chunker {
    fn default() -> Self {
        Self::new(ChunkingConfig::default(), StructureProfile::default())
    }
}

impl Chunker {
    pub fn new(config: ChunkingConfig, profile: StructureProfile) -> Self {
        Self { config, profile }
    }

    pub fn config(&self) -> &ChunkingConfig {
        &self.config
    }

    pub fn profile(&self) -> &StructureProfile {
        &self.profile
    }

    /// Chunk with the configured default strategy
    pub fn chunk_default(&self, document_id: &str, document: &ProcessedDocument) -> Result<Vec<Chunk>> {
        self.chunk(document_id, document, self.config.strategy)
    }

    /// Chunk with a strategy given by name.
    ///
    /// Unknown names fall back to fixed-size chunking and add a warning.
    pub fn chunk_by_name(
        &self,
        document_id: &str,
        document: &ProcessedDocument,
        strategy_name: &str,
    ) -> Result<ChunkingOutcome> {
        let mut warnings = Vec::new();
        let strategy = match ChunkingStrategy::parse(strategy_name) {
            Some(strategy) => strategy,
            None => {
                warn!(strategy = strategy_name, "Unknown chunking strategy, falling back to fixed_size");
                warnings.push(format!(
                    "unknown chunking strategy '{}', used fixed_size",
                    strategy_name
                ));
                ChunkingStrategy::FixedSize
            }
        };

        let chunks = self.chunk(document_id, document, strategy)?;
        Ok(ChunkingOutcome {
            strategy,
            chunks,
            warnings,
        })
    }

    /// Chunk a document. Empty documents yield an empty list.
    pub fn chunk(
        &self,
        document_id: &str,
        document: &ProcessedDocument,
        strategy: ChunkingStrategy,
    ) -> Result<Vec<Chunk>> {
        if document_id.trim().is_empty() {
            return Err(Error::InvalidInput("document_id must not be empty".to_string()));
        }
        if document.is_empty() {
            debug!(document_id, "Empty document, nothing to chunk");
            return Ok(Vec::new());
        }

        let drafts = match strategy {
            ChunkingStrategy::FixedSize => self.fixed_size(document),
            ChunkingStrategy::Semantic => self.semantic(document),
            ChunkingStrategy::Structural => self.structural(document),
            ChunkingStrategy::Hybrid => self.hybrid(document),
        };

        let chunks = self.finalize(document_id, document, drafts);
        info!(
            document_id,
            strategy = strategy.as_str(),
            chunks = chunks.len(),
            "Chunked document"
        );
        Ok(chunks)
    }

    fn fixed_size(&self, document: &ProcessedDocument) -> Vec<Draft> {
        let text = &document.raw_text;
        if text.trim().is_empty() {
            return Vec::new();
        }

        let size = self.config.chunk_size * FIXED_CHARS_PER_TOKEN;
        let overlap = self.config.chunk_overlap * FIXED_CHARS_PER_TOKEN;
        let len = char_len(text);

        windows(len, size, overlap, self.config.min_chunk_chars)
            .into_iter()
            .map(|(start, end)| {
                let mut metadata = ChunkMetadata::new("fixed_size");
                metadata.start_char = Some(start);
                metadata.end_char = Some(end);

                let mut draft = Draft::new(slice_chars(text, start, end), metadata)
                    .with_page(document.page_at(start));
                draft.overlap_size = if start > 0 { overlap } else { 0 };
                draft
            })
            .collect()
    }

    fn semantic(&self, document: &ProcessedDocument) -> Vec<Draft> {
        let budget = self.config.chunk_size * SEMANTIC_CHARS_PER_TOKEN;
        let mut groups: Vec<String> = Vec::new();
        let mut current: Vec<String> = Vec::new();
        let mut current_size = 0;

        for paragraph in split_paragraphs(&document.raw_text) {
            let size = char_len(&paragraph);

            if size > budget {
                if !current.is_empty() {
                    groups.push(current.join("\n\n"));
                    current.clear();
                    current_size = 0;
                }
                groups.extend(pack(&split_sentences(&paragraph), budget, " "));
                continue;
            }

            if current_size + size > budget && !current.is_empty() {
                groups.push(current.join("\n\n"));
                current.clear();
                current_size = 0;
            }
            current_size += size;
            current.push(paragraph);
        }
        if !current.is_empty() {
            groups.push(current.join("\n\n"));
        }

        groups
            .into_iter()
            .map(|text| Draft::new(text, ChunkMetadata::new("semantic")))
            .collect()
    }

    fn structural(&self, document: &ProcessedDocument) -> Vec<Draft> {
        let min = self.config.min_chunk_chars;
        let max_chars = self.config.max_chunk_size * SEMANTIC_CHARS_PER_TOKEN;
        let mut drafts = Vec::new();

        for section in &document.structured_sections {
            let content = section.content.trim();
            let text = match &section.title {
                Some(title) if !content.starts_with(title.trim()) => {
                    format!("{}\n\n{}", title.trim(), content)
                }
                _ => content.to_string(),
            };
            if char_len(text.trim()) < min {
                continue;
            }

            if char_len(&text) > max_chars {
                for part in pack(&split_paragraphs(&text), max_chars, "\n\n") {
                    let mut metadata = ChunkMetadata::new("split_section");
                    metadata.extra.insert("original_section".to_string(), section.key.clone());
                    drafts.push(
                        Draft::new(part, metadata)
                            .with_section(section.key.clone())
                            .with_page(section.page_number),
                    );
                }
            } else {
                drafts.push(
                    Draft::new(text, ChunkMetadata::new("structural"))
                        .with_section(section.key.clone())
                        .with_page(section.page_number),
                );
            }
        }

        for (i, table) in document.tables.iter().enumerate() {
            let text = table.as_text();
            if char_len(text.trim()) < min {
                continue;
            }
            let mut metadata = ChunkMetadata::new("structural");
            metadata.content_type = Some("table".to_string());
            metadata.table_index = Some(i);
            drafts.push(
                Draft::new(text, metadata)
                    .with_section("table")
                    .with_page(table.page_number),
            );
        }

        if drafts.is_empty() {
            drafts = self.text_structural(document);
        }

        debug!(drafts = drafts.len(), "Structural pass complete");
        drafts
    }

    /// Split raw text at the headings recognised by the structure profile
    fn text_structural(&self, document: &ProcessedDocument) -> Vec<Draft> {
        let text = &document.raw_text;
        let headings = self.profile.find_headings(text);
        if headings.is_empty() {
            return Vec::new();
        }

        let mut drafts = Vec::new();

        let preamble = &text[..headings[0].start];
        if char_len(preamble.trim()) >= self.config.min_chunk_chars {
            drafts.push(
                Draft::new(preamble.trim(), ChunkMetadata::new("text_structural"))
                    .with_section("preamble")
                    .with_page(document.page_at(0)),
            );
        }

        for (i, heading) in headings.iter().enumerate() {
            let end = headings.get(i + 1).map(|h| h.start).unwrap_or(text.len());
            let section_text = text[heading.start..end].trim();
            if char_len(section_text) < self.config.min_chunk_chars {
                continue;
            }

            let mut metadata = ChunkMetadata::new("text_structural");
            metadata.section_number = Some(heading.number.clone());
            drafts.push(
                Draft::new(section_text, metadata)
                    .with_section(format!("{}_{}", heading.label, heading.number))
                    .with_page(document.page_at(char_offset(text, heading.start))),
            );
        }

        drafts
    }

    fn hybrid(&self, document: &ProcessedDocument) -> Vec<Draft> {
        let structural = self.structural(document);

        if structural.len() < self.config.hybrid_min_chunks && !document.raw_text.trim().is_empty() {
            info!(
                structural_chunks = structural.len(),
                "Structural chunking produced few chunks, falling back to fixed_size"
            );
            return self.fixed_size(document);
        }

        let max_chars = self.config.max_chunk_size * SEMANTIC_CHARS_PER_TOKEN;
        let budget = self.config.chunk_size * SEMANTIC_CHARS_PER_TOKEN;
        let mut refined: Vec<Draft> = Vec::new();

        for draft in structural {
            if char_len(&draft.text) <= max_chars {
                refined.push(draft);
                continue;
            }

            for part in pack(&split_sentences(&draft.text), budget, " ") {
                let mut metadata = draft.metadata.clone();
                metadata.refinement = Some("semantic".to_string());
                refined.push(Draft {
                    text: part,
                    overlap_size: 0,
                    section_type: draft.section_type.clone(),
                    document_type: draft.document_type.clone(),
                    page_number: draft.page_number,
                    metadata,
                });
            }
        }

        refined.retain(|d| d.content_len() >= self.config.min_chunk_chars);
        self.inject_overlap(refined)
    }

    /// Prepend the tail of each chunk's predecessor
    fn inject_overlap(&self, drafts: Vec<Draft>) -> Vec<Draft> {
        let overlap_chars = self.config.chunk_overlap * SEMANTIC_CHARS_PER_TOKEN;
        if overlap_chars == 0 || drafts.len() < 2 {
            return drafts;
        }

        let originals: Vec<String> = drafts.iter().map(|d| d.text.clone()).collect();
        drafts
            .into_iter()
            .enumerate()
            .map(|(i, mut draft)| {
                if i > 0 {
                    let tail = tail_chars(&originals[i - 1], overlap_chars);
                    draft.text = format!("{}\n{}", tail, draft.text);
                    draft.overlap_size = char_len(tail);
                }
                draft
            })
            .collect()
    }

    /// Drop short drafts, then assign indices, ids, document types and pages
    fn finalize(&self, document_id: &str, document: &ProcessedDocument, drafts: Vec<Draft>) -> Vec<Chunk> {
        let document_type = self.profile.detect_document_type(&document.raw_text);

        drafts
            .into_iter()
            .filter(|d| d.content_len() >= self.config.min_chunk_chars)
            .enumerate()
            .map(|(index, draft)| {
                let size = char_len(&draft.text);
                let page_number = draft.page_number.or_else(|| locate_page(document, &draft.text));
                let chunk_document_type = draft
                    .document_type
                    .or_else(|| self.profile.detect_document_type(&draft.text))
                    .or_else(|| document_type.clone());

                Chunk {
                    id: Chunk::make_id(document_id, index),
                    document_id: document_id.to_string(),
                    index,
                    size,
                    overlap_size: draft.overlap_size.min(size.saturating_sub(1)),
                    text: draft.text,
                    section_type: draft.section_type,
                    document_type: chunk_document_type,
                    page_number,
                    confidence: 1.0,
                    metadata: draft.metadata,
                }
            })
            .collect()
    }
}

/// Page of the first occurrence of the chunk's opening line in the raw text
fn locate_page(document: &ProcessedDocument, text: &str) -> Option<u32> {
    if document.page_metadata.is_empty() {
        return None;
    }
    let first_line = text.lines().find(|l| !l.trim().is_empty())?.trim();
    let byte_offset = document.raw_text.find(first_line)?;
    document.page_at(char_offset(&document.raw_text, byte_offset))
}

#[cfg(test)]
mod tests {
    use super::*;
    use docrag_core::{StructuredSection, Table};
    use proptest::prelude::*;

    fn small_config() -> ChunkingConfig {
        ChunkingConfig {
            chunk_size: 40,
            chunk_overlap: 5,
            max_chunk_size: 60,
            ..ChunkingConfig::default()
        }
    }

    fn paragraph(topic: &str) -> String {
        format!(
            "Le titulaire doit respecter les exigences relatives à {}. Les pièces justificatives sont remises avant la date limite.",
            topic
        )
    }

    fn assert_invariants(chunks: &[Chunk], min: usize) {
        for (i, chunk) in chunks.iter().enumerate() {
            assert_eq!(chunk.index, i);
            assert_eq!(chunk.id, Chunk::make_id(&chunk.document_id, i));
            assert_eq!(chunk.size, char_len(&chunk.text));
            assert!(chunk.overlap_size < chunk.size);
            assert!(char_len(chunk.text.trim()) >= min);
        }
    }

    #[test]
    fn test_empty_document_yields_no_chunks() {
        let chunker = Chunker::default();
        let chunks = chunker
            .chunk("doc", &ProcessedDocument::from_text("   \n "), ChunkingStrategy::Hybrid)
            .unwrap();
        assert!(chunks.is_empty());
    }

    #[test]
    fn test_empty_document_id_is_invalid() {
        let chunker = Chunker::default();
        let result = chunker.chunk("", &ProcessedDocument::from_text("text"), ChunkingStrategy::FixedSize);
        assert!(matches!(result, Err(Error::InvalidInput(_))));
    }

    #[test]
    fn test_fixed_size_windows_overlap() {
        let chunker = Chunker::new(small_config(), StructureProfile::default());
        let text = "x".repeat(400);
        let chunks = chunker
            .chunk("doc", &ProcessedDocument::from_text(text), ChunkingStrategy::FixedSize)
            .unwrap();

        // 120-char windows stepping by 105
        assert_eq!(chunks.len(), 4);
        assert_eq!(chunks[0].overlap_size, 0);
        assert_eq!(chunks[1].overlap_size, 15);
        assert_eq!(chunks[1].metadata.start_char, Some(105));
        assert_eq!(chunks[3].metadata.end_char, Some(400));
        assert_invariants(&chunks, 50);
    }

    #[test]
    fn test_semantic_packs_paragraphs() {
        let chunker = Chunker::new(small_config(), StructureProfile::default());
        let text = (0..6)
            .map(|i| paragraph(&format!("la prestation {}", i)))
            .collect::<Vec<_>>()
            .join("\n\n");
        let chunks = chunker
            .chunk("doc", &ProcessedDocument::from_text(text), ChunkingStrategy::Semantic)
            .unwrap();

        assert!(chunks.len() >= 3);
        for chunk in &chunks {
            assert!(chunk.size <= 160);
            assert_eq!(chunk.metadata.strategy, "semantic");
        }
        assert_invariants(&chunks, 50);
    }

    #[test]
    fn test_structural_sections_and_tables() {
        let chunker = Chunker::default();
        let document = ProcessedDocument::from_text("ignored when sections exist")
            .with_section(StructuredSection {
                key: "objet".to_string(),
                title: Some("Objet du marché".to_string()),
                content: paragraph("l'objet du marché"),
                page_number: Some(1),
            })
            .with_section(StructuredSection {
                key: "court".to_string(),
                title: None,
                content: "trop court".to_string(),
                page_number: None,
            })
            .with_table(Table {
                text: None,
                rows: vec![
                    vec!["Lot".into(), "Désignation".into(), "Montant HT".into()],
                    vec!["1".into(), "Gros oeuvre et maçonnerie".into(), "125 000".into()],
                ],
                page_number: Some(4),
            });

        let chunks = chunker.chunk("doc", &document, ChunkingStrategy::Structural).unwrap();
        assert_eq!(chunks.len(), 2);
        assert!(chunks[0].text.starts_with("Objet du marché\n\n"));
        assert_eq!(chunks[0].section_type.as_deref(), Some("objet"));
        assert_eq!(chunks[1].metadata.content_type.as_deref(), Some("table"));
        assert_eq!(chunks[1].metadata.table_index, Some(0));
        assert_eq!(chunks[1].page_number, Some(4));
    }

    #[test]
    fn test_structural_text_fallback_labels_sections() {
        let chunker = Chunker::default();
        let text = format!(
            "Article 1 - Objet\n{}\n\nArticle 2 - Durée\n{}\n\nAnnexe A\n{}",
            paragraph("l'objet"),
            paragraph("la durée"),
            paragraph("l'annexe")
        );
        let chunks = chunker
            .chunk("doc", &ProcessedDocument::from_text(text), ChunkingStrategy::Structural)
            .unwrap();

        let sections: Vec<_> = chunks.iter().filter_map(|c| c.section_type.clone()).collect();
        assert_eq!(sections, vec!["article_1", "article_2", "annexe_A"]);
        assert_eq!(chunks[0].metadata.section_number.as_deref(), Some("1"));
    }

    #[test]
    fn test_hybrid_falls_back_to_fixed_size_for_few_sections() {
        // ten paragraphs under three labelled sections
        let mut text = String::new();
        for (label, count) in [("Article 1", 4), ("Article 2", 3), ("Article 3", 3)] {
            text.push_str(&format!("{} - Dispositions\n", label));
            for i in 0..count {
                text.push_str(&paragraph(&format!("{} alinéa {}", label, i)));
                text.push_str("\n\n");
            }
        }

        let chunker = Chunker::default();
        let chunks = chunker
            .chunk("doc", &ProcessedDocument::from_text(text), ChunkingStrategy::Hybrid)
            .unwrap();

        assert!(!chunks.is_empty());
        for label in ["Article 1", "Article 2", "Article 3"] {
            assert!(chunks.iter().any(|c| c.text.contains(label)), "{} not covered", label);
        }
        assert!(chunks.iter().all(|c| c.metadata.strategy == "fixed_size"));
        assert_invariants(&chunks, 50);
    }

    #[test]
    fn test_hybrid_refines_and_overlaps_structural_chunks() {
        let mut text = String::new();
        for n in 1..=6 {
            text.push_str(&format!("Article {}\n", n));
            let repeat = if n == 3 { 12 } else { 1 };
            for i in 0..repeat {
                text.push_str(&paragraph(&format!("l'article {} point {}", n, i)));
                text.push(' ');
            }
            text.push_str("\n\n");
        }

        let chunker = Chunker::new(small_config(), StructureProfile::default());
        let chunks = chunker
            .chunk("doc", &ProcessedDocument::from_text(text), ChunkingStrategy::Hybrid)
            .unwrap();

        assert!(chunks.len() > 6);
        assert!(chunks.iter().any(|c| c.metadata.refinement.as_deref() == Some("semantic")));
        assert_eq!(chunks[0].overlap_size, 0);
        assert!(chunks[1..].iter().all(|c| c.overlap_size > 0));
        assert!(chunks.iter().all(|c| c.section_type.is_some()));
        assert_invariants(&chunks, 50);
    }

    #[test]
    fn test_unknown_strategy_falls_back_with_warning() {
        let chunker = Chunker::default();
        let outcome = chunker
            .chunk_by_name("doc", &ProcessedDocument::from_text(paragraph("x")), "sliding")
            .unwrap();
        assert_eq!(outcome.strategy, ChunkingStrategy::FixedSize);
        assert_eq!(outcome.warnings.len(), 1);
        assert_eq!(outcome.chunks.len(), 1);
    }

    #[test]
    fn test_rechunking_is_idempotent() {
        let chunker = Chunker::default();
        let document = ProcessedDocument::from_text(paragraph("la reprise").repeat(30));
        let first = chunker.chunk_default("doc", &document).unwrap();
        let second = chunker.chunk_default("doc", &document).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_document_type_and_pages_are_attached() {
        let text = format!(
            "Cahier des clauses techniques particulières\n{}\u{c}{}",
            paragraph("la page un"),
            paragraph("la page deux")
        );
        let document = ProcessedDocument::from_paged_text(&text);
        let config = ChunkingConfig {
            chunk_size: 40,
            chunk_overlap: 0,
            ..ChunkingConfig::default()
        };
        let chunker = Chunker::new(config, StructureProfile::default());
        let chunks = chunker.chunk("doc", &document, ChunkingStrategy::FixedSize).unwrap();

        assert!(chunks.iter().all(|c| c.document_type.as_deref() == Some("CCTP")));
        assert_eq!(chunks[0].page_number, Some(1));
        assert_eq!(chunks.last().and_then(|c| c.page_number), Some(2));
    }

    proptest! {
        #[test]
        fn prop_chunk_invariants_hold(
            words in proptest::collection::vec("[a-zA-Zé]{1,12}", 0..400),
            breaks in proptest::collection::vec(0usize..6, 0..400),
            strategy in prop_oneof![
                Just(ChunkingStrategy::FixedSize),
                Just(ChunkingStrategy::Semantic),
                Just(ChunkingStrategy::Structural),
                Just(ChunkingStrategy::Hybrid),
            ],
        ) {
            let mut text = String::new();
            for (i, word) in words.iter().enumerate() {
                text.push_str(word);
                match breaks.get(i) {
                    Some(0) => text.push_str(". "),
                    Some(1) => text.push_str("\n\n"),
                    Some(2) => text.push_str(&format!("\nArticle {}\n", i)),
                    _ => text.push(' '),
                }
            }

            let chunker = Chunker::new(small_config(), StructureProfile::default());
            let chunks = chunker.chunk("doc", &ProcessedDocument::from_text(text), strategy).unwrap();

            for (i, chunk) in chunks.iter().enumerate() {
                prop_assert_eq!(chunk.index, i);
                prop_assert!(chunk.overlap_size < chunk.size);
                prop_assert!(char_len(chunk.text.trim()) >= 50);
            }
        }
    }
}
