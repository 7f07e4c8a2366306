//! Processed documents, chunks and embedding records

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A named section extracted by the upstream document processor
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StructuredSection {
    /// Section key such as `objet` or `article_3`
    pub key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page_number: Option<u32>,
}

/// A table extracted from the document, either pre-rendered or as rows of cells
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Table {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub rows: Vec<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page_number: Option<u32>,
}

impl Table {
    /// Render the table as plain text, one row per line with ` | ` between cells
    pub fn as_text(&self) -> String {
        if let Some(text) = &self.text {
            return text.clone();
        }
        self.rows
            .iter()
            .map(|row| row.join(" | "))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Character range covered by one page of the source document
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageInfo {
    pub page_number: u32,
    pub start_char: usize,
    pub end_char: usize,
}

/// Output of the external document processor, the only input the chunker accepts
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProcessedDocument {
    pub raw_text: String,
    #[serde(default)]
    pub structured_sections: Vec<StructuredSection>,
    #[serde(default)]
    pub tables: Vec<Table>,
    #[serde(default)]
    pub page_metadata: Vec<PageInfo>,
}

impl ProcessedDocument {
    /// Create a document from raw text only
    pub fn from_text(raw_text: impl Into<String>) -> Self {
        Self {
            raw_text: raw_text.into(),
            ..Default::default()
        }
    }

    /// Create a document from text where pages are separated by form feeds
    pub fn from_paged_text(text: &str) -> Self {
        let mut page_metadata = Vec::new();
        let mut raw_text = String::with_capacity(text.len());
        let mut offset = 0;

        for (i, page) in text.split('\u{c}').enumerate() {
            if i > 0 {
                raw_text.push('\n');
                offset += 1;
            }
            let len = page.chars().count();
            page_metadata.push(PageInfo {
                page_number: i as u32 + 1,
                start_char: offset,
                end_char: offset + len,
            });
            raw_text.push_str(page);
            offset += len;
        }

        Self {
            raw_text,
            page_metadata,
            ..Default::default()
        }
    }

    pub fn with_section(mut self, section: StructuredSection) -> Self {
        self.structured_sections.push(section);
        self
    }

    pub fn with_table(mut self, table: Table) -> Self {
        self.tables.push(table);
        self
    }

    /// Page containing the given character offset, if page ranges are known
    pub fn page_at(&self, char_offset: usize) -> Option<u32> {
        self.page_metadata
            .iter()
            .find(|p| char_offset >= p.start_char && char_offset < p.end_char)
            .map(|p| p.page_number)
    }

    pub fn is_empty(&self) -> bool {
        self.raw_text.trim().is_empty()
            && self.structured_sections.iter().all(|s| s.content.trim().is_empty())
            && self.tables.iter().all(|t| t.as_text().trim().is_empty())
    }
}

/// Chunking strategy selector
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChunkingStrategy {
    FixedSize,
    Semantic,
    Structural,
    #[default]
    Hybrid,
}

impl ChunkingStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChunkingStrategy::FixedSize => "fixed_size",
            ChunkingStrategy::Semantic => "semantic",
            ChunkingStrategy::Structural => "structural",
            ChunkingStrategy::Hybrid => "hybrid",
        }
    }

    /// Parse a strategy name; `None` for unknown names
    pub fn parse(name: &str) -> Option<Self> {
        match name.trim().to_lowercase().replace('-', "_").as_str() {
            "fixed_size" | "fixed" => Some(ChunkingStrategy::FixedSize),
            "semantic" => Some(ChunkingStrategy::Semantic),
            "structural" => Some(ChunkingStrategy::Structural),
            "hybrid" => Some(ChunkingStrategy::Hybrid),
            _ => None,
        }
    }
}

impl std::fmt::Display for ChunkingStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Known chunk properties plus an open map for anything else
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChunkMetadata {
    /// Strategy that produced the chunk (`fixed_size`, `semantic`, `structural`, `text_structural`, `split_section`)
    pub strategy: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub table_index: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub section_number: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_char: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_char: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refinement: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub extra: BTreeMap<String, String>,
}

impl ChunkMetadata {
    pub fn new(strategy: impl Into<String>) -> Self {
        Self {
            strategy: strategy.into(),
            ..Default::default()
        }
    }
}

/// Bounded contiguous span of document text, the unit of retrieval
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    pub id: String,
    pub document_id: String,
    pub text: String,
    pub index: usize,
    /// Length of `text` in characters
    pub size: usize,
    /// Leading characters repeated from the previous chunk
    pub overlap_size: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub section_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub document_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page_number: Option<u32>,
    pub confidence: f32,
    pub metadata: ChunkMetadata,
}

impl Chunk {
    /// Deterministic chunk id so that re-chunking a document is idempotent
    pub fn make_id(document_id: &str, index: usize) -> String {
        format!("{:x}", md5::compute(format!("{}_{}", document_id, index)))
    }
}

/// A chunk together with its embedding
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmbeddingRecord {
    pub chunk: Chunk,
    pub vector: Vec<f32>,
    pub model: String,
}

impl EmbeddingRecord {
    pub fn chunk_id(&self) -> &str {
        &self.chunk.id
    }

    pub fn document_id(&self) -> &str {
        &self.chunk.document_id
    }
}
