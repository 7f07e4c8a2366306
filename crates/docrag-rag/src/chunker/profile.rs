//! Pluggable document-convention tables used by structural chunking

use regex::Regex;
use tracing::warn;

use docrag_core::{Error, Result};

/// A section label and the line-anchored pattern that introduces it.
///
/// The first capture group of `pattern` is the section number.
#[derive(Debug, Clone)]
pub struct SectionPattern {
    pub label: String,
    pub pattern: Regex,
}

/// Keywords that must all appear in a text for it to be of `document_type`
#[derive(Debug, Clone)]
pub struct DocumentTypeMarker {
    pub document_type: String,
    pub keywords: Vec<String>,
}

/// A section heading found in raw text
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Heading {
    pub label: String,
    pub number: String,
    /// Byte offset where the heading starts
    pub start: usize,
}

/// Section-label and document-type tables for one documentation convention
#[derive(Debug, Clone)]
pub struct StructureProfile {
    pub name: String,
    sections: Vec<SectionPattern>,
    document_types: Vec<DocumentTypeMarker>,
}

const FRENCH_SECTIONS: &[(&str, &str)] = &[
    ("article", r"(?mi)^[ \t]*article\s+(\d+(?:\.\d+)*)\b"),
    ("chapitre", r"(?mi)^[ \t]*chapitre\s+([IVXLCDM]+|\d+)\b"),
    ("section", r"(?mi)^[ \t]*section\s+(\d+(?:\.\d+)*)\b"),
    ("titre", r"(?mi)^[ \t]*titre\s+([IVXLCDM]+|\d+)\b"),
    ("annexe", r"(?mi)^[ \t]*annexe\s+(\d+|[A-Z])\b"),
    ("clause", r"(?mi)^[ \t]*clause\s+(\d+(?:\.\d+)*)\b"),
];

const FRENCH_DOCUMENT_TYPES: &[(&str, &[&str])] = &[
    ("CCTP", &["cahier", "clauses", "techniques", "particulières"]),
    ("CCAP", &["cahier", "clauses", "administratives", "particulières"]),
    ("RC", &["règlement", "consultation"]),
    ("BPU", &["bordereau", "prix", "unitaires"]),
    ("DQE", &["détail", "quantitatif", "estimatif"]),
    ("DPGF", &["décomposition", "prix", "global", "forfaitaire"]),
];

const GENERIC_SECTIONS: &[(&str, &str)] = &[
    ("chapter", r"(?mi)^[ \t]*chapter\s+([IVXLCDM]+|\d+)\b"),
    ("section", r"(?mi)^[ \t]*section\s+(\d+(?:\.\d+)*)\b"),
    ("article", r"(?mi)^[ \t]*article\s+(\d+(?:\.\d+)*)\b"),
    ("appendix", r"(?mi)^[ \t]*appendix\s+(\d+|[A-Z])\b"),
    ("annex", r"(?mi)^[ \t]*annex\s+(\d+|[A-Z])\b"),
    ("clause", r"(?mi)^[ \t]*clause\s+(\d+(?:\.\d+)*)\b"),
];

impl StructureProfile {
    /// An empty profile; add patterns with `with_section`
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            sections: Vec::new(),
            document_types: Vec::new(),
        }
    }

    /// French public procurement documents (Article, Chapitre, Annexe, CCTP, CCAP, ...)
    pub fn french_procurement() -> Self {
        Self::from_tables("french_procurement", FRENCH_SECTIONS, FRENCH_DOCUMENT_TYPES)
    }

    /// English headings (Chapter, Section, Appendix, ...) and no document types
    pub fn generic() -> Self {
        Self::from_tables("generic", GENERIC_SECTIONS, &[])
    }

    fn from_tables(
        name: &str,
        sections: &[(&str, &str)],
        document_types: &[(&str, &[&str])],
    ) -> Self {
        let sections = sections
            .iter()
            .filter_map(|(label, pattern)| match Regex::new(pattern) {
                Ok(pattern) => Some(SectionPattern {
                    label: label.to_string(),
                    pattern,
                }),
                Err(e) => {
                    warn!(label, error = %e, "Skipping invalid section pattern");
                    None
                }
            })
            .collect();

        let document_types = document_types
            .iter()
            .map(|(document_type, keywords)| DocumentTypeMarker {
                document_type: document_type.to_string(),
                keywords: keywords.iter().map(|k| k.to_string()).collect(),
            })
            .collect();

        Self {
            name: name.to_string(),
            sections,
            document_types,
        }
    }

    /// Add a section pattern; the first capture group must be the section number
    pub fn with_section(mut self, label: impl Into<String>, pattern: &str) -> Result<Self> {
        let label = label.into();
        let pattern = Regex::new(pattern).map_err(|e| {
            Error::Configuration(format!("Invalid section pattern for {}: {}", label, e))
        })?;
        if pattern.captures_len() < 2 {
            return Err(Error::Configuration(format!(
                "Section pattern for {} needs a capture group for the section number",
                label
            )));
        }
        self.sections.push(SectionPattern { label, pattern });
        Ok(self)
    }

    pub fn with_document_type(mut self, document_type: impl Into<String>, keywords: &[&str]) -> Self {
        self.document_types.push(DocumentTypeMarker {
            document_type: document_type.into(),
            keywords: keywords.iter().map(|k| k.to_lowercase()).collect(),
        });
        self
    }

    pub fn section_labels(&self) -> Vec<&str> {
        self.sections.iter().map(|s| s.label.as_str()).collect()
    }

    /// Every heading in `text`, ordered by position.
    ///
    /// When two patterns match at the same offset the earlier table entry wins.
    pub fn find_headings(&self, text: &str) -> Vec<Heading> {
        let mut headings: Vec<Heading> = Vec::new();

        for section in &self.sections {
            for captures in section.pattern.captures_iter(text) {
                let (Some(whole), Some(number)) = (captures.get(0), captures.get(1)) else {
                    continue;
                };
                if headings.iter().any(|h| h.start == whole.start()) {
                    continue;
                }
                headings.push(Heading {
                    label: section.label.clone(),
                    number: number.as_str().to_string(),
                    start: whole.start(),
                });
            }
        }

        headings.sort_by_key(|h| h.start);
        headings
    }

    /// First document type whose keywords all occur in `text`
    pub fn detect_document_type(&self, text: &str) -> Option<String> {
        let lower = text.to_lowercase();
        self.document_types
            .iter()
            .find(|marker| marker.keywords.iter().all(|k| lower.contains(k.as_str())))
            .map(|marker| marker.document_type.clone())
    }
}

impl Default for StructureProfile {
    fn default() -> Self {
        Self::french_procurement()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_french_headings_are_line_anchored() {
        let profile = StructureProfile::french_procurement();
        let text = "Préambule\nARTICLE 1 - Objet\nConformément à l'article 5, le titulaire...\n  Annexe B\nChapitre IV";
        let headings = profile.find_headings(text);
        let found: Vec<(String, String)> = headings
            .into_iter()
            .map(|h| (h.label, h.number))
            .collect();
        assert_eq!(
            found,
            vec![
                ("article".to_string(), "1".to_string()),
                ("annexe".to_string(), "B".to_string()),
                ("chapitre".to_string(), "IV".to_string()),
            ]
        );
    }

    #[test]
    fn test_document_type_detection() {
        let profile = StructureProfile::french_procurement();
        assert_eq!(
            profile.detect_document_type("Cahier des Clauses Administratives Particulières"),
            Some("CCAP".to_string())
        );
        assert_eq!(
            profile.detect_document_type("Règlement de la consultation"),
            Some("RC".to_string())
        );
        assert_eq!(profile.detect_document_type("Lettre de candidature"), None);
    }

    #[test]
    fn test_custom_section_pattern() {
        let profile = StructureProfile::new("custom")
            .with_section("part", r"(?m)^Part\s+(\d+)")
            .unwrap();
        let headings = profile.find_headings("Part 1\ntext\nPart 2\nmore");
        assert_eq!(headings.len(), 2);
        assert_eq!(headings[1].number, "2");

        assert!(StructureProfile::new("bad").with_section("x", r"(?m)^X").is_err());
        assert!(StructureProfile::new("bad").with_section("x", r"(unclosed").is_err());
    }

    #[test]
    fn test_generic_profile_has_no_document_types() {
        let profile = StructureProfile::generic();
        assert!(profile.section_labels().contains(&"appendix"));
        assert_eq!(profile.detect_document_type("cahier clauses techniques particulières"), None);
    }
}
