//! Snapshot tests for core types

#[cfg(test)]
mod snapshot_tests {
    use crate::{ChunkingConfig, IndexingResult, ProcessedDocument, SubQuestion};
    use insta::assert_yaml_snapshot;

    #[test]
    fn test_chunking_config_snapshot() {
        assert_yaml_snapshot!(ChunkingConfig::default(), @r###"
        strategy: hybrid
        chunk_size: 512
        chunk_overlap: 50
        max_chunk_size: 1024
        min_chunk_chars: 50
        hybrid_min_chunks: 5
        "###);
    }

    #[test]
    fn test_page_metadata_snapshot() {
        let doc = ProcessedDocument::from_paged_text("Article 1\u{c}Article 2\u{c}Annexe A");
        assert_yaml_snapshot!(doc.page_metadata, @r###"
        - page_number: 1
          start_char: 0
          end_char: 9
        - page_number: 2
          start_char: 10
          end_char: 19
        - page_number: 3
          start_char: 20
          end_char: 28
        "###);
    }

    #[test]
    fn test_failed_indexing_result_snapshot() {
        let result = IndexingResult::failed("doc-9", "no chunks produced");
        assert_yaml_snapshot!(result, @r###"
        success: false
        document_id: doc-9
        num_chunks: 0
        num_embeddings: 0
        processing_time_ms: 0
        skipped: false
        errors:
          - no chunks produced
        "###);
    }

    #[test]
    fn test_subquestion_summary_snapshot() {
        let mut sq = SubQuestion::new("Quel est le délai d'exécution ?", 2);
        sq.dependencies.insert(0);
        sq.answer = Some("Six mois.".to_string());
        assert_yaml_snapshot!(sq.summary(), {".confidence" => "[confidence]"}, @r###"
        question: "Quel est le délai d'exécution ?"
        priority: 2
        dependencies:
          - 0
        answer: Six mois.
        num_sources: 0
        confidence: "[confidence]"
        "###);
    }
}
