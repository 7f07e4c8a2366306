//! Qdrant-backed vector backend

use async_trait::async_trait;
use qdrant_client::qdrant::{
    Condition, CountPointsBuilder, CreateCollectionBuilder, DeletePointsBuilder, Distance, Filter,
    PointStruct, RetrievedPoint, ScrollPointsBuilder, SearchPointsBuilder, UpsertPointsBuilder,
    Value, VectorParamsBuilder,
};
use qdrant_client::{Payload, Qdrant};
use serde_json::json;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use tracing::{debug, info, warn};
use uuid::Uuid;

use docrag_core::{
    BackendStats, Chunk, EmbeddingRecord, Error, Result, ScoredChunk, SearchFilters, VectorBackend,
    lexical_score, query_terms, rank_order,
};

const SCROLL_PAGE: u32 = 256;

/// Vector backend storing one point per chunk in a Qdrant collection.
///
/// The full chunk is kept as JSON in the `chunk` payload field; `document_id`,
/// `document_type` and `section_type` are duplicated as top-level payload
/// fields so they can be used in filters.
pub struct QdrantVectorBackend {
    client: Qdrant,
    collection: String,
    dimension: usize,
}

impl QdrantVectorBackend {
    /// Connect and make sure the collection exists
    pub async fn connect(
        url: &str,
        api_key: Option<String>,
        collection: impl Into<String>,
        dimension: usize,
    ) -> Result<Self> {
        let mut builder = Qdrant::from_url(url);
        if let Some(key) = api_key {
            builder = builder.api_key(key);
        }
        let client = builder
            .build()
            .map_err(|e| Error::Configuration(format!("Invalid Qdrant client settings: {}", e)))?;

        let backend = Self {
            client,
            collection: collection.into(),
            dimension,
        };
        backend.ensure_collection().await?;
        Ok(backend)
    }

    async fn ensure_collection(&self) -> Result<()> {
        let exists = self
            .client
            .collection_exists(self.collection.clone())
            .await
            .map_err(store_error)?;
        if exists {
            return Ok(());
        }

        self.client
            .create_collection(
                CreateCollectionBuilder::new(&self.collection)
                    .vectors_config(VectorParamsBuilder::new(self.dimension as u64, Distance::Cosine)),
            )
            .await
            .map_err(store_error)?;
        info!(collection = %self.collection, dimension = self.dimension, "Created Qdrant collection");
        Ok(())
    }

    /// Stable point id derived from the chunk id
    fn point_id(chunk_id: &str) -> String {
        Uuid::from_bytes(md5::compute(chunk_id.as_bytes()).0).to_string()
    }

    fn to_point(record: EmbeddingRecord) -> Result<PointStruct> {
        let chunk_json = serde_json::to_string(&record.chunk)?;
        let payload = Payload::try_from(json!({
            "chunk": chunk_json,
            "document_id": record.chunk.document_id,
            "document_type": record.chunk.document_type,
            "section_type": record.chunk.section_type,
            "model": record.model,
        }))
        .map_err(store_error)?;

        Ok(PointStruct::new(
            Self::point_id(&record.chunk.id),
            record.vector,
            payload,
        ))
    }

    fn chunk_from_payload(payload: &HashMap<String, Value>) -> Option<Chunk> {
        let raw = payload.get("chunk").and_then(|v| v.as_str())?;
        match serde_json::from_str(raw) {
            Ok(chunk) => Some(chunk),
            Err(e) => {
                warn!(error = %e, "Skipping point with unreadable chunk payload");
                None
            }
        }
    }

    fn filter(filters: &SearchFilters) -> Option<Filter> {
        let mut conditions = Vec::new();
        if let Some(document_id) = &filters.document_id {
            conditions.push(Condition::matches("document_id", document_id.clone()));
        }
        if let Some(document_type) = &filters.document_type {
            conditions.push(Condition::matches("document_type", document_type.clone()));
        }
        if let Some(section_type) = &filters.section_type {
            conditions.push(Condition::matches("section_type", section_type.clone()));
        }

        if conditions.is_empty() {
            None
        } else {
            Some(Filter::must(conditions))
        }
    }

    /// Every point matching `filter`, page by page
    async fn scroll_all(&self, filter: Option<Filter>) -> Result<Vec<RetrievedPoint>> {
        let mut points = Vec::new();
        let mut offset = None;

        loop {
            let mut request = ScrollPointsBuilder::new(&self.collection)
                .limit(SCROLL_PAGE)
                .with_payload(true)
                .with_vectors(false);
            if let Some(filter) = filter.clone() {
                request = request.filter(filter);
            }
            if let Some(offset) = offset.take() {
                request = request.offset(offset);
            }

            let response = self.client.scroll(request).await.map_err(store_error)?;
            points.extend(response.result);
            match response.next_page_offset {
                Some(next) => offset = Some(next),
                None => break,
            }
        }

        Ok(points)
    }
}

fn store_error(e: impl std::fmt::Display) -> Error {
    Error::Store(e.to_string())
}

#[async_trait]
impl VectorBackend for QdrantVectorBackend {
    async fn upsert(&self, records: Vec<EmbeddingRecord>) -> Result<usize> {
        if records.is_empty() {
            return Ok(0);
        }

        let count = records.len();
        let points = records
            .into_iter()
            .map(Self::to_point)
            .collect::<Result<Vec<_>>>()?;

        self.client
            .upsert_points(UpsertPointsBuilder::new(&self.collection, points).wait(true))
            .await
            .map_err(store_error)?;
        debug!(count, collection = %self.collection, "Upserted points");
        Ok(count)
    }

    async fn search_vector(
        &self,
        vector: &[f32],
        limit: usize,
        filters: &SearchFilters,
    ) -> Result<Vec<ScoredChunk>> {
        let mut request = SearchPointsBuilder::new(&self.collection, vector.to_vec(), limit as u64)
            .with_payload(true);
        if let Some(filter) = Self::filter(filters) {
            request = request.filter(filter);
        }

        let response = self.client.search_points(request).await.map_err(store_error)?;
        let mut results: Vec<ScoredChunk> = response
            .result
            .into_iter()
            .filter_map(|point| {
                Self::chunk_from_payload(&point.payload).map(|chunk| ScoredChunk {
                    chunk,
                    score: point.score,
                })
            })
            .collect();
        results.sort_by(rank_order);
        Ok(results)
    }

    async fn search_lexical(
        &self,
        query: &str,
        limit: usize,
        filters: &SearchFilters,
    ) -> Result<Vec<ScoredChunk>> {
        let terms = query_terms(query);
        if terms.is_empty() {
            return Ok(Vec::new());
        }

        let points = self.scroll_all(Self::filter(filters)).await?;
        let mut results: Vec<ScoredChunk> = points
            .iter()
            .filter_map(|point| Self::chunk_from_payload(&point.payload))
            .map(|chunk| {
                let score = lexical_score(&terms, &chunk.text);
                ScoredChunk { chunk, score }
            })
            .filter(|s| s.score > 0.0)
            .collect();
        results.sort_by(rank_order);
        results.truncate(limit);
        Ok(results)
    }

    async fn delete_document(&self, document_id: &str) -> Result<usize> {
        let filter = Filter::must([Condition::matches("document_id", document_id.to_string())]);

        let count = self
            .client
            .count(
                CountPointsBuilder::new(&self.collection)
                    .filter(filter.clone())
                    .exact(true),
            )
            .await
            .map_err(store_error)?
            .result
            .map(|r| r.count as usize)
            .unwrap_or(0);
        if count == 0 {
            return Ok(0);
        }

        self.client
            .delete_points(DeletePointsBuilder::new(&self.collection).points(filter).wait(true))
            .await
            .map_err(store_error)?;
        info!(document_id, count, "Deleted document points");
        Ok(count)
    }

    async fn document_chunks(&self, document_id: &str) -> Result<Vec<Chunk>> {
        let filter = Filter::must([Condition::matches("document_id", document_id.to_string())]);
        let mut chunks: Vec<Chunk> = self
            .scroll_all(Some(filter))
            .await?
            .iter()
            .filter_map(|point| Self::chunk_from_payload(&point.payload))
            .collect();
        chunks.sort_by_key(|c| c.index);
        Ok(chunks)
    }

    async fn stats(&self) -> Result<BackendStats> {
        let points = self.scroll_all(None).await?;
        let mut documents = BTreeSet::new();
        let mut by_document_type: BTreeMap<String, usize> = BTreeMap::new();

        for chunk in points.iter().filter_map(|p| Self::chunk_from_payload(&p.payload)) {
            if let Some(document_type) = &chunk.document_type {
                *by_document_type.entry(document_type.clone()).or_default() += 1;
            }
            documents.insert(chunk.document_id);
        }

        Ok(BackendStats {
            total_embeddings: points.len(),
            unique_documents: documents.len(),
            by_document_type,
            dimension: Some(self.dimension),
        })
    }
}
