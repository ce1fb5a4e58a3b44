use std::collections::HashMap;

use anyhow::{anyhow, Context, Result};
use ollama_rs::{
    generation::embeddings::request::{EmbeddingsInput, GenerateEmbeddingsRequest},
    Ollama,
};
use qdrant_client::{
    qdrant::{value::Kind, Query, QueryPointsBuilder, ScoredPoint, Value},
    Qdrant,
};
use tracing::{debug, warn};

use super::{Chunk, ChunkMetadata, SearchHit};
use crate::settings::IndexSettings;

static ERROR_MESSAGE: &str = "Failed to build Qdrant client. Is Qdrant running?";

/// Nearest-neighbour search over the chunk collection in Qdrant.
///
/// Points carry `{"page_content": .., "metadata": {"chunk_id", "source", "page", "chunk_index"}}`.
pub struct SemanticIndex {
    client: Qdrant,
    collection: String,
    ollama: Ollama,
    embedding_model: String,
    query_prefix: String,
}

impl SemanticIndex {
    pub fn connect(settings: &IndexSettings, ollama: Ollama) -> Result<Self> {
        let client = Qdrant::from_url(&settings.qdrant_url)
            .build()
            .context(ERROR_MESSAGE)?;
        Ok(Self {
            client,
            collection: settings.collection.clone(),
            ollama,
            embedding_model: settings.embedding_model.clone(),
            query_prefix: settings.query_prefix.clone(),
        })
    }

    async fn embed_query(&self, query: &str) -> Result<Vec<f32>> {
        let request = GenerateEmbeddingsRequest::new(
            self.embedding_model.clone(),
            EmbeddingsInput::Single(format!("{}{query}", self.query_prefix)),
        );
        let response = self
            .ollama
            .generate_embeddings(request)
            .await
            .context("embedding request failed")?;
        response
            .embeddings
            .into_iter()
            .next()
            .ok_or_else(|| anyhow!("embedding model returned no vector"))
    }

    pub async fn search(&self, query: &str, k: usize) -> Result<Vec<SearchHit>> {
        if k == 0 {
            return Ok(Vec::new());
        }
        let vector = self.embed_query(query).await?;
        let response = self
            .client
            .query(
                QueryPointsBuilder::new(self.collection.clone())
                    .query(Query::new_nearest(vector))
                    .limit(k as u64)
                    .with_payload(true),
            )
            .await
            .with_context(|| format!("query on collection '{}' failed", self.collection))?;

        let hits: Vec<SearchHit> = response
            .result
            .into_iter()
            .filter_map(|point| {
                let hit = hit_from_point(point);
                if hit.is_none() {
                    warn!(collection = %self.collection, "skipping point without chunk payload");
                }
                hit
            })
            .collect();
        debug!(hits = hits.len(), "semantic search finished");
        Ok(hits)
    }
}

fn hit_from_point(point: ScoredPoint) -> Option<SearchHit> {
    let chunk = chunk_from_payload(&point.payload)?;
    Some(SearchHit {
        chunk,
        score: point.score,
    })
}

/// Reads a chunk out of a point payload. Metadata may be nested under
/// `metadata` or flattened next to `page_content`.
fn chunk_from_payload(payload: &HashMap<String, Value>) -> Option<Chunk> {
    let content = payload.get("page_content").and_then(as_string)?;
    let metadata = match payload.get("metadata").and_then(|v| v.kind.as_ref()) {
        Some(Kind::StructValue(inner)) => &inner.fields,
        _ => payload,
    };

    let source = metadata
        .get("source")
        .and_then(as_string)
        .unwrap_or_else(|| "unknown".to_string());
    let page = metadata.get("page").and_then(as_u64).unwrap_or_default();
    let chunk_index = metadata
        .get("chunk_index")
        .and_then(as_u64)
        .unwrap_or_default();

    let mut chunk = Chunk::new(&source, page, chunk_index, &content);
    if let Some(id) = metadata.get("chunk_id").and_then(as_string) {
        chunk.id = id;
    }
    Some(chunk)
}

fn as_string(value: &Value) -> Option<String> {
    match value.kind.as_ref()? {
        Kind::StringValue(s) => Some(s.clone()),
        _ => None,
    }
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn as_u64(value: &Value) -> Option<u64> {
    match value.kind.as_ref()? {
        Kind::IntegerValue(n) => u64::try_from(*n).ok(),
        Kind::DoubleValue(f) if *f >= 0.0 => Some(*f as u64),
        Kind::StringValue(s) => s.trim().parse().ok(),
        _ => None,
    }
}
