//! Read-only access to the precomputed chunk corpus.
//!
//! The corpus is built by an external ingestion job. This module only queries
//! it: semantically through a Qdrant collection and lexically through a
//! Tantivy index that share the same chunk ids.

pub mod keyword;
pub mod semantic;

use std::{fmt, sync::Arc};

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::settings::IndexSettings;

pub use self::{keyword::KeywordIndex, semantic::SemanticIndex};

/// Where a chunk came from inside the source corpus.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChunkMetadata {
    pub source: String,
    pub page: u64,
    pub chunk_index: u64,
}

/// A unit of retrievable text, immutable once indexed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chunk {
    pub id: String,
    pub content: String,
    pub metadata: ChunkMetadata,
}

impl Chunk {
    /// Builds a chunk whose id follows the corpus convention
    /// `"{source}, page {page}, chunk {chunk_index}"`.
    pub fn new(source: &str, page: u64, chunk_index: u64, content: &str) -> Self {
        Self {
            id: format!("{source}, page {page}, chunk {chunk_index}"),
            content: content.to_string(),
            metadata: ChunkMetadata {
                source: source.to_string(),
                page,
                chunk_index,
            },
        }
    }
}

/// One entry of a retriever's output. Higher `score` is better.
#[derive(Debug, Clone)]
pub struct SearchHit {
    pub chunk: Chunk,
    pub score: f32,
}

/// Which retrieval modality produced a ranked list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum RetrieverKind {
    Semantic,
    Keyword,
}

impl fmt::Display for RetrieverKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RetrieverKind::Semantic => "semantic",
            RetrieverKind::Keyword => "keyword",
        };
        write!(f, "{s}")
    }
}

/// Both searches must return fewer than `k` hits, possibly none, without
/// erroring when the corpus is small.
#[async_trait]
pub trait DocumentIndex: Send + Sync {
    async fn semantic_search(&self, query: &str, k: usize) -> Result<Vec<SearchHit>>;
    async fn keyword_search(&self, query: &str, k: usize) -> Result<Vec<SearchHit>>;
}

/// The production index: Qdrant for embeddings, Tantivy for BM25.
pub struct CorpusIndex {
    semantic: SemanticIndex,
    keyword: Arc<KeywordIndex>,
}

impl CorpusIndex {
    pub fn open(settings: &IndexSettings, ollama: ollama_rs::Ollama) -> Result<Self> {
        let semantic = SemanticIndex::connect(settings, ollama)?;
        let keyword = KeywordIndex::open(&settings.keyword_index_dir).with_context(|| {
            format!(
                "failed to open keyword index at {}",
                settings.keyword_index_dir.display()
            )
        })?;
        Ok(Self {
            semantic,
            keyword: Arc::new(keyword),
        })
    }
}

#[async_trait]
impl DocumentIndex for CorpusIndex {
    async fn semantic_search(&self, query: &str, k: usize) -> Result<Vec<SearchHit>> {
        self.semantic.search(query, k).await
    }

    async fn keyword_search(&self, query: &str, k: usize) -> Result<Vec<SearchHit>> {
        let keyword = Arc::clone(&self.keyword);
        let query = query.to_string();
        tokio::task::spawn_blocking(move || keyword.search(&query, k))
            .await
            .context("keyword search task panicked")?
    }
}
