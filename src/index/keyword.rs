use std::path::Path;

use anyhow::Result;
use tantivy::{
    collector::TopDocs,
    query::QueryParser,
    schema::{Field, Value},
    tokenizer::{LowerCaser, SimpleTokenizer, StopWordFilter, TextAnalyzer},
    Index, IndexReader, TantivyDocument,
};
use tracing::{debug, warn};

use super::{Chunk, ChunkMetadata, SearchHit};

const TOKENIZER: &str = "text_with_stopwords";

const STOP_WORDS: &[&str] = &[
    "a", "an", "and", "are", "as", "at", "be", "by", "for", "from", "has", "in", "is", "it",
    "its", "of", "on", "that", "the", "to", "was", "were", "will", "with", "or", "but", "not",
    "this", "these", "they", "them", "their", "there", "then", "than", "so", "if", "when",
    "where", "why", "how", "what", "which", "who", "whom", "whose", "can", "could", "should",
    "would", "may", "might", "must", "do", "does", "did", "have", "had",
];

pub fn register_tokenizer(index: &Index) {
    let tokenizer = TextAnalyzer::builder(SimpleTokenizer::default())
        .filter(LowerCaser)
        .filter(StopWordFilter::remove(
            STOP_WORDS.iter().map(|s| (*s).to_string()),
        ))
        .build();
    index.tokenizers().register(TOKENIZER, tokenizer);
}

#[derive(Clone, Copy)]
struct Fields {
    chunk_id: Field,
    content: Field,
    source: Field,
    page: Field,
    chunk_index: Field,
}

/// BM25 search over the chunk corpus.
pub struct KeywordIndex {
    index: Index,
    reader: IndexReader,
    fields: Fields,
}

impl KeywordIndex {
    pub fn open(index_dir: &Path) -> Result<Self> {
        Self::from_index(Index::open_in_dir(index_dir)?)
    }

    pub fn from_index(index: Index) -> Result<Self> {
        register_tokenizer(&index);
        let schema = index.schema();
        let fields = Fields {
            chunk_id: schema.get_field("chunk_id")?,
            content: schema.get_field("content")?,
            source: schema.get_field("source")?,
            page: schema.get_field("page")?,
            chunk_index: schema.get_field("chunk_index")?,
        };
        let reader = index.reader()?;
        Ok(Self {
            index,
            reader,
            fields,
        })
    }

    /// Questions are free text, so the query is parsed leniently: syntax the
    /// parser rejects is dropped instead of failing the search.
    pub fn search(&self, query: &str, k: usize) -> Result<Vec<SearchHit>> {
        if k == 0 || query.trim().is_empty() {
            return Ok(Vec::new());
        }
        let parser = QueryParser::for_index(&self.index, vec![self.fields.content]);
        let (parsed, errors) = parser.parse_query_lenient(query);
        if !errors.is_empty() {
            debug!(?errors, "ignored parts of keyword query");
        }

        let searcher = self.reader.searcher();
        let top_docs = searcher.search(&parsed, &TopDocs::with_limit(k))?;
        let mut hits = Vec::with_capacity(top_docs.len());
        for (score, addr) in top_docs {
            let doc: TantivyDocument = searcher.doc(addr)?;
            match self.chunk_from_doc(&doc) {
                Some(chunk) => hits.push(SearchHit { chunk, score }),
                None => warn!("skipping keyword hit without chunk_id"),
            }
        }
        Ok(hits)
    }

    fn chunk_from_doc(&self, doc: &TantivyDocument) -> Option<Chunk> {
        let text = |field| {
            doc.get_first(field)
                .and_then(|v| v.as_str())
                .map(str::to_string)
        };
        let number = |field| doc.get_first(field).and_then(|v| v.as_u64());

        Some(Chunk {
            id: text(self.fields.chunk_id)?,
            content: text(self.fields.content).unwrap_or_default(),
            metadata: ChunkMetadata {
                source: text(self.fields.source).unwrap_or_else(|| "unknown".to_string()),
                page: number(self.fields.page).unwrap_or_default(),
                chunk_index: number(self.fields.chunk_index).unwrap_or_default(),
            },
        })
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use tantivy::{
        doc,
        schema::{IndexRecordOption, Schema, TextFieldIndexing, TextOptions, STORED, STRING},
    };

    use super::*;

    /// Same layout the ingestion job writes.
    fn build_schema() -> Schema {
        let mut schema_builder = Schema::builder();
        schema_builder.add_text_field("chunk_id", STRING | STORED);
        let content_indexing = TextFieldIndexing::default()
            .set_tokenizer(TOKENIZER)
            .set_index_option(IndexRecordOption::WithFreqsAndPositions);
        let content_options = TextOptions::default()
            .set_indexing_options(content_indexing)
            .set_stored();
        schema_builder.add_text_field("content", content_options);
        schema_builder.add_text_field("source", STRING | STORED);
        schema_builder.add_u64_field("page", STORED);
        schema_builder.add_u64_field("chunk_index", STORED);
        schema_builder.build()
    }

    pub(crate) fn in_memory(chunks: &[Chunk]) -> KeywordIndex {
        let schema = build_schema();
        let index = Index::create_in_ram(schema.clone());
        register_tokenizer(&index);
        let mut writer = index.writer_with_num_threads(1, 15_000_000).unwrap();
        for c in chunks {
            writer
                .add_document(doc!(
                    schema.get_field("chunk_id").unwrap() => c.id.clone(),
                    schema.get_field("content").unwrap() => c.content.clone(),
                    schema.get_field("source").unwrap() => c.metadata.source.clone(),
                    schema.get_field("page").unwrap() => c.metadata.page,
                    schema.get_field("chunk_index").unwrap() => c.metadata.chunk_index,
                ))
                .unwrap();
        }
        writer.commit().unwrap();
        KeywordIndex::from_index(index).unwrap()
    }

    fn corpus() -> Vec<Chunk> {
        vec![
            Chunk::new(
                "attention.pdf",
                8,
                42,
                "On the WMT 2014 English-to-German translation task the big transformer model achieves a BLEU score of 28.4",
            ),
            Chunk::new(
                "attention.pdf",
                2,
                5,
                "The Transformer relies entirely on self-attention to compute representations",
            ),
            Chunk::new("bert.pdf", 1, 0, "BERT is pre-trained on masked language modeling"),
        ]
    }

    #[test]
    fn bm25_ranks_matching_chunk_first() {
        let index = in_memory(&corpus());
        let hits = index
            .search("What is the BLEU score on WMT 2014 English-to-German?", 10)
            .unwrap();
        assert!(!hits.is_empty());
        assert_eq!(hits[0].chunk.id, "attention.pdf, page 8, chunk 42");
        assert_eq!(hits[0].chunk.metadata.page, 8);
        assert!(hits.windows(2).all(|w| w[0].score >= w[1].score));
    }

    #[test]
    fn small_corpus_returns_fewer_than_k() {
        let index = in_memory(&corpus());
        let hits = index.search("transformer", 10).unwrap();
        assert!(hits.len() < 10);
        assert!(index.search("transformer", 0).unwrap().is_empty());
        assert!(index.search("zeppelin", 5).unwrap().is_empty());
    }

    #[test]
    fn unbalanced_syntax_does_not_fail() {
        let index = in_memory(&corpus());
        assert!(index.search("\"self-attention (BERT", 5).is_ok());
    }
}
