use std::{collections::BTreeMap, sync::Arc};

use crate::{
    database::CacheRecord,
    index::Chunk,
    pipeline::types::{Answer, FusedResult, RankedResult, RetrievalKey},
};

/// The accumulating record of one question execution.
///
/// Each field is written once, by the stage that owns it. A cache hit only
/// ever fills `answer`.
#[derive(Debug)]
pub struct PipelineState {
    request_id: String,
    question: String,
    cache_hit: bool,
    rewritten_queries: Vec<String>,
    retrieved: BTreeMap<RetrievalKey, Vec<RankedResult>>,
    fused: Vec<FusedResult>,
    reranked: Vec<Arc<Chunk>>,
    answer: Option<Answer>,
}

impl PipelineState {
    pub fn new(question: &str) -> Self {
        Self {
            request_id: uuid::Uuid::new_v4().to_string(),
            question: question.to_string(),
            cache_hit: false,
            rewritten_queries: Vec::new(),
            retrieved: BTreeMap::new(),
            fused: Vec::new(),
            reranked: Vec::new(),
            answer: None,
        }
    }

    pub fn request_id(&self) -> &str {
        &self.request_id
    }

    pub fn question(&self) -> &str {
        &self.question
    }

    pub fn cache_hit(&self) -> bool {
        self.cache_hit
    }

    pub fn rewritten_queries(&self) -> &[String] {
        &self.rewritten_queries
    }

    pub fn retrieved(&self) -> &BTreeMap<RetrievalKey, Vec<RankedResult>> {
        &self.retrieved
    }

    pub fn fused(&self) -> &[FusedResult] {
        &self.fused
    }

    pub fn reranked(&self) -> &[Arc<Chunk>] {
        &self.reranked
    }

    pub fn answer(&self) -> Option<&Answer> {
        self.answer.as_ref()
    }

    /// Query variants to retrieve with: the rewrites, then optionally the
    /// original question.
    pub fn query_variants(&self, include_original: bool) -> Vec<String> {
        let mut variants = self.rewritten_queries.clone();
        if include_original {
            variants.push(self.question.clone());
        }
        variants
    }

    pub fn restore_from_cache(&mut self, record: CacheRecord) {
        debug_assert!(self.answer.is_none());
        self.cache_hit = true;
        self.answer = Some(Answer {
            text: record.answer,
            citations: record.citations,
        });
    }

    pub fn set_rewritten_queries(&mut self, queries: Vec<String>) {
        debug_assert!(self.rewritten_queries.is_empty());
        self.rewritten_queries = queries;
    }

    pub fn set_retrieved(&mut self, retrieved: BTreeMap<RetrievalKey, Vec<RankedResult>>) {
        debug_assert!(self.retrieved.is_empty());
        self.retrieved = retrieved;
    }

    pub fn set_fused(&mut self, fused: Vec<FusedResult>) {
        debug_assert!(self.fused.is_empty());
        self.fused = fused;
    }

    pub fn set_reranked(&mut self, reranked: Vec<Arc<Chunk>>) {
        debug_assert!(self.reranked.is_empty());
        self.reranked = reranked;
    }

    pub fn set_answer(&mut self, answer: Answer) {
        debug_assert!(self.answer.is_none());
        self.answer = Some(answer);
    }
}
