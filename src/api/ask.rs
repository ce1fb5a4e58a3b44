use std::sync::Arc;

use async_graphql::{Context, Object, Result, SimpleObject};

use crate::pipeline::{types::Citation, PipelineOutcome, RagPipeline};

#[derive(SimpleObject)]
pub(crate) struct Source {
    pub document: String,
    pub page: u64,
    pub chunk_index: u64,
    /// `"{document}, page {page}, chunk {chunk_index}"`
    pub label: String,
}

impl From<&Citation> for Source {
    fn from(citation: &Citation) -> Self {
        Self {
            document: citation.document.clone(),
            page: citation.page,
            chunk_index: citation.chunk_index,
            label: citation.to_string(),
        }
    }
}

#[derive(SimpleObject)]
pub(crate) struct AskResponse {
    pub request_id: String,
    pub question: String,
    pub answer: String,
    pub citations: Vec<Source>,
    pub cache_hit: bool,
    pub rewritten_queries: Vec<String>,
    /// Answer and sources as plain text, prefixed when served from cache.
    pub rendered: String,
    pub timestamp: String,
}

impl From<PipelineOutcome> for AskResponse {
    fn from(outcome: PipelineOutcome) -> Self {
        Self {
            rendered: outcome.render(),
            citations: outcome.answer.citations.iter().map(Source::from).collect(),
            request_id: outcome.request_id,
            question: outcome.question,
            answer: outcome.answer.text,
            cache_hit: outcome.cache_hit,
            rewritten_queries: outcome.rewritten_queries,
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }
}

#[derive(Default)]
pub(super) struct AskQuery;

#[Object]
impl AskQuery {
    async fn ask(&self, ctx: &Context<'_>, question: String) -> Result<AskResponse> {
        let pipeline = ctx.data::<Arc<RagPipeline>>()?;
        match pipeline.ask(&question).await {
            Ok(outcome) => Ok(outcome.into()),
            Err(e) => Err(async_graphql::Error::new(format!("RAG query failed: {e}"))),
        }
    }
}
