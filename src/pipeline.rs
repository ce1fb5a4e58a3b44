//! Question answering over the document corpus.
//!
//! One execution walks a fixed sequence of stages:
//!
//! ```text
//! Start → CacheCheck → Cached → Done
//!                    → Rewrite → Retrieve → Fuse → Rerank → Generate → CacheWrite → Done
//! ```
//!
//! Only an unreachable response model during generation ends in `Failed`;
//! every other stage degrades instead of failing.

pub mod state;
pub mod tasks;
#[cfg(test)]
pub(crate) mod test_support;
pub mod types;
pub mod utils;

use std::{sync::Arc, time::Duration};

use anyhow::Result;
use chrono::Utc;
use ollama_rs::Ollama;
use tracing::{error, info, instrument, warn, Span};

use crate::{
    database::Database,
    index::{Chunk, CorpusIndex, DocumentIndex},
    llm::{LanguageModel, OllamaModel},
    session_log::{ErrorRecord, LoggedChunk, SessionLog, SessionRecord},
    settings::{RetrievalSettings, Settings},
};

use self::{
    state::PipelineState,
    tasks::{
        fuse, AnswerGenerationTask, ContextRerankTask, HybridRetrievalTask, QueryRewriteTask,
    },
    types::Answer,
};

const CACHED_PREFIX: &str = "[Cached Response]\n\n";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Start,
    CacheCheck,
    Cached,
    Rewrite,
    Retrieve,
    Fuse,
    Rerank,
    Generate,
    CacheWrite,
    Done,
    Failed,
}

impl Stage {
    fn is_terminal(self) -> bool {
        matches!(self, Stage::Done | Stage::Failed)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("question is empty")]
    EmptyQuestion,
    #[error("{0:#}")]
    Generation(anyhow::Error),
}

/// What a caller gets back from [`RagPipeline::ask`].
#[derive(Debug, Clone)]
pub struct PipelineOutcome {
    pub request_id: String,
    pub question: String,
    pub answer: Answer,
    pub cache_hit: bool,
    pub rewritten_queries: Vec<String>,
    pub reranked: Vec<Arc<Chunk>>,
}

impl PipelineOutcome {
    /// The answer with its `Sources:` block; cached answers carry a marker
    /// line in front.
    pub fn render(&self) -> String {
        let rendered = self.answer.render();
        if self.cache_hit {
            format!("{CACHED_PREFIX}{rendered}")
        } else {
            rendered
        }
    }
}

/// External collaborators of the pipeline, built once at startup.
pub struct Collaborators {
    pub index: Arc<dyn DocumentIndex>,
    pub response_model: Arc<dyn LanguageModel>,
    pub rerank_model: Arc<dyn LanguageModel>,
    pub cache: Database,
    pub session_log: SessionLog,
}

pub struct RagPipeline {
    rewriter: QueryRewriteTask,
    retriever: HybridRetrievalTask,
    reranker: ContextRerankTask,
    generator: AnswerGenerationTask,
    cache: Database,
    session_log: SessionLog,
    retrieval: RetrievalSettings,
}

impl RagPipeline {
    pub fn new(
        parts: Collaborators,
        retrieval: RetrievalSettings,
        search_timeout: Duration,
    ) -> Self {
        Self {
            rewriter: QueryRewriteTask::new(Arc::clone(&parts.response_model)),
            retriever: HybridRetrievalTask::new(
                parts.index,
                retrieval.k_per_retriever,
                search_timeout,
            ),
            reranker: ContextRerankTask::new(parts.rerank_model, retrieval.top_k_final),
            generator: AnswerGenerationTask::new(parts.response_model),
            cache: parts.cache,
            session_log: parts.session_log,
            retrieval,
        }
    }

    /// Connects to Ollama, Qdrant, the keyword index and the cache.
    ///
    /// # Errors
    ///
    /// Returns an error if any of the stores cannot be opened.
    pub fn from_settings(settings: &Settings) -> Result<Self> {
        let ollama = Ollama::new(settings.llm.host.clone(), settings.llm.port);
        let index = CorpusIndex::open(&settings.index, ollama.clone())?;
        let response_model =
            OllamaModel::new(ollama.clone(), &settings.llm.response_model, &settings.llm);
        let rerank_model = OllamaModel::new(ollama, &settings.llm.rerank_model, &settings.llm);
        let cache = Database::connect(&settings.storage.cache_path)?;

        let parts = Collaborators {
            index: Arc::new(index),
            response_model: Arc::new(response_model),
            rerank_model: Arc::new(rerank_model),
            cache,
            session_log: SessionLog::new(&settings.storage.log_dir),
        };
        Ok(Self::new(
            parts,
            settings.retrieval.clone(),
            settings.index.search_timeout(),
        ))
    }

    pub fn cache(&self) -> &Database {
        &self.cache
    }

    /// Answers one question.
    ///
    /// # Errors
    ///
    /// Returns an error if the question is blank or if the response model is
    /// unreachable during generation.
    #[instrument(skip(self), fields(request_id))]
    pub async fn ask(&self, question: &str) -> Result<PipelineOutcome, PipelineError> {
        let question = question.trim();
        if question.is_empty() {
            return Err(PipelineError::EmptyQuestion);
        }

        let mut state = PipelineState::new(question);
        Span::current().record("request_id", state.request_id());

        let mut stage = Stage::Start;
        while !stage.is_terminal() {
            let next = match self.step(stage, &mut state).await {
                Ok(next) => next,
                Err(e) => {
                    error!(from = ?stage, to = ?Stage::Failed, error = %e, "pipeline failed");
                    let record = ErrorRecord {
                        timestamp: Utc::now(),
                        request_id: state.request_id().to_string(),
                        question: state.question().to_string(),
                        error_message: e.to_string(),
                    };
                    self.session_log.record_error(&record).await;
                    return Err(e);
                }
            };
            info!(from = ?stage, to = ?next, "stage transition");
            stage = next;
        }

        let outcome = outcome(state);
        let record = SessionRecord {
            timestamp: Utc::now(),
            request_id: outcome.request_id.clone(),
            question: outcome.question.clone(),
            cache_hit: outcome.cache_hit,
            rewritten_queries: outcome.rewritten_queries.clone(),
            answer: outcome.answer.text.clone(),
            citations: outcome.answer.citations.clone(),
            reranked_context: outcome
                .reranked
                .iter()
                .map(|chunk| LoggedChunk {
                    chunk_id: chunk.id.clone(),
                    content: chunk.content.clone(),
                })
                .collect(),
        };
        self.session_log.record_session(&record).await;
        Ok(outcome)
    }

    async fn step(&self, stage: Stage, state: &mut PipelineState) -> Result<Stage, PipelineError> {
        let next = match stage {
            Stage::Start => Stage::CacheCheck,
            Stage::CacheCheck => {
                if self.check_cache(state) {
                    Stage::Cached
                } else {
                    Stage::Rewrite
                }
            }
            Stage::Cached => Stage::Done,
            Stage::Rewrite => {
                let queries = self.rewriter.run(state.question()).await;
                state.set_rewritten_queries(queries);
                Stage::Retrieve
            }
            Stage::Retrieve => {
                let variants = state.query_variants(self.retrieval.include_original_question);
                let retrieved = self.retriever.run(&variants).await;
                state.set_retrieved(retrieved);
                Stage::Fuse
            }
            Stage::Fuse => {
                let fused = fuse(
                    state.retrieved(),
                    self.retrieval.rrf_k,
                    self.retrieval.top_k_fusion,
                );
                state.set_fused(fused);
                Stage::Rerank
            }
            Stage::Rerank => {
                let reranked = self.reranker.run(state.question(), state.fused()).await;
                state.set_reranked(reranked);
                Stage::Generate
            }
            Stage::Generate => {
                let answer = self
                    .generator
                    .run(state.question(), state.reranked())
                    .await
                    .map_err(PipelineError::Generation)?;
                state.set_answer(answer);
                Stage::CacheWrite
            }
            Stage::CacheWrite => {
                self.write_cache(state);
                Stage::Done
            }
            Stage::Done | Stage::Failed => stage,
        };
        Ok(next)
    }

    fn check_cache(&self, state: &mut PipelineState) -> bool {
        match self.cache.lookup(state.question()) {
            Ok(Some(record)) => {
                info!("cache hit");
                state.restore_from_cache(record);
                true
            }
            Ok(None) => {
                info!("cache miss");
                false
            }
            Err(e) => {
                warn!(error = %e, "cache lookup failed, treating as miss");
                false
            }
        }
    }

    fn write_cache(&self, state: &PipelineState) {
        let Some(answer) = state.answer() else {
            return;
        };
        let reranked_refs: Vec<String> = state.reranked().iter().map(|c| c.id.clone()).collect();
        if let Err(e) = self.cache.store(
            state.question(),
            state.rewritten_queries(),
            &answer.text,
            &answer.citations,
            &reranked_refs,
        ) {
            warn!(error = %e, "failed to cache answer");
        }
    }
}

fn outcome(state: PipelineState) -> PipelineOutcome {
    PipelineOutcome {
        request_id: state.request_id().to_string(),
        question: state.question().to_string(),
        answer: state.answer().cloned().unwrap_or_else(|| Answer {
            text: tasks::NO_CONTEXT_ANSWER.to_string(),
            citations: Vec::new(),
        }),
        cache_hit: state.cache_hit(),
        rewritten_queries: state.rewritten_queries().to_vec(),
        reranked: state.reranked().to_vec(),
    }
}
