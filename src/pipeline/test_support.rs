//! Scripted collaborators for pipeline tests.

use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc, Mutex,
};

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;

use crate::{
    index::{Chunk, DocumentIndex, SearchHit},
    llm::{LanguageModel, ResponseFormat},
};

type Responder = Box<dyn Fn(&str) -> Result<String> + Send + Sync>;

pub(crate) struct ScriptedModel {
    respond: Responder,
    prompts: Mutex<Vec<String>>,
}

impl ScriptedModel {
    pub(crate) fn new(
        respond: impl Fn(&str) -> Result<String> + Send + Sync + 'static,
    ) -> Arc<Self> {
        Arc::new(Self {
            respond: Box::new(respond),
            prompts: Mutex::new(Vec::new()),
        })
    }

    pub(crate) fn replying(reply: &str) -> Arc<Self> {
        let reply = reply.to_string();
        Self::new(move |_| Ok(reply.clone()))
    }

    pub(crate) fn failing() -> Arc<Self> {
        Self::new(|_| Err(anyhow!("connection refused")))
    }

    pub(crate) fn calls(&self) -> usize {
        self.prompts.lock().unwrap().len()
    }

    pub(crate) fn prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap().clone()
    }
}

#[async_trait]
impl LanguageModel for ScriptedModel {
    async fn complete(&self, prompt: &str, _format: ResponseFormat) -> Result<String> {
        self.prompts.lock().unwrap().push(prompt.to_string());
        (self.respond)(prompt)
    }
}

/// Scores chunks by how many query terms they contain. Both modalities share
/// the scoring; either can be made to fail.
#[derive(Default)]
pub(crate) struct FakeIndex {
    chunks: Vec<Chunk>,
    fail_semantic: bool,
    fail_keyword: bool,
    semantic_calls: AtomicUsize,
    keyword_calls: AtomicUsize,
}

impl FakeIndex {
    pub(crate) fn new(chunks: Vec<Chunk>) -> Self {
        Self {
            chunks,
            ..Self::default()
        }
    }

    pub(crate) fn failing_semantic(mut self) -> Self {
        self.fail_semantic = true;
        self
    }

    pub(crate) fn failing_keyword(mut self) -> Self {
        self.fail_keyword = true;
        self
    }

    pub(crate) fn semantic_calls(&self) -> usize {
        self.semantic_calls.load(Ordering::SeqCst)
    }

    pub(crate) fn keyword_calls(&self) -> usize {
        self.keyword_calls.load(Ordering::SeqCst)
    }

    pub(crate) fn total_calls(&self) -> usize {
        self.semantic_calls() + self.keyword_calls()
    }

    fn matching(&self, query: &str, k: usize) -> Vec<SearchHit> {
        let terms: Vec<String> = query
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| t.len() > 2)
            .map(str::to_lowercase)
            .collect();

        let mut hits: Vec<SearchHit> = self
            .chunks
            .iter()
            .filter_map(|chunk| {
                let content = chunk.content.to_lowercase();
                let score = terms.iter().filter(|t| content.contains(t.as_str())).count();
                (score > 0).then(|| SearchHit {
                    chunk: chunk.clone(),
                    score: score as f32,
                })
            })
            .collect();
        hits.sort_by(|a, b| {
            b.score
                .total_cmp(&a.score)
                .then_with(|| a.chunk.id.cmp(&b.chunk.id))
        });
        hits.truncate(k);
        hits
    }
}

#[async_trait]
impl DocumentIndex for FakeIndex {
    async fn semantic_search(&self, query: &str, k: usize) -> Result<Vec<SearchHit>> {
        self.semantic_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_semantic {
            bail!("qdrant unavailable");
        }
        Ok(self.matching(query, k))
    }

    async fn keyword_search(&self, query: &str, k: usize) -> Result<Vec<SearchHit>> {
        self.keyword_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_keyword {
            bail!("keyword index unavailable");
        }
        Ok(self.matching(query, k))
    }
}

/// A small corpus around the Transformer paper's BLEU result.
pub(crate) fn transformer_corpus() -> Vec<Chunk> {
    vec![
        Chunk::new(
            "attention.pdf",
            1,
            0,
            "The Transformer is a model architecture relying entirely on attention.",
        ),
        Chunk::new(
            "attention.pdf",
            8,
            42,
            "On the WMT 2014 English-to-German translation task, the big Transformer model \
             achieves a BLEU score of 28.4, outperforming the best previously reported models.",
        ),
        Chunk::new(
            "attention.pdf",
            5,
            17,
            "Multi-head attention allows the model to attend to information from different \
             representation subspaces.",
        ),
        Chunk::new(
            "bert.pdf",
            3,
            9,
            "BERT is pre-trained with masked language modeling on unlabeled text.",
        ),
    ]
}

pub(crate) const BLEU_CHUNK: &str = "attention.pdf, page 8, chunk 42";

/// Rewrites into BLEU-focused queries and answers from whatever context it is
/// given.
pub(crate) fn bleu_response_model() -> Arc<ScriptedModel> {
    ScriptedModel::new(|prompt| {
        if prompt.contains("search query optimization") {
            Ok(r#"{"queries": ["Transformer BLEU score English-German", "What BLEU score does the big Transformer achieve?", "Transformer translation BLEU result"]}"#.to_string())
        } else if prompt.contains("28.4") {
            Ok(r#"{"answer": "The big Transformer achieves a BLEU score of 28.4 on WMT 2014 English-to-German."}"#.to_string())
        } else {
            Ok(r#"{"answer": "There is no relevant content in the PDFs you uploaded."}"#.to_string())
        }
    })
}

pub(crate) fn bleu_rerank_model() -> Arc<ScriptedModel> {
    ScriptedModel::replying(&format!(r#"{{"selected_ids": ["{BLEU_CHUNK}"]}}"#))
}
