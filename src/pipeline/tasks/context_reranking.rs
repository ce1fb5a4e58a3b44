use std::{collections::HashSet, sync::Arc};

use serde_json::Value;
use tracing::{debug, info, instrument, warn};

use crate::{
    index::Chunk,
    llm::{LanguageModel, ResponseFormat},
    pipeline::{
        types::FusedResult,
        utils::{fill_template, parse_json_list},
    },
};

const RERANK_PROMPT: &str = r#"You are a relevance evaluator. Given a question and document chunks, identify the TOP {top_k} chunks most useful for answering the question.

Question: {question}

Available chunks:
{chunks}
Instructions:
1. Prefer chunks with specific facts, numbers or direct answers.
2. Prefer chunks that contain exactly the requested information.
3. For list questions (authors, references, steps), prefer complete lists over partial mentions.
4. Skip chunks with only background or loosely related content.
5. Return up to {top_k} chunk numbers, most relevant first.

Respond with JSON only, in this format:
{"selected_ids": [3, 0, 7]}"#;

const TABLE_KEYWORDS: [&str; 6] = [
    "table",
    "figure",
    "parameter",
    "coefficient",
    "matrix",
    "value",
];
const LIST_KEYWORDS: [&str; 5] = ["author", "reference", "step", "equation", "formula"];
const CODE_KEYWORDS: [&str; 5] = ["def ", "class ", "function", "import", "return"];
const SHORT_CHUNK_CHARS: usize = 600;

/// Narrows the fused candidates down to the context passed to generation,
/// using the rerank model.
pub struct ContextRerankTask {
    model: Arc<dyn LanguageModel>,
    top_k: usize,
}

impl ContextRerankTask {
    pub fn new(model: Arc<dyn LanguageModel>, top_k: usize) -> Self {
        Self { model, top_k }
    }

    /// Returns at most `top_k` chunks. Falls back to fusion order when the
    /// model fails or selects nothing usable.
    #[instrument(skip_all, fields(candidates = fused.len()))]
    pub async fn run(&self, question: &str, fused: &[FusedResult]) -> Vec<Arc<Chunk>> {
        if fused.is_empty() {
            info!("nothing to rerank");
            return Vec::new();
        }

        let prompt = self.prompt(question, fused);
        let selected = match self.model.complete(&prompt, ResponseFormat::Json).await {
            Ok(response) => {
                debug!(%response, "rerank response");
                parse_selection(&response, fused, self.top_k)
            }
            Err(e) => {
                warn!(error = %e, "rerank failed, keeping fusion order");
                Vec::new()
            }
        };

        if selected.is_empty() {
            warn!("no usable rerank selection, keeping fusion order");
            return fused
                .iter()
                .take(self.top_k)
                .map(|f| f.chunk.clone())
                .collect();
        }

        info!(selected = ?selected, "context reranked");
        selected.into_iter().map(|i| fused[i].chunk.clone()).collect()
    }

    fn prompt(&self, question: &str, fused: &[FusedResult]) -> String {
        let chunks: String = fused
            .iter()
            .enumerate()
            .map(|(i, f)| format!("[{i}] {}\n\n", excerpt(&f.chunk.content)))
            .collect();
        let top_k = self.top_k.to_string();
        fill_template(
            RERANK_PROMPT,
            &[("top_k", &top_k), ("question", question), ("chunks", &chunks)],
        )
    }
}

/// Maps the model's identifiers back to positions in `fused`.
///
/// Identifiers may be `[i]` labels (as numbers, numeric strings or `"[i]"`)
/// or literal chunk ids. Unknown and repeated identifiers are dropped.
fn parse_selection(response: &str, fused: &[FusedResult], top_k: usize) -> Vec<usize> {
    let Some(items) = parse_json_list(response, "selected_ids") else {
        return Vec::new();
    };

    let mut seen = HashSet::new();
    items
        .iter()
        .filter_map(|item| resolve(item, fused))
        .filter(|i| seen.insert(*i))
        .take(top_k)
        .collect()
}

fn resolve(item: &Value, fused: &[FusedResult]) -> Option<usize> {
    let index = match item {
        Value::Number(n) => n.as_u64().and_then(|n| usize::try_from(n).ok())?,
        Value::String(s) => {
            let s = s.trim();
            let label = s.trim_start_matches('[').trim_end_matches(']');
            match label.parse::<usize>() {
                Ok(i) => i,
                Err(_) => return fused.iter().position(|f| f.chunk.id == s),
            }
        }
        _ => return None,
    };
    (index < fused.len()).then_some(index)
}

/// One-line view of a chunk for the rerank prompt, cut to a head and a tail
/// sized by what the text looks like.
pub fn excerpt(content: &str) -> String {
    let text = content.replace('\n', " ");
    let lower = text.to_lowercase();
    let len = text.chars().count();

    let keep = if contains_any(&lower, &TABLE_KEYWORDS) {
        600
    } else if contains_any(&lower, &LIST_KEYWORDS) || contains_any(&lower, &CODE_KEYWORDS) {
        500
    } else if len < SHORT_CHUNK_CHARS {
        return text;
    } else {
        400
    };

    if len <= keep * 2 {
        return text;
    }
    let head: String = text.chars().take(keep).collect();
    let tail: String = text.chars().skip(len - keep).collect();
    format!("{head} ... {tail}")
}

fn contains_any(text: &str, keywords: &[&str]) -> bool {
    keywords.iter().any(|k| text.contains(k))
}
