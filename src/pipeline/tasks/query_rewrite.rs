use std::{collections::HashSet, sync::Arc};

use serde_json::Value;
use tracing::{debug, info, instrument, warn};

use crate::{
    database::normalize_question,
    llm::{LanguageModel, ResponseFormat},
    pipeline::utils::{fill_template, parse_json_list},
};

pub const VARIANT_COUNT: usize = 3;

const REWRITE_PROMPT: &str = r#"You are a search query optimization expert for a retrieval system over PDF documents.

Rewrite the user's question into multiple search queries that will retrieve the passages needed to answer it.

Constraints:
- Generate EXACTLY 3 rewritten queries.
- Every query must keep the core entity, paper title or subject named in the question.
- Do not generalize to related topics or broader fields.
- Do not answer the question and do not explain.

Strategy:
1. A precise factual query targeting the requested information.
2. A complete natural-language question.
3. An alternative phrasing with different wording and the same meaning.

User question:
{question}

Respond with JSON only, in this format:
{"queries": ["rewritten query 1", "rewritten query 2", "rewritten query 3"]}"#;

/// Turns a question into search query variants using the response model.
pub struct QueryRewriteTask {
    model: Arc<dyn LanguageModel>,
}

impl QueryRewriteTask {
    pub fn new(model: Arc<dyn LanguageModel>) -> Self {
        Self { model }
    }

    /// Always returns exactly [`VARIANT_COUNT`] queries. A failed or malformed
    /// rewrite falls back to the question itself, repeated.
    #[instrument(skip_all)]
    pub async fn run(&self, question: &str) -> Vec<String> {
        let prompt = fill_template(REWRITE_PROMPT, &[("question", question)]);
        let response = match self.model.complete(&prompt, ResponseFormat::Json).await {
            Ok(response) => response,
            Err(e) => {
                warn!(error = %e, "query rewrite failed, using original question");
                return fallback(question);
            }
        };
        debug!(%response, "query rewrite response");

        match parse_queries(&response) {
            Some(queries) => {
                info!(?queries, "question rewritten");
                queries
            }
            None => {
                warn!(%response, "malformed query rewrite, using original question");
                fallback(question)
            }
        }
    }
}

fn fallback(question: &str) -> Vec<String> {
    vec![question.to_string(); VARIANT_COUNT]
}

/// Accepts exactly [`VARIANT_COUNT`] non-empty strings that stay distinct
/// after normalization.
fn parse_queries(response: &str) -> Option<Vec<String>> {
    let items = parse_json_list(response, "queries")?;
    if items.len() != VARIANT_COUNT {
        return None;
    }

    let mut seen = HashSet::new();
    let mut queries = Vec::with_capacity(VARIANT_COUNT);
    for item in items {
        let Value::String(text) = item else {
            return None;
        };
        let text = text.trim();
        if text.is_empty() || !seen.insert(normalize_question(text)) {
            return None;
        }
        queries.push(text.to_string());
    }
    Some(queries)
}
