use std::{collections::HashSet, sync::Arc};

use anyhow::{Context, Result};
use serde_json::Value;
use tracing::{debug, info, instrument, warn};

use crate::{
    index::Chunk,
    llm::{LanguageModel, ResponseFormat},
    pipeline::{
        types::{Answer, Citation},
        utils::{extract_json_object_from_response, fill_template},
    },
};

pub const NO_CONTEXT_ANSWER: &str = "There is no relevant content in the PDFs you uploaded.";

const GENERATE_PROMPT: &str = r#"You are answering questions using ONLY the retrieved context below.

Write a concise factual answer of 3 to 5 sentences.
- Use only facts stated in the context. Do not use outside knowledge.
- Do not include source identifiers in the answer text.
- When listing several items from the same source (authors, parameters, components), group them in one sentence.
- If a calculation is needed, state the formula and the values used.
- If the context does not contain the answer, reply with exactly: "There is no relevant content in the PDFs you uploaded."

Question: {question}

Context:
{context}
Respond with JSON only, in this format:
{"answer": "your answer"}"#;

/// Writes the final answer from the reranked context.
pub struct AnswerGenerationTask {
    model: Arc<dyn LanguageModel>,
}

impl AnswerGenerationTask {
    pub fn new(model: Arc<dyn LanguageModel>) -> Self {
        Self { model }
    }

    /// Citations always come from `chunks`, never from the model reply. An
    /// empty context is answered without calling the model.
    ///
    /// # Errors
    ///
    /// Returns an error if the response model cannot be reached.
    #[instrument(skip_all, fields(chunks = chunks.len()))]
    pub async fn run(&self, question: &str, chunks: &[Arc<Chunk>]) -> Result<Answer> {
        if chunks.is_empty() {
            info!("empty context, answering without generation");
            return Ok(Answer {
                text: NO_CONTEXT_ANSWER.to_string(),
                citations: Vec::new(),
            });
        }

        let context: String = chunks
            .iter()
            .map(|chunk| format!("[Source: {}]\n{}\n\n---\n\n", chunk.id, chunk.content.trim()))
            .collect();
        let prompt = fill_template(
            GENERATE_PROMPT,
            &[("question", question), ("context", &context)],
        );

        let response = self
            .model
            .complete(&prompt, ResponseFormat::Json)
            .await
            .context("answer generation failed")?;
        debug!(%response, "generation response");

        let text = answer_text(&response).unwrap_or_else(|| {
            warn!("empty generation response");
            NO_CONTEXT_ANSWER.to_string()
        });
        Ok(Answer {
            text,
            citations: citations(chunks),
        })
    }
}

/// The `answer` field of a JSON reply, or the whole reply when it is not
/// JSON. `None` when there is nothing to show.
fn answer_text(response: &str) -> Option<String> {
    let text = match serde_json::from_str::<Value>(extract_json_object_from_response(response)) {
        Ok(Value::Object(obj)) => match obj.get("answer") {
            Some(Value::String(answer)) => answer.trim().to_string(),
            _ => String::new(),
        },
        _ => response.trim().to_string(),
    };
    (!text.is_empty()).then_some(text)
}

fn citations(chunks: &[Arc<Chunk>]) -> Vec<Citation> {
    let mut seen = HashSet::new();
    chunks
        .iter()
        .map(|chunk| Citation::from(&chunk.metadata))
        .filter(|citation| seen.insert(citation.clone()))
        .collect()
}
