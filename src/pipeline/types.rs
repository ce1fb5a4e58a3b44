use std::{fmt, sync::Arc};

use serde::{Deserialize, Serialize};

use crate::index::{Chunk, ChunkMetadata, RetrieverKind};

/// Identifies one retriever output list: which query variant, which modality.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RetrievalKey {
    pub variant: usize,
    pub kind: RetrieverKind,
}

/// A chunk as ranked by a single retriever call. `rank` is 1-based.
#[derive(Debug, Clone)]
pub struct RankedResult {
    pub chunk: Arc<Chunk>,
    pub score: f32,
    pub rank: usize,
}

/// One list's share of a fused score.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Contribution {
    pub key: RetrievalKey,
    pub rank: usize,
}

#[derive(Debug, Clone)]
pub struct FusedResult {
    pub chunk: Arc<Chunk>,
    pub score: f64,
    pub contributions: Vec<Contribution>,
}

/// Source reference attached to an answer.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Citation {
    pub document: String,
    pub page: u64,
    pub chunk_index: u64,
}

impl From<&ChunkMetadata> for Citation {
    fn from(metadata: &ChunkMetadata) -> Self {
        Self {
            document: metadata.source.clone(),
            page: metadata.page,
            chunk_index: metadata.chunk_index,
        }
    }
}

impl fmt::Display for Citation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}, page {}, chunk {}",
            self.document, self.page, self.chunk_index
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Answer {
    pub text: String,
    pub citations: Vec<Citation>,
}

impl Answer {
    /// Plain-text answer followed by a `Sources:` block, one citation per line.
    pub fn render(&self) -> String {
        let mut out = self.text.clone();
        if !self.citations.is_empty() {
            out.push_str("\n\nSources:\n");
            let lines: Vec<String> = self.citations.iter().map(ToString::to_string).collect();
            out.push_str(&lines.join("\n"));
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn render_with_and_without_sources() {
        let answer = Answer {
            text: "BLEU is 28.4.".to_string(),
            citations: vec![
                Citation {
                    document: "attention.pdf".to_string(),
                    page: 8,
                    chunk_index: 42,
                },
                Citation {
                    document: "attention.pdf".to_string(),
                    page: 9,
                    chunk_index: 44,
                },
            ],
        };
        assert_eq!(
            answer.render(),
            "BLEU is 28.4.\n\nSources:\nattention.pdf, page 8, chunk 42\nattention.pdf, page 9, chunk 44"
        );

        let bare = Answer {
            text: "nothing".to_string(),
            citations: vec![],
        };
        assert_eq!(bare.render(), "nothing");
    }
}
