use std::path::Path;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sled::{Db, Tree};

use crate::pipeline::types::Citation;

const CACHE_TREE: &str = "answers";
const KEY_SEPARATOR: u8 = 0;

/// One cached pipeline execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheRecord {
    pub question: String,
    pub rewritten_queries: Vec<String>,
    pub answer: String,
    pub citations: Vec<Citation>,
    /// Chunk ids of the reranked context, in reranked order.
    pub reranked_refs: Vec<String>,
    pub timestamp: DateTime<Utc>,
}

/// Canonical cache key: case-folded, whitespace-collapsed, trimmed.
///
/// Control characters are dropped so the key separator can never appear
/// inside a question.
pub fn normalize_question(question: &str) -> String {
    question
        .split_whitespace()
        .map(|word| {
            word.chars()
                .filter(|c| !c.is_control())
                .collect::<String>()
                .to_lowercase()
        })
        .filter(|word| !word.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Append-only answer cache backed by sled.
///
/// Every store appends a new record under `normalized ‖ 0x00 ‖ id`, where `id`
/// is sled's monotonic id, so the newest record of a prefix wins.
#[derive(Clone)]
pub struct Database {
    db: Db,
    tree: Tree,
}

impl Database {
    fn connect_db(path: &Path) -> Result<Db> {
        Ok(sled::open(path)?)
    }

    fn connect_tree(db: &Db, t_name: &str) -> Result<Tree> {
        Ok(db.open_tree(t_name)?)
    }

    pub fn connect(path: &Path) -> Result<Database> {
        let db = Database::connect_db(path)
            .with_context(|| format!("failed to open cache at {}", path.display()))?;
        let tree = Database::connect_tree(&db, CACHE_TREE)?;
        Ok(Database { db, tree })
    }

    fn prefix(normalized: &str) -> Vec<u8> {
        let mut key = normalized.as_bytes().to_vec();
        key.push(KEY_SEPARATOR);
        key
    }

    /// Returns the newest record stored for `question`, if any.
    pub fn lookup(&self, question: &str) -> Result<Option<CacheRecord>> {
        let prefix = Database::prefix(&normalize_question(question));
        match self.tree.scan_prefix(prefix).next_back() {
            Some(entry) => {
                let (_, val) = entry?;
                let record: CacheRecord =
                    bincode::deserialize(&val).context("corrupt cache record")?;
                Ok(Some(record))
            }
            None => Ok(None),
        }
    }

    pub fn store(
        &self,
        question: &str,
        rewritten_queries: &[String],
        answer: &str,
        citations: &[Citation],
        reranked_refs: &[String],
    ) -> Result<CacheRecord> {
        let normalized = normalize_question(question);
        let record = CacheRecord {
            question: normalized.clone(),
            rewritten_queries: rewritten_queries.to_vec(),
            answer: answer.to_string(),
            citations: citations.to_vec(),
            reranked_refs: reranked_refs.to_vec(),
            timestamp: Utc::now(),
        };

        let mut key = Database::prefix(&normalized);
        key.extend_from_slice(&self.db.generate_id()?.to_be_bytes());
        self.tree.insert(key, bincode::serialize(&record)?)?;
        Ok(record)
    }

    /// Writes raw bytes under `question` and `id`, bypassing encoding.
    #[cfg(test)]
    pub(crate) fn insert_raw(&self, question: &str, id: u64, value: &[u8]) -> Result<()> {
        let mut key = Database::prefix(&normalize_question(question));
        key.extend_from_slice(&id.to_be_bytes());
        self.tree.insert(key, value)?;
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.tree.len()
    }

    pub fn clear(&self) -> Result<()> {
        self.tree.clear()?;
        self.tree.flush()?;
        Ok(())
    }
}
