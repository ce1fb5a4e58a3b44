//! Daily JSONL logs of every question execution, meant for offline analysis.
//!
//! `qa_log_YYYYMMDD.jsonl` gets one record per answered question (cached or
//! not); `error_log_YYYYMMDD.jsonl` gets one record per failed execution.

use std::{
    fs::{self, OpenOptions},
    io::Write,
    path::{Path, PathBuf},
    sync::{Arc, Mutex},
};

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::pipeline::types::Citation;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggedChunk {
    pub chunk_id: String,
    pub content: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionRecord {
    pub timestamp: DateTime<Utc>,
    pub request_id: String,
    pub question: String,
    pub cache_hit: bool,
    pub rewritten_queries: Vec<String>,
    pub answer: String,
    pub citations: Vec<Citation>,
    pub reranked_context: Vec<LoggedChunk>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorRecord {
    pub timestamp: DateTime<Utc>,
    pub request_id: String,
    pub question: String,
    pub error_message: String,
}

#[derive(Clone)]
pub struct SessionLog {
    dir: PathBuf,
    write_lock: Arc<Mutex<()>>,
}

impl SessionLog {
    pub fn new(dir: &Path) -> Self {
        Self {
            dir: dir.to_path_buf(),
            write_lock: Arc::new(Mutex::new(())),
        }
    }

    pub fn qa_log_path(&self, at: DateTime<Utc>) -> PathBuf {
        self.dir
            .join(format!("qa_log_{}.jsonl", at.format("%Y%m%d")))
    }

    pub fn error_log_path(&self, at: DateTime<Utc>) -> PathBuf {
        self.dir
            .join(format!("error_log_{}.jsonl", at.format("%Y%m%d")))
    }

    /// Appends a session record. Failures are logged and swallowed.
    pub async fn record_session(&self, record: &SessionRecord) {
        let path = self.qa_log_path(record.timestamp);
        if let Err(e) = self.append(&path, record).await {
            warn!(path = %path.display(), error = %e, "failed to write session log");
        }
    }

    /// Appends an error record. Failures are logged and swallowed.
    pub async fn record_error(&self, record: &ErrorRecord) {
        let path = self.error_log_path(record.timestamp);
        if let Err(e) = self.append(&path, record).await {
            warn!(path = %path.display(), error = %e, "failed to write error log");
        }
    }

    async fn append<T: Serialize>(&self, path: &Path, record: &T) -> Result<()> {
        let mut line = serde_json::to_string(record)?;
        line.push('\n');

        let dir = self.dir.clone();
        let path = path.to_path_buf();
        let write_lock = Arc::clone(&self.write_lock);
        tokio::task::spawn_blocking(move || -> Result<()> {
            let _guard = write_lock
                .lock()
                .map_err(|_| anyhow!("session log lock poisoned"))?;
            fs::create_dir_all(&dir)
                .with_context(|| format!("cannot create {}", dir.display()))?;
            let mut file = OpenOptions::new().create(true).append(true).open(&path)?;
            file.write_all(line.as_bytes())?;
            Ok(())
        })
        .await
        .context("session log task panicked")?
    }
}
