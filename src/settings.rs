// src/settings.rs

use std::{
    net::SocketAddr,
    path::{Path, PathBuf},
    time::Duration,
};

use clap::{Parser, Subcommand};
use config::{builder::DefaultState, ConfigBuilder, ConfigError, Environment, File};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};

const DEFAULT_ADDR: &str = "127.0.0.1:8000";
const DEFAULT_CACHE_DIR: &str = "data/cache";

#[derive(Parser, Debug)]
#[command(version)]
pub struct Args {
    /// Path to the local configuration TOML file.
    #[arg(short, value_name = "CONFIG_PATH")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Answer a single question and print it with its sources.
    Ask {
        /// The question to answer.
        question: String,
    },
    /// Serve the GraphQL endpoint.
    Serve,
    /// Remove every cached answer.
    ClearCache,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Web {
    #[serde(deserialize_with = "deserialize_socket_addr")]
    pub address: SocketAddr,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmSettings {
    pub host: String,
    pub port: u16,
    pub response_model: String,
    pub rerank_model: String,
    pub timeout_secs: u64,
    pub max_retries: u32,
    pub retry_backoff_ms: u64,
}

impl LlmSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexSettings {
    pub qdrant_url: String,
    pub collection: String,
    pub embedding_model: String,
    /// Prepended to every semantic query before embedding, e.g. `"query: "` for E5 models.
    pub query_prefix: String,
    pub keyword_index_dir: PathBuf,
    pub search_timeout_secs: u64,
}

impl IndexSettings {
    pub fn search_timeout(&self) -> Duration {
        Duration::from_secs(self.search_timeout_secs)
    }
}

/// Widths and constants of the retrieval-fusion-rerank stages.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RetrievalSettings {
    pub k_per_retriever: usize,
    pub include_original_question: bool,
    pub rrf_k: u32,
    pub top_k_fusion: usize,
    pub top_k_final: usize,
}

impl Default for RetrievalSettings {
    fn default() -> Self {
        Self {
            k_per_retriever: 10,
            include_original_question: false,
            rrf_k: 60,
            top_k_fusion: 15,
            top_k_final: 5,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageSettings {
    pub cache_path: PathBuf,
    pub log_dir: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    pub web: Web,
    pub llm: LlmSettings,
    pub index: IndexSettings,
    pub retrieval: RetrievalSettings,
    pub storage: StorageSettings,
}

impl Settings {
    /// Load settings from the given TOML file (if any) and `RAG__*` environment
    /// variables, with sane defaults.
    pub fn from_file(path: Option<&Path>) -> Result<Self, ConfigError> {
        let retrieval = RetrievalSettings::default();
        let mut builder = ConfigBuilder::<DefaultState>::default()
            .set_default("web.address", DEFAULT_ADDR)?
            .set_default("llm.host", "http://127.0.0.1")?
            .set_default("llm.port", 11434)?
            .set_default("llm.response_model", "gpt-oss:20b")?
            .set_default("llm.rerank_model", "llama3.1:8b")?
            .set_default("llm.timeout_secs", 120)?
            .set_default("llm.max_retries", 2)?
            .set_default("llm.retry_backoff_ms", 500)?
            .set_default("index.qdrant_url", "http://localhost:6334")?
            .set_default("index.collection", "rag_demo")?
            .set_default("index.embedding_model", "nomic-embed-text")?
            .set_default("index.query_prefix", "")?
            .set_default("index.keyword_index_dir", "data/keyword_index")?
            .set_default("index.search_timeout_secs", 10)?
            .set_default("retrieval.k_per_retriever", to_i64(retrieval.k_per_retriever))?
            .set_default(
                "retrieval.include_original_question",
                retrieval.include_original_question,
            )?
            .set_default("retrieval.rrf_k", i64::from(retrieval.rrf_k))?
            .set_default("retrieval.top_k_fusion", to_i64(retrieval.top_k_fusion))?
            .set_default("retrieval.top_k_final", to_i64(retrieval.top_k_final))?
            .set_default("storage.cache_path", default_cache_path())?
            .set_default("storage.log_dir", "logs")?;

        if let Some(path) = path {
            builder = builder.add_source(File::from(path));
        }
        let cfg = builder
            .add_source(Environment::with_prefix("RAG").separator("__"))
            .build()?;

        let settings: Settings = cfg.try_deserialize()?;
        settings.validate()?;
        Ok(settings)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let r = &self.retrieval;
        if r.k_per_retriever == 0 || r.top_k_fusion == 0 || r.top_k_final == 0 {
            return Err(ConfigError::Message(
                "retrieval widths (k_per_retriever, top_k_fusion, top_k_final) must be positive"
                    .to_string(),
            ));
        }
        Ok(())
    }
}

fn default_cache_path() -> String {
    ProjectDirs::from("", "", "rag-fusion-server").map_or_else(
        || DEFAULT_CACHE_DIR.to_string(),
        |dirs| dirs.data_dir().join("cache").to_string_lossy().into_owned(),
    )
}

fn to_i64(value: usize) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

fn deserialize_socket_addr<'de, D>(deserializer: D) -> Result<SocketAddr, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let s = String::deserialize(deserializer)?;
    s.parse().map_err(serde::de::Error::custom)
}
