pub mod answer_generation;
pub mod context_reranking;
pub mod hybrid_retrieval;
pub mod query_rewrite;
pub mod rrf_fusion;

pub use answer_generation::{AnswerGenerationTask, NO_CONTEXT_ANSWER};
pub use context_reranking::ContextRerankTask;
pub use hybrid_retrieval::HybridRetrievalTask;
pub use query_rewrite::QueryRewriteTask;
pub use rrf_fusion::fuse;
