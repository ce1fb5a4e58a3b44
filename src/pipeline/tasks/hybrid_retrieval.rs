use std::{collections::BTreeMap, sync::Arc, time::Duration};

use futures::future::join_all;
use tokio::time::timeout;
use tracing::{debug, info, instrument, warn};

use crate::{
    index::{DocumentIndex, RetrieverKind, SearchHit},
    pipeline::types::{RankedResult, RetrievalKey},
};

/// Fans every query variant out to both retrieval modalities.
pub struct HybridRetrievalTask {
    index: Arc<dyn DocumentIndex>,
    k_per_retriever: usize,
    search_timeout: Duration,
}

impl HybridRetrievalTask {
    pub fn new(
        index: Arc<dyn DocumentIndex>,
        k_per_retriever: usize,
        search_timeout: Duration,
    ) -> Self {
        Self {
            index,
            k_per_retriever,
            search_timeout,
        }
    }

    /// Runs one semantic and one keyword search per variant concurrently and
    /// waits for all of them. Every key is present in the result; failed or
    /// timed-out calls map to an empty list.
    #[instrument(skip_all, fields(variants = variants.len()))]
    pub async fn run(&self, variants: &[String]) -> BTreeMap<RetrievalKey, Vec<RankedResult>> {
        let calls = variants.iter().enumerate().flat_map(|(variant, query)| {
            [RetrieverKind::Semantic, RetrieverKind::Keyword]
                .into_iter()
                .map(move |kind| self.search(RetrievalKey { variant, kind }, query))
        });
        let retrieved: BTreeMap<_, _> = join_all(calls).await.into_iter().collect();

        let total: usize = retrieved.values().map(Vec::len).sum();
        info!(lists = retrieved.len(), total, "retrieval finished");
        retrieved
    }

    async fn search(&self, key: RetrievalKey, query: &str) -> (RetrievalKey, Vec<RankedResult>) {
        let k = self.k_per_retriever;
        let call = async {
            match key.kind {
                RetrieverKind::Semantic => self.index.semantic_search(query, k).await,
                RetrieverKind::Keyword => self.index.keyword_search(query, k).await,
            }
        };

        let ranked = match timeout(self.search_timeout, call).await {
            Ok(Ok(hits)) => {
                let ranked = rank(hits, k);
                debug!(
                    variant = key.variant,
                    kind = %key.kind,
                    hits = ranked.len(),
                    top_score = ranked.first().map(|r| r.score),
                    "retriever finished"
                );
                ranked
            }
            Ok(Err(e)) => {
                warn!(variant = key.variant, kind = %key.kind, error = %e, "retriever failed");
                Vec::new()
            }
            Err(_) => {
                warn!(variant = key.variant, kind = %key.kind, "retriever timed out");
                Vec::new()
            }
        };
        (key, ranked)
    }
}

fn rank(hits: Vec<SearchHit>, k: usize) -> Vec<RankedResult> {
    hits.into_iter()
        .take(k)
        .enumerate()
        .map(|(i, hit)| RankedResult {
            chunk: Arc::new(hit.chunk),
            score: hit.score,
            rank: i + 1,
        })
        .collect()
}
