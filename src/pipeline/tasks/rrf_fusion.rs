//! Reciprocal Rank Fusion: score = Σ 1/(k + rank_i)
//!
//! Merges the semantic and keyword lists of every query variant into one
//! ranking without normalizing scores across retrievers.

use std::collections::{hash_map::Entry, BTreeMap, HashMap};

use tracing::{info, instrument};

use crate::pipeline::types::{Contribution, FusedResult, RankedResult, RetrievalKey};

/// Fuses ranked lists and keeps the best `top_k`.
///
/// Ties on score go to the chunk found by more lists, then to the smaller
/// chunk id. Lists are visited in key order, so the same input always yields
/// the same floating-point sums.
#[instrument(skip_all, fields(lists = retrieved.len()))]
pub fn fuse(
    retrieved: &BTreeMap<RetrievalKey, Vec<RankedResult>>,
    k_rrf: u32,
    top_k: usize,
) -> Vec<FusedResult> {
    let mut fused: HashMap<&str, FusedResult> = HashMap::new();

    for (key, list) in retrieved {
        // A chunk listed twice by one retriever only counts its best rank.
        let mut best: HashMap<&str, &RankedResult> = HashMap::new();
        for result in list {
            best.entry(result.chunk.id.as_str())
                .and_modify(|current| {
                    if result.rank < current.rank {
                        *current = result;
                    }
                })
                .or_insert(result);
        }

        for (id, result) in best {
            let rrf = 1.0 / (f64::from(k_rrf) + result.rank as f64);
            let contribution = Contribution {
                key: *key,
                rank: result.rank,
            };
            match fused.entry(id) {
                Entry::Occupied(mut entry) => {
                    let entry = entry.get_mut();
                    entry.score += rrf;
                    entry.contributions.push(contribution);
                }
                Entry::Vacant(entry) => {
                    entry.insert(FusedResult {
                        chunk: result.chunk.clone(),
                        score: rrf,
                        contributions: vec![contribution],
                    });
                }
            }
        }
    }

    let candidates = fused.len();
    let mut fused: Vec<FusedResult> = fused.into_values().collect();
    fused.sort_by(|a, b| {
        b.score
            .total_cmp(&a.score)
            .then_with(|| b.contributions.len().cmp(&a.contributions.len()))
            .then_with(|| a.chunk.id.cmp(&b.chunk.id))
    });
    fused.truncate(top_k);

    info!(candidates, kept = fused.len(), "fusion finished");
    fused
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::index::{Chunk, RetrieverKind};

    fn key(variant: usize, kind: RetrieverKind) -> RetrievalKey {
        RetrievalKey { variant, kind }
    }

    fn list(ids: &[&str]) -> Vec<RankedResult> {
        ids.iter()
            .enumerate()
            .map(|(i, id)| RankedResult {
                chunk: Arc::new(Chunk::new(id, 1, 0, id)),
                score: 1.0,
                rank: i + 1,
            })
            .collect()
    }

    fn ids(fused: &[FusedResult]) -> Vec<String> {
        fused.iter().map(|f| f.chunk.metadata.source.clone()).collect()
    }

    #[test]
    fn accumulates_across_lists() {
        let mut retrieved = BTreeMap::new();
        retrieved.insert(key(0, RetrieverKind::Semantic), list(&["a", "b", "c"]));
        retrieved.insert(key(0, RetrieverKind::Keyword), list(&["b"]));

        let fused = fuse(&retrieved, 60, 15);

        assert_eq!(ids(&fused), vec!["b", "a", "c"]);
        let b = &fused[0];
        assert!((b.score - (1.0 / 62.0 + 1.0 / 61.0)).abs() < 1e-12);
        assert_eq!(b.contributions.len(), 2);
    }

    #[test]
    fn chunk_ids_from_different_lists_merge() {
        let chunk = Chunk::new("attention.pdf", 8, 42, "BLEU 28.4");
        let ranked = |rank| RankedResult {
            chunk: Arc::new(chunk.clone()),
            score: 0.5,
            rank,
        };
        let mut retrieved = BTreeMap::new();
        retrieved.insert(key(0, RetrieverKind::Semantic), vec![ranked(1)]);
        retrieved.insert(key(1, RetrieverKind::Keyword), vec![ranked(3)]);

        let fused = fuse(&retrieved, 60, 15);

        assert_eq!(fused.len(), 1);
        assert_eq!(fused[0].chunk.id, "attention.pdf, page 8, chunk 42");
        assert!((fused[0].score - (1.0 / 61.0 + 1.0 / 63.0)).abs() < 1e-12);
    }

    #[test]
    fn repeated_chunk_in_one_list_counts_best_rank() {
        let mut retrieved = BTreeMap::new();
        let mut dup = list(&["a", "b"]);
        dup.push(RankedResult {
            chunk: dup[0].chunk.clone(),
            score: 0.1,
            rank: 3,
        });
        retrieved.insert(key(0, RetrieverKind::Semantic), dup);

        let fused = fuse(&retrieved, 60, 15);

        assert_eq!(fused.len(), 2);
        assert_eq!(fused[0].score, 1.0 / 61.0);
        assert_eq!(fused[0].contributions.len(), 1);
    }

    #[test]
    fn more_lists_win_exact_score_ties() {
        // 1/(60+1) == 2/(60+62) exactly in f64.
        let fillers: Vec<String> = (0..61).map(|i| format!("filler{i:02}")).collect();
        let mut deep: Vec<&str> = fillers.iter().map(String::as_str).collect();
        deep.push("deep");
        assert_eq!(deep.len(), 62);

        let mut retrieved = BTreeMap::new();
        retrieved.insert(key(0, RetrieverKind::Semantic), list(&["alone"]));
        retrieved.insert(key(1, RetrieverKind::Semantic), list(&deep));
        retrieved.insert(key(1, RetrieverKind::Keyword), list(&deep));

        let fused = fuse(&retrieved, 60, 200);

        let alone = fused.iter().position(|f| f.chunk.metadata.source == "alone").unwrap();
        let deep = fused.iter().position(|f| f.chunk.metadata.source == "deep").unwrap();
        assert_eq!(fused[alone].score, fused[deep].score);
        assert!(deep < alone);
    }

    #[test]
    fn equal_score_and_support_falls_back_to_id() {
        let mut retrieved = BTreeMap::new();
        retrieved.insert(key(0, RetrieverKind::Semantic), list(&["zeta"]));
        retrieved.insert(key(0, RetrieverKind::Keyword), list(&["alpha"]));

        let fused = fuse(&retrieved, 60, 15);

        assert_eq!(ids(&fused), vec!["alpha", "zeta"]);
    }

    #[test]
    fn deterministic_and_bounded() {
        let mut retrieved = BTreeMap::new();
        for variant in 0..3 {
            let names: Vec<String> = (0..10)
                .map(|i| format!("doc{}", (i * 7 + variant) % 13))
                .collect();
            let names: Vec<&str> = names.iter().map(String::as_str).collect();
            retrieved.insert(key(variant, RetrieverKind::Semantic), list(&names));
            retrieved.insert(key(variant, RetrieverKind::Keyword), list(&names[3..]));
        }

        let first = fuse(&retrieved, 60, 5);
        let second = fuse(&retrieved, 60, 5);

        assert_eq!(first.len(), 5);
        assert_eq!(ids(&first), ids(&second));
        let scores: Vec<f64> = first.iter().map(|f| f.score).collect();
        assert_eq!(scores, second.iter().map(|f| f.score).collect::<Vec<_>>());
        assert!(scores.windows(2).all(|w| w[0] >= w[1]));
    }

    #[test]
    fn empty_input_fuses_to_nothing() {
        let mut retrieved = BTreeMap::new();
        retrieved.insert(key(0, RetrieverKind::Semantic), Vec::new());
        assert!(fuse(&retrieved, 60, 15).is_empty());
        assert!(fuse(&BTreeMap::new(), 60, 15).is_empty());
    }
}
