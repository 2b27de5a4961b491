//! Weighted reciprocal rank fusion and near-duplicate removal.
//!
//! `fused(c) = Σ_o (w_o / W) · 1 / (rrf_k + rank_o(c))`, summed over the
//! origins whose list contains `c`. Raw scores never enter the formula; they
//! only break ties.

use std::cmp::Ordering;
use std::collections::{BTreeSet, HashMap, HashSet};
use tracing::{debug, warn};

use lexfuse_core::config::FusionConfig;
use lexfuse_core::error::Result;
use lexfuse_core::traits::PairSimilarity;
use lexfuse_core::types::{ChunkId, FusedResult, Origin, RetrievalHit};

/// The ranked output of one retriever for one query.
#[derive(Debug, Clone, PartialEq)]
pub struct RankedList {
    pub origin: Origin,
    pub hits: Vec<RetrievalHit>,
}

impl RankedList {
    pub fn new(origin: Origin, hits: Vec<RetrievalHit>) -> Self {
        Self { origin, hits }
    }
}

struct Accumulator {
    score: f32,
    origins: BTreeSet<Origin>,
    best_raw: f32,
}

#[derive(Debug, Clone)]
pub struct ScoreFuser {
    config: FusionConfig,
}

impl ScoreFuser {
    pub fn new(config: FusionConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &FusionConfig {
        &self.config
    }

    /// Combine any number of ranked lists into one ordering.
    ///
    /// A chunk listed twice by the same origin counts once, at its best rank.
    /// Lists that all come from one origin keep that retriever's order.
    pub fn fuse(&self, lists: &[RankedList]) -> Vec<FusedResult> {
        let mut origins = lists.iter().map(|l| l.origin);
        if let Some(first) = origins.next() {
            if origins.all(|o| o == first) {
                return self.pass_through(first, lists);
            }
        }

        let total = self.config.weights.total();
        let rrf_k = self.config.rrf_k;

        let mut best_rank: HashMap<(&str, Origin), &RetrievalHit> = HashMap::new();
        for list in lists {
            for hit in &list.hits {
                best_rank
                    .entry((hit.chunk_id.as_str(), list.origin))
                    .and_modify(|seen| {
                        if hit.rank < seen.rank {
                            *seen = hit;
                        }
                    })
                    .or_insert(hit);
            }
        }

        let mut acc: HashMap<&str, Accumulator> = HashMap::new();
        for ((chunk_id, origin), hit) in best_rank {
            let weight = self.config.weights.get(origin) / total;
            let entry = acc.entry(chunk_id).or_insert(Accumulator {
                score: 0.0,
                origins: BTreeSet::new(),
                best_raw: f32::NEG_INFINITY,
            });
            entry.score += weight / (rrf_k + hit.rank as f32);
            entry.origins.insert(origin);
            entry.best_raw = entry.best_raw.max(hit.raw_score);
        }

        let mut fused: Vec<FusedResult> = acc
            .into_iter()
            .map(|(chunk_id, a)| FusedResult {
                chunk_id: chunk_id.to_string(),
                fused_score: a.score,
                contributing_origins: a.origins,
                rank: 0,
                best_raw_score: a.best_raw,
            })
            .collect();
        fused.sort_by(compare_fused);
        renumber(&mut fused);
        debug!(lists = lists.len(), candidates = fused.len(), "fused ranked lists");
        fused
    }

    /// Order by rank alone; fused scores are still filled in from the formula.
    fn pass_through(&self, origin: Origin, lists: &[RankedList]) -> Vec<FusedResult> {
        let weight = self.config.weights.get(origin) / self.config.weights.total();
        let mut hits: Vec<&RetrievalHit> = lists.iter().flat_map(|l| &l.hits).collect();
        hits.sort_by_key(|h| h.rank);
        let mut seen = HashSet::new();
        let mut fused: Vec<FusedResult> = hits
            .into_iter()
            .filter(|h| seen.insert(h.chunk_id.as_str()))
            .map(|h| FusedResult {
                chunk_id: h.chunk_id.clone(),
                fused_score: weight / (self.config.rrf_k + h.rank as f32),
                contributing_origins: BTreeSet::from([origin]),
                rank: 0,
                best_raw_score: h.raw_score,
            })
            .collect();
        renumber(&mut fused);
        debug!(%origin, candidates = fused.len(), "single origin passed through fusion");
        fused
    }

    /// Drop near-duplicates using the configured threshold.
    pub fn deduplicate(&self, fused: Vec<FusedResult>, similarity: &dyn PairSimilarity) -> Vec<FusedResult> {
        deduplicate(fused, similarity, self.config.deduplication.threshold)
    }

    /// Fuse, deduplicate when possible, and keep the top `fusion.k`.
    pub fn fuse_and_dedup(&self, lists: &[RankedList], similarity: Option<&dyn PairSimilarity>) -> Vec<FusedResult> {
        let mut fused = self.fuse(lists);
        if self.config.deduplication.enabled {
            match similarity {
                Some(similarity) => fused = self.deduplicate(fused, similarity),
                None => warn!("deduplication enabled but no similarity source is available; skipping"),
            }
        }
        fused.truncate(self.config.k);
        fused
    }
}

/// Fused score desc, then more origins, then best raw score desc, then id.
fn compare_fused(x: &FusedResult, y: &FusedResult) -> Ordering {
    y.fused_score
        .total_cmp(&x.fused_score)
        .then_with(|| y.contributing_origins.len().cmp(&x.contributing_origins.len()))
        .then_with(|| y.best_raw_score.total_cmp(&x.best_raw_score))
        .then_with(|| x.chunk_id.cmp(&y.chunk_id))
}

fn renumber(results: &mut [FusedResult]) {
    for (i, r) in results.iter_mut().enumerate() {
        r.rank = i + 1;
    }
}

/// Walk `fused` in order and drop every candidate whose similarity to an
/// already kept candidate exceeds `threshold`.
///
/// Pairs the similarity source knows nothing about are never collapsed.
pub fn deduplicate(fused: Vec<FusedResult>, similarity: &dyn PairSimilarity, threshold: f32) -> Vec<FusedResult> {
    let before = fused.len();
    let mut kept: Vec<FusedResult> = Vec::with_capacity(before);
    for candidate in fused {
        let duplicate_of: Option<&ChunkId> = kept
            .iter()
            .map(|k| &k.chunk_id)
            .find(|k| similarity.similarity(k, &candidate.chunk_id).is_some_and(|s| s > threshold));
        match duplicate_of {
            Some(k) => debug!(dropped = %candidate.chunk_id, kept = %k, "near-duplicate removed"),
            None => kept.push(candidate),
        }
    }
    renumber(&mut kept);
    if kept.len() < before {
        debug!(before, after = kept.len(), threshold, "deduplicated fused candidates");
    }
    kept
}

#[cfg(test)]
mod tests {
    use super::*;
    use lexfuse_core::config::FusionWeights;
    use lexfuse_core::ErrorKind;

    fn hits(origin: Origin, ids: &[&str]) -> RankedList {
        RankedList::new(
            origin,
            ids.iter()
                .enumerate()
                .map(|(i, id)| RetrievalHit {
                    chunk_id: id.to_string(),
                    raw_score: 10.0 - i as f32,
                    rank: i + 1,
                    origin,
                })
                .collect(),
        )
    }

    fn fuser(bm25: f32, dense: f32) -> ScoreFuser {
        ScoreFuser::new(FusionConfig { weights: FusionWeights { bm25, dense }, ..FusionConfig::default() }).unwrap()
    }

    struct Table(Vec<(&'static str, &'static str, f32)>);

    impl PairSimilarity for Table {
        fn similarity(&self, a: &ChunkId, b: &ChunkId) -> Option<f32> {
            self.0
                .iter()
                .find(|(x, y, _)| (*x == a.as_str() && *y == b.as_str()) || (*x == b.as_str() && *y == a.as_str()))
                .map(|(_, _, s)| *s)
        }
    }

    #[test]
    fn chunk_in_both_lists_ranks_first() {
        let dense = hits(Origin::Dense, &["1", "2", "3"]);
        let sparse = hits(Origin::Sparse, &["3", "1", "4"]);
        let fused = fuser(0.5, 0.5).fuse(&[dense, sparse]);

        assert_eq!(fused.len(), 4);
        let top: Vec<_> = fused.iter().take(2).map(|r| r.chunk_id.as_str()).collect();
        assert!(top.contains(&"1") && top.contains(&"3"));
        assert_eq!(fused[0].contributing_origins.len(), 2);
        assert_eq!(fused.iter().map(|r| r.rank).collect::<Vec<_>>(), vec![1, 2, 3, 4]);
    }

    #[test]
    fn matches_the_weighted_formula() {
        let f = fuser(0.4, 0.6);
        let fused = f.fuse(&[hits(Origin::Sparse, &["a", "b"]), hits(Origin::Dense, &["b"])]);
        let b = fused.iter().find(|r| r.chunk_id == "b").unwrap();
        let expected = 0.4 / (60.0 + 2.0) + 0.6 / (60.0 + 1.0);
        assert!((b.fused_score - expected).abs() < 1e-6);
        let a = fused.iter().find(|r| r.chunk_id == "a").unwrap();
        assert!((a.fused_score - 0.4 / 61.0).abs() < 1e-6);
    }

    #[test]
    fn overlap_never_scores_below_a_single_origin() {
        let f = fuser(0.4, 0.6);
        let fused = f.fuse(&[hits(Origin::Sparse, &["x", "y"]), hits(Origin::Dense, &["y", "x"])]);
        let single_sparse = f.fuse(&[hits(Origin::Sparse, &["x", "y"])]);
        let single_dense = f.fuse(&[hits(Origin::Dense, &["y", "x"])]);
        for r in &fused {
            let s = single_sparse.iter().find(|o| o.chunk_id == r.chunk_id).unwrap();
            let d = single_dense.iter().find(|o| o.chunk_id == r.chunk_id).unwrap();
            assert!(r.fused_score >= s.fused_score && r.fused_score >= d.fused_score);
        }
    }

    #[test]
    fn fusion_is_deterministic_and_order_insensitive() {
        let f = fuser(0.4, 0.6);
        let sparse = hits(Origin::Sparse, &["a", "b", "c"]);
        let dense = hits(Origin::Dense, &["c", "d", "a"]);
        let one = f.fuse(&[sparse.clone(), dense.clone()]);
        let two = f.fuse(&[dense, sparse]);
        assert_eq!(one, two);
    }

    #[test]
    fn ties_fall_back_to_origin_count_raw_score_then_id() {
        let f = fuser(0.5, 0.5);
        // "b" and "a" both sit at rank 1 of one list each.
        let mut sparse = hits(Origin::Sparse, &["b"]);
        sparse.hits[0].raw_score = 3.0;
        let mut dense = hits(Origin::Dense, &["a"]);
        dense.hits[0].raw_score = 0.5;
        let fused = f.fuse(&[sparse, dense]);
        assert_eq!(fused[0].chunk_id, "b", "higher raw score wins the tie");

        let fused = f.fuse(&[hits(Origin::Sparse, &["z"]), hits(Origin::Dense, &["m"])]);
        assert_eq!(fused[0].chunk_id, "m", "equal raw scores order by id");
    }

    #[test]
    fn single_list_is_passed_through() {
        let sparse = hits(Origin::Sparse, &["c", "a", "b"]);
        let fused = fuser(0.4, 0.6).fuse(std::slice::from_ref(&sparse));
        let ids: Vec<_> = fused.iter().map(|r| r.chunk_id.clone()).collect();
        assert_eq!(ids, vec!["c", "a", "b"]);
    }

    #[test]
    fn zero_weight_origin_keeps_its_own_order() {
        // Identical text: the retriever ordered these by insertion, not by id.
        let mut sparse = hits(Origin::Sparse, &["z:0", "a:0", "m:0"]);
        for hit in &mut sparse.hits {
            hit.raw_score = 2.5;
        }
        let fused = fuser(0.0, 1.0).fuse(&[sparse]);
        let ids: Vec<_> = fused.iter().map(|r| r.chunk_id.as_str()).collect();
        assert_eq!(ids, vec!["z:0", "a:0", "m:0"]);
        assert!(fused.iter().all(|r| r.fused_score == 0.0));
        assert_eq!(fused.iter().map(|r| r.rank).collect::<Vec<_>>(), vec![1, 2, 3]);
    }

    #[test]
    fn duplicate_hits_count_once_at_their_best_rank() {
        let mut sparse = hits(Origin::Sparse, &["a", "b", "a"]);
        sparse.hits[2].rank = 3;
        let fused = fuser(1.0, 1.0).fuse(&[sparse]);
        let a = fused.iter().find(|r| r.chunk_id == "a").unwrap();
        assert!((a.fused_score - 0.5 / 61.0).abs() < 1e-6);
    }

    #[test]
    fn invalid_weights_are_rejected() {
        let bad = [
            FusionConfig { weights: FusionWeights { bm25: -0.1, dense: 1.0 }, ..FusionConfig::default() },
            FusionConfig { weights: FusionWeights { bm25: 0.0, dense: 0.0 }, ..FusionConfig::default() },
            FusionConfig { weights: FusionWeights { bm25: f32::NAN, dense: 1.0 }, ..FusionConfig::default() },
            FusionConfig { rrf_k: 0.0, ..FusionConfig::default() },
        ];
        for config in bad {
            assert_eq!(ScoreFuser::new(config).unwrap_err().kind(), ErrorKind::FusionConfig);
        }
    }

    #[test]
    fn dedup_keeps_the_higher_ranked_copy() {
        let fused = fuser(0.4, 0.6).fuse(&[hits(Origin::Sparse, &["a", "b", "c"])]);
        let table = Table(vec![("a", "b", 0.95), ("a", "c", 0.5), ("b", "c", 0.1)]);
        let kept = deduplicate(fused, &table, 0.92);
        let ids: Vec<_> = kept.iter().map(|r| r.chunk_id.as_str()).collect();
        assert_eq!(ids, vec!["a", "c"]);
        assert_eq!(kept[1].rank, 2);
    }

    #[test]
    fn dedup_is_idempotent() {
        let fused = fuser(0.4, 0.6).fuse(&[hits(Origin::Sparse, &["a", "b", "c", "d"])]);
        let table = Table(vec![("a", "c", 0.99), ("b", "d", 0.93)]);
        let once = deduplicate(fused, &table, 0.92);
        let twice = deduplicate(once.clone(), &table, 0.92);
        assert_eq!(once, twice);
        assert_eq!(once.len(), 2);
    }

    #[test]
    fn threshold_is_exclusive_and_unknown_pairs_survive() {
        let fused = fuser(0.4, 0.6).fuse(&[hits(Origin::Sparse, &["a", "b", "c"])]);
        let table = Table(vec![("a", "b", 0.92)]);
        assert_eq!(deduplicate(fused, &table, 0.92).len(), 3);
    }

    #[test]
    fn fuse_and_dedup_truncates_to_k() {
        let f = ScoreFuser::new(FusionConfig { k: 2, ..FusionConfig::default() }).unwrap();
        let lists = [hits(Origin::Sparse, &["a", "b", "c"]), hits(Origin::Dense, &["c", "d"])];
        assert_eq!(f.fuse_and_dedup(&lists, None).len(), 2);

        let table = Table(vec![("c", "a", 0.99)]);
        let out = f.fuse_and_dedup(&lists, Some(&table));
        assert!(out.iter().all(|r| r.chunk_id != "a"));
        assert_eq!(out.len(), 2);
    }
}
