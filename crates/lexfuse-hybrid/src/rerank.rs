use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use lexfuse_core::config::RerankerConfig;
use lexfuse_core::traits::PairScorer;
use lexfuse_core::types::ChunkId;
use lexfuse_core::ErrorKind;

use crate::cancel::{CancelGuard, CancelToken};

/// Non-fatal problems recorded on a query outcome.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Degradation {
    RerankDegraded { reason: String },
}

impl Degradation {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Degradation::RerankDegraded { .. } => ErrorKind::RerankDegraded,
        }
    }

    pub fn reason(&self) -> &str {
        match self {
            Degradation::RerankDegraded { reason } => reason,
        }
    }
}

/// A fused candidate handed to the reranker, in fused order.
#[derive(Debug, Clone, PartialEq)]
pub struct RerankCandidate {
    pub chunk_id: ChunkId,
    pub text: String,
    pub fused_score: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Reranked {
    pub chunk_id: ChunkId,
    pub score: f32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RerankOutcome {
    pub ranked: Vec<Reranked>,
    pub degradation: Option<Degradation>,
}

impl RerankOutcome {
    pub fn is_degraded(&self) -> bool {
        self.degradation.is_some()
    }
}

/// Rescores fused candidates with a pairwise model on the blocking pool.
#[derive(Clone)]
pub struct Reranker {
    scorer: Arc<dyn PairScorer>,
    config: RerankerConfig,
}

impl Reranker {
    pub fn new(scorer: Arc<dyn PairScorer>, config: RerankerConfig) -> Self {
        Self { scorer, config }
    }

    pub fn config(&self) -> &RerankerConfig {
        &self.config
    }

    pub fn model_id(&self) -> &str {
        self.scorer.model_id()
    }

    /// Score every `(query, text)` pair and reorder by model score.
    ///
    /// Scores below `score_threshold` are dropped, then the list is cut to
    /// `k`. Equal scores keep the fused order. Any failure leaves the fused
    /// order in place, cut to `k`, and reports why.
    pub async fn rerank(&self, query: &str, candidates: Vec<RerankCandidate>) -> RerankOutcome {
        if candidates.is_empty() {
            return RerankOutcome { ranked: Vec::new(), degradation: None };
        }
        let start = Instant::now();
        let timeout = Duration::from_millis(self.config.timeout_ms);

        let scorer = Arc::clone(&self.scorer);
        let batch_size = self.config.batch_size.max(1);
        let owned_query = query.to_string();
        let texts: Vec<String> = candidates.iter().map(|c| c.text.clone()).collect();
        // Dropped on timeout or cancellation; the batches still queued are skipped.
        let guard = CancelGuard::new();
        let cancel = guard.token();
        let task = tokio::task::spawn_blocking(move || {
            score_in_batches(scorer.as_ref(), &owned_query, &texts, batch_size, &cancel)
        });

        let scores = match tokio::time::timeout(timeout, task).await {
            Err(_) => Err(format!("reranking timed out after {} ms", self.config.timeout_ms)),
            Ok(Err(join)) => Err(format!("reranking task failed: {join}")),
            Ok(Ok(Err(e))) => Err(format!("reranker error: {e:#}")),
            Ok(Ok(Ok(scores))) => check_scores(scores, candidates.len()),
        };
        drop(guard);

        match scores {
            Ok(scores) => {
                let ranked = self.order(candidates, scores);
                debug!(
                    kept = ranked.len(),
                    elapsed_ms = start.elapsed().as_millis() as u64,
                    model = self.scorer.model_id(),
                    "reranked candidates"
                );
                RerankOutcome { ranked, degradation: None }
            }
            Err(reason) => {
                warn!(%reason, "reranking skipped, keeping fused order");
                let ranked = candidates
                    .into_iter()
                    .take(self.config.k)
                    .map(|c| Reranked { chunk_id: c.chunk_id, score: c.fused_score })
                    .collect();
                RerankOutcome { ranked, degradation: Some(Degradation::RerankDegraded { reason }) }
            }
        }
    }

    fn order(&self, candidates: Vec<RerankCandidate>, scores: Vec<f32>) -> Vec<Reranked> {
        let mut scored: Vec<(usize, Reranked)> = candidates
            .into_iter()
            .zip(scores)
            .enumerate()
            .filter(|(_, (_, s))| *s >= self.config.score_threshold)
            .map(|(i, (c, score))| (i, Reranked { chunk_id: c.chunk_id, score }))
            .collect();
        scored.sort_by(|(i, x), (j, y)| y.score.total_cmp(&x.score).then(i.cmp(j)));
        scored.truncate(self.config.k);
        scored.into_iter().map(|(_, r)| r).collect()
    }
}

fn score_in_batches(
    scorer: &dyn PairScorer,
    query: &str,
    texts: &[String],
    batch_size: usize,
    cancel: &CancelToken,
) -> anyhow::Result<Vec<f32>> {
    let mut scores = Vec::with_capacity(texts.len());
    for batch in texts.chunks(batch_size) {
        if cancel.is_cancelled() {
            anyhow::bail!("reranking cancelled after {} of {} passages", scores.len(), texts.len());
        }
        let passages: Vec<&str> = batch.iter().map(String::as_str).collect();
        let batch_scores = scorer.score_pairs(query, &passages)?;
        if batch_scores.len() != passages.len() {
            anyhow::bail!("scorer returned {} scores for {} passages", batch_scores.len(), passages.len());
        }
        scores.extend(batch_scores);
    }
    Ok(scores)
}

fn check_scores(scores: Vec<f32>, expected: usize) -> Result<Vec<f32>, String> {
    if scores.len() != expected {
        return Err(format!("scorer returned {} scores for {expected} candidates", scores.len()));
    }
    if let Some(bad) = scores.iter().find(|s| !s.is_finite()) {
        return Err(format!("scorer produced a non-finite score ({bad})"));
    }
    Ok(scores)
}
