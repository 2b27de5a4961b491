//! Per-query orchestration: retrieve concurrently, fuse, deduplicate, rerank.
//!
//! Each query walks `Idle → Retrieving → Fusing → Deduplicating → Reranking → Done`,
//! skipping the stages its [`StagePlan`] leaves out. Nothing outlives the call.

use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;
use std::time::Instant;
use tokio::task::JoinSet;
use tracing::{debug, instrument, warn};

use lexfuse_core::config::PipelineConfig;
use lexfuse_core::error::{Error, Result};
use lexfuse_core::traits::{Embedder, PairScorer, Retriever};
use lexfuse_core::types::{Chunk, FinalResult, FusedResult, Origin, RetrievalHit};
use lexfuse_core::RetrieverFailure;
use lexfuse_text::SparseRetriever;
use lexfuse_vector::{DenseRetriever, EmbeddingCache};

use crate::cancel::CancelGuard;
use crate::corpus::{CorpusHandle, CorpusIndex};
use crate::fusion::{RankedList, ScoreFuser};
use crate::rerank::{Degradation, RerankCandidate, Reranker};
use crate::variant::{PipelineVariant, StagePlan};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryStage {
    Idle,
    Retrieving,
    Fusing,
    Deduplicating,
    Reranking,
    Done,
}

impl fmt::Display for QueryStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            QueryStage::Idle => "idle",
            QueryStage::Retrieving => "retrieving",
            QueryStage::Fusing => "fusing",
            QueryStage::Deduplicating => "deduplicating",
            QueryStage::Reranking => "reranking",
            QueryStage::Done => "done",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StageTiming {
    pub stage: QueryStage,
    pub elapsed_ms: f64,
}

/// What happened while serving one query.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct QueryTrace {
    pub stages: Vec<StageTiming>,
    /// Hits returned per origin, before fusion.
    pub retrieved: BTreeMap<Origin, usize>,
    pub failures: Vec<RetrieverFailure>,
    pub fused_candidates: usize,
    pub total_ms: f64,
}

impl QueryTrace {
    pub fn visited(&self) -> Vec<QueryStage> {
        self.stages.iter().map(|s| s.stage).collect()
    }
}

struct TraceRecorder {
    trace: QueryTrace,
    started: Instant,
    current: Option<(QueryStage, Instant)>,
}

impl TraceRecorder {
    fn new() -> Self {
        let now = Instant::now();
        Self { trace: QueryTrace::default(), started: now, current: Some((QueryStage::Idle, now)) }
    }

    fn enter(&mut self, stage: QueryStage) {
        self.close();
        debug!(%stage, "query stage");
        self.current = Some((stage, Instant::now()));
    }

    fn close(&mut self) {
        if let Some((stage, since)) = self.current.take() {
            self.trace.stages.push(StageTiming { stage, elapsed_ms: since.elapsed().as_secs_f64() * 1000.0 });
        }
    }

    fn finish(mut self) -> QueryTrace {
        self.enter(QueryStage::Done);
        self.close();
        self.trace.total_ms = self.started.elapsed().as_secs_f64() * 1000.0;
        self.trace
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueryOutcome {
    pub query: String,
    pub variant: PipelineVariant,
    pub corpus_version: String,
    pub results: Vec<FinalResult>,
    pub degradation: Option<Degradation>,
    pub trace: QueryTrace,
}

impl QueryOutcome {
    pub fn is_degraded(&self) -> bool {
        self.degradation.is_some()
    }
}

/// The retrieval engine: one validated config, one corpus handle and the
/// models that serve it.
pub struct HybridPipeline {
    config: PipelineConfig,
    corpus: Arc<CorpusHandle>,
    embedder: Option<Arc<dyn Embedder>>,
    reranker: Option<Reranker>,
    fuser: ScoreFuser,
    cache: Arc<EmbeddingCache>,
}

impl HybridPipeline {
    pub fn new(
        config: PipelineConfig,
        corpus: Arc<CorpusHandle>,
        embedder: Option<Arc<dyn Embedder>>,
        scorer: Option<Arc<dyn PairScorer>>,
        cache: Arc<EmbeddingCache>,
    ) -> Result<Self> {
        config.validate()?;
        let fuser = ScoreFuser::new(config.fusion.clone())?;
        let reranker = scorer.map(|s| Reranker::new(s, config.reranker.clone()));
        Ok(Self { config, corpus, embedder, reranker, fuser, cache })
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn corpus(&self) -> &Arc<CorpusHandle> {
        &self.corpus
    }

    pub fn cache(&self) -> &Arc<EmbeddingCache> {
        &self.cache
    }

    /// Index `chunks` off the async runtime and make them the live corpus.
    pub async fn rebuild(&self, chunks: Vec<Chunk>, version: Option<String>) -> Result<Arc<CorpusIndex>> {
        let config = self.config.clone();
        let embedder = self.embedder.clone();
        let cache = Arc::clone(&self.cache);
        let index = tokio::task::spawn_blocking(move || {
            CorpusIndex::build(chunks, &config, embedder.as_deref(), &cache, version, false)
        })
        .await
        .map_err(|e| Error::Io(std::io::Error::other(format!("index build task failed: {e}"))))??;
        self.corpus.swap(index);
        Ok(self.corpus.current())
    }

    pub async fn query(&self, query: &str) -> Result<QueryOutcome> {
        self.query_with(query, PipelineVariant::Configured).await
    }

    #[instrument(skip(self, variant), fields(variant = %variant))]
    pub async fn query_with(&self, query: &str, variant: PipelineVariant) -> Result<QueryOutcome> {
        let corpus = self.corpus.current();
        let plan = variant.plan(&self.config);
        let mut trace = TraceRecorder::new();

        trace.enter(QueryStage::Retrieving);
        let (lists, failures) = self.retrieve(&corpus, query, plan).await;
        for list in &lists {
            trace.trace.retrieved.insert(list.origin, list.hits.len());
        }
        if lists.is_empty() {
            return Err(Error::RetrievalUnavailable { failures });
        }
        trace.trace.failures = failures;

        trace.enter(QueryStage::Fusing);
        let mut fused = self.fuser.fuse(&lists);
        trace.trace.fused_candidates = fused.len();

        if plan.dedup {
            trace.enter(QueryStage::Deduplicating);
            match corpus.dense() {
                Some(dense) => fused = self.fuser.deduplicate(fused, dense.as_ref()),
                None => warn!("no dense vectors for this corpus; deduplication skipped"),
            }
        }
        fused.truncate(self.config.fusion.k);

        let mut degradation = None;
        let results = if plan.rerank {
            trace.enter(QueryStage::Reranking);
            let (results, degraded) = self.rerank(&corpus, query, fused).await;
            degradation = degraded;
            results
        } else {
            fused.truncate(self.config.final_k());
            fused.iter().filter_map(|f| final_result(&corpus, &f.chunk_id, f.fused_score)).collect()
        };

        Ok(QueryOutcome {
            query: query.to_string(),
            variant,
            corpus_version: corpus.version().to_string(),
            results,
            degradation,
            trace: trace.finish(),
        })
    }

    fn retrievers(&self, corpus: &CorpusIndex, plan: StagePlan) -> (Vec<Arc<dyn Retriever>>, Vec<RetrieverFailure>) {
        let mut retrievers: Vec<Arc<dyn Retriever>> = Vec::with_capacity(2);
        let mut failures = Vec::new();
        if plan.sparse {
            match corpus.sparse() {
                Some(index) => retrievers.push(Arc::new(SparseRetriever::new(Arc::clone(index), &self.config.sparse))),
                None => failures.push(RetrieverFailure {
                    origin: Origin::Sparse,
                    message: "no sparse index for this corpus".into(),
                }),
            }
        }
        if plan.dense {
            let dense = match (corpus.dense(), &self.embedder) {
                (Some(index), Some(embedder)) => {
                    DenseRetriever::new(Arc::clone(index), Arc::clone(embedder), &self.config.dense)
                        .map_err(|e| e.to_string())
                }
                (None, _) => Err("no dense index for this corpus".to_string()),
                (_, None) => Err("no embedding model loaded".to_string()),
            };
            match dense {
                Ok(retriever) => retrievers.push(Arc::new(retriever)),
                Err(message) => failures.push(RetrieverFailure { origin: Origin::Dense, message }),
            }
        }
        (retrievers, failures)
    }

    /// Run every planned retriever on the blocking pool and wait for all of them.
    async fn retrieve(
        &self,
        corpus: &CorpusIndex,
        query: &str,
        plan: StagePlan,
    ) -> (Vec<RankedList>, Vec<RetrieverFailure>) {
        let (retrievers, mut failures) = self.retrievers(corpus, plan);
        let mut pending: BTreeSet<Origin> = BTreeSet::new();
        let mut set: JoinSet<(Origin, anyhow::Result<Vec<RetrievalHit>>)> = JoinSet::new();
        let guard = CancelGuard::new();
        for retriever in retrievers {
            let origin = retriever.origin();
            let k = match origin {
                Origin::Sparse => self.config.sparse.k,
                Origin::Dense => self.config.dense.k,
            };
            let owned = query.to_string();
            pending.insert(origin);
            let cancel = guard.token();
            set.spawn_blocking(move || {
                if cancel.is_cancelled() {
                    return (origin, Err(anyhow::anyhow!("query cancelled before {origin} retrieval started")));
                }
                (origin, retriever.search(&owned, k))
            });
        }

        let mut lists = Vec::with_capacity(pending.len());
        let mut join_error = None;
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok((origin, Ok(hits))) => {
                    pending.remove(&origin);
                    debug!(%origin, hits = hits.len(), "retriever finished");
                    lists.push(RankedList::new(origin, hits));
                }
                Ok((origin, Err(e))) => {
                    pending.remove(&origin);
                    failures.push(RetrieverFailure { origin, message: format!("{e:#}") });
                }
                Err(e) => join_error = Some(e.to_string()),
            }
        }
        for origin in pending {
            let message = join_error.clone().unwrap_or_else(|| "retriever task vanished".to_string());
            failures.push(RetrieverFailure { origin, message });
        }
        for failure in &failures {
            warn!(origin = %failure.origin, error = %failure.message, "retriever failed; continuing without it");
        }
        lists.sort_by_key(|l| l.origin);
        (lists, failures)
    }

    async fn rerank(
        &self,
        corpus: &CorpusIndex,
        query: &str,
        fused: Vec<FusedResult>,
    ) -> (Vec<FinalResult>, Option<Degradation>) {
        let Some(reranker) = &self.reranker else {
            let reason = "no reranking model loaded".to_string();
            warn!(%reason, "reranking skipped, keeping fused order");
            let results = fused
                .iter()
                .take(self.config.final_k())
                .filter_map(|f| final_result(corpus, &f.chunk_id, f.fused_score))
                .collect();
            return (results, Some(Degradation::RerankDegraded { reason }));
        };
        let candidates = fused
            .into_iter()
            .filter_map(|f| {
                corpus.chunk(&f.chunk_id).map(|c| RerankCandidate {
                    chunk_id: f.chunk_id,
                    text: c.text.clone(),
                    fused_score: f.fused_score,
                })
            })
            .collect();
        let outcome = reranker.rerank(query, candidates).await;
        let results = outcome
            .ranked
            .iter()
            .take(self.config.final_k())
            .filter_map(|r| final_result(corpus, &r.chunk_id, r.score))
            .collect();
        (results, outcome.degradation)
    }
}

fn final_result(corpus: &CorpusIndex, chunk_id: &str, score: f32) -> Option<FinalResult> {
    let chunk = corpus.chunk(chunk_id)?;
    Some(FinalResult {
        chunk_id: chunk.id.clone(),
        text: chunk.text.clone(),
        metadata: chunk.metadata.clone(),
        final_score: score,
    })
}
