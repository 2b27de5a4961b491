use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Mutex;
use tracing::{info, warn};

use lexfuse_core::chunker::Chunker;
use lexfuse_core::config::{PipelineConfig, SplitUnit};
use lexfuse_core::error::{Error, Result};
use lexfuse_core::traits::{Embedder, PairScorer};
use lexfuse_core::types::Document;
use lexfuse_hybrid::{CorpusHandle, CorpusIndex, HybridPipeline, PipelineVariant, QueryOutcome};
use lexfuse_vector::EmbeddingCache;

use crate::dataset::LabeledQuery;
use crate::metrics::{exact_match, is_relevant, mean, reciprocal_rank, token_overlap, LatencySummary};
use crate::variant::{ConfigOverrides, EvalVariant};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueryReport {
    pub query_id: String,
    pub query: String,
    pub results: Vec<String>,
    /// `None` when the query has no expected answer.
    pub token_overlap: Option<f64>,
    pub exact_match: Option<bool>,
    /// `None` when the query carries no labels at all.
    pub relevant_at_k: Option<bool>,
    pub reciprocal_rank: Option<f64>,
    pub latency_ms: f64,
    pub context_tokens: usize,
    pub degraded: bool,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct VariantMetrics {
    pub queries: usize,
    pub failed: usize,
    pub degraded: usize,
    pub token_overlap: Option<f64>,
    pub exact_match: Option<f64>,
    pub relevance_at_k: Option<f64>,
    pub mrr: Option<f64>,
    pub latency: LatencySummary,
    pub mean_context_tokens: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VariantReport {
    pub name: String,
    pub variant: PipelineVariant,
    pub overrides: ConfigOverrides,
    pub corpus_version: String,
    pub chunks: usize,
    pub final_k: usize,
    pub metrics: VariantMetrics,
    pub per_query: Vec<QueryReport>,
}

#[derive(Debug, Clone, Serialize)]
pub struct HarnessReport {
    pub generated_at: DateTime<Utc>,
    pub documents: usize,
    pub queries: usize,
    pub variants: Vec<VariantReport>,
}

impl HarnessReport {
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

/// Corpus indexes only depend on how documents are cut.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct ChunkingKey {
    chunk_size: usize,
    chunk_overlap: usize,
    split_unit: SplitUnit,
}

impl ChunkingKey {
    fn of(config: &PipelineConfig) -> Self {
        Self {
            chunk_size: config.chunking.chunk_size,
            chunk_overlap: config.chunking.chunk_overlap,
            split_unit: config.chunking.split_unit,
        }
    }
}

/// Drives the pipeline over a labeled query set under different variants.
pub struct EvaluationHarness {
    base: PipelineConfig,
    documents: Arc<Vec<Document>>,
    embedder: Option<Arc<dyn Embedder>>,
    scorer: Option<Arc<dyn PairScorer>>,
    cache: Arc<EmbeddingCache>,
    corpora: Mutex<HashMap<ChunkingKey, Arc<CorpusIndex>>>,
    concurrency: usize,
}

impl EvaluationHarness {
    pub fn new(
        base: PipelineConfig,
        documents: Vec<Document>,
        embedder: Option<Arc<dyn Embedder>>,
        scorer: Option<Arc<dyn PairScorer>>,
    ) -> Result<Self> {
        base.validate()?;
        Ok(Self {
            base,
            documents: Arc::new(documents),
            embedder,
            scorer,
            cache: Arc::new(EmbeddingCache::new()),
            corpora: Mutex::new(HashMap::new()),
            concurrency: 4,
        })
    }

    /// Number of queries in flight at once.
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    pub fn base_config(&self) -> &PipelineConfig {
        &self.base
    }

    /// Build, or reuse, the corpus index for this chunking.
    ///
    /// Every retriever that can be built is built, so one index serves every
    /// stage ablation. The map lock is only held to look up and to insert;
    /// when two variants race on the same chunking the first index stored wins.
    async fn corpus_for(&self, config: &PipelineConfig) -> Result<Arc<CorpusIndex>> {
        let key = ChunkingKey::of(config);
        if let Some(index) = self.corpora.lock().await.get(&key) {
            return Ok(Arc::clone(index));
        }

        let mut index_config = config.clone();
        index_config.sparse.enabled = true;
        index_config.dense.enabled = self.embedder.is_some();
        let documents = Arc::clone(&self.documents);
        let embedder = self.embedder.clone();
        let cache = Arc::clone(&self.cache);
        let index = tokio::task::spawn_blocking(move || {
            let chunker = Chunker::new(index_config.chunking.clone())?;
            let chunks = chunker.chunk_all(&documents);
            CorpusIndex::build(chunks, &index_config, embedder.as_deref(), &cache, None, false)
        })
        .await
        .map_err(|e| Error::Io(std::io::Error::other(format!("corpus build task failed: {e}"))))??;

        info!(
            chunk_size = key.chunk_size,
            chunk_overlap = key.chunk_overlap,
            corpus_version = index.version(),
            "memoized evaluation corpus"
        );
        let mut corpora = self.corpora.lock().await;
        Ok(Arc::clone(corpora.entry(key).or_insert_with(|| Arc::new(index))))
    }

    pub async fn run(&self, variant: &EvalVariant, queries: &[LabeledQuery]) -> Result<VariantReport> {
        let config = variant.overrides.apply(&self.base)?;
        let corpus = self.corpus_for(&config).await?;
        let final_k = config.final_k();
        let pipeline = HybridPipeline::new(
            config,
            Arc::new(CorpusHandle::from_shared(Arc::clone(&corpus))),
            self.embedder.clone(),
            self.scorer.clone(),
            Arc::clone(&self.cache),
        )?;

        let start = Instant::now();
        let mut per_query: Vec<(usize, QueryReport)> = stream::iter(queries.iter().enumerate())
            .map(|(i, q)| {
                let pipeline = &pipeline;
                let corpus = &corpus;
                async move {
                    let started = Instant::now();
                    let outcome = pipeline.query_with(&q.query, variant.variant).await;
                    let latency_ms = started.elapsed().as_secs_f64() * 1000.0;
                    (i, judge(q, outcome, corpus, latency_ms))
                }
            })
            .buffer_unordered(self.concurrency)
            .collect()
            .await;
        per_query.sort_by_key(|(i, _)| *i);
        let per_query: Vec<QueryReport> = per_query.into_iter().map(|(_, r)| r).collect();

        let metrics = aggregate(&per_query);
        info!(
            variant = %variant.name,
            queries = metrics.queries,
            failed = metrics.failed,
            degraded = metrics.degraded,
            mrr = metrics.mrr.unwrap_or_default(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "evaluated variant"
        );
        Ok(VariantReport {
            name: variant.name.clone(),
            variant: variant.variant,
            overrides: variant.overrides.clone(),
            corpus_version: corpus.version().to_string(),
            chunks: corpus.len(),
            final_k,
            metrics,
            per_query,
        })
    }

    pub async fn run_all(&self, variants: &[EvalVariant], queries: &[LabeledQuery]) -> Result<HarnessReport> {
        let mut reports = Vec::with_capacity(variants.len());
        for variant in variants {
            reports.push(self.run(variant, queries).await?);
        }
        Ok(HarnessReport {
            generated_at: Utc::now(),
            documents: self.documents.len(),
            queries: queries.len(),
            variants: reports,
        })
    }
}

fn judge(query: &LabeledQuery, outcome: Result<QueryOutcome>, corpus: &CorpusIndex, latency_ms: f64) -> QueryReport {
    let labeled = query.is_labeled();
    let answer = query.expected_answer.as_deref().filter(|a| !a.trim().is_empty());
    let outcome = match outcome {
        Ok(outcome) => outcome,
        Err(e) => {
            warn!(query_id = %query.id, error = %e, "evaluation query failed");
            return QueryReport {
                query_id: query.id.clone(),
                query: query.query.clone(),
                results: Vec::new(),
                token_overlap: answer.map(|_| 0.0),
                exact_match: answer.map(|_| false),
                relevant_at_k: labeled.then_some(false),
                reciprocal_rank: labeled.then_some(0.0),
                latency_ms,
                context_tokens: 0,
                degraded: false,
                error: Some(e.to_string()),
            };
        }
    };

    let texts: Vec<&str> = outcome.results.iter().map(|r| r.text.as_str()).collect();
    let relevance: Vec<bool> = outcome
        .results
        .iter()
        .map(|r| corpus.chunk(&r.chunk_id).is_some_and(|c| is_relevant(query, c)))
        .collect();
    QueryReport {
        query_id: query.id.clone(),
        query: query.query.clone(),
        results: outcome.results.iter().map(|r| r.chunk_id.clone()).collect(),
        token_overlap: answer.map(|a| token_overlap(a, &texts)),
        exact_match: answer.map(|a| exact_match(a, &texts)),
        relevant_at_k: labeled.then(|| relevance.iter().any(|&r| r)),
        reciprocal_rank: labeled.then(|| reciprocal_rank(&relevance)),
        latency_ms,
        context_tokens: texts.iter().map(|t| t.split_whitespace().count()).sum(),
        degraded: outcome.is_degraded(),
        error: None,
    }
}

fn aggregate(reports: &[QueryReport]) -> VariantMetrics {
    let answered: Vec<&QueryReport> = reports.iter().filter(|r| r.error.is_none()).collect();
    let latencies: Vec<f64> = answered.iter().map(|r| r.latency_ms).collect();
    VariantMetrics {
        queries: reports.len(),
        failed: reports.len() - answered.len(),
        degraded: reports.iter().filter(|r| r.degraded).count(),
        token_overlap: mean(reports.iter().filter_map(|r| r.token_overlap)),
        exact_match: mean(reports.iter().filter_map(|r| r.exact_match.map(|m| if m { 1.0 } else { 0.0 }))),
        relevance_at_k: mean(reports.iter().filter_map(|r| r.relevant_at_k.map(|m| if m { 1.0 } else { 0.0 }))),
        mrr: mean(reports.iter().filter_map(|r| r.reciprocal_rank)),
        latency: LatencySummary::from_samples(&latencies),
        mean_context_tokens: mean(answered.iter().map(|r| r.context_tokens as f64)).unwrap_or_default(),
    }
}
