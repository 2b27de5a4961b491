//! `lexfuse`: build, query and evaluate a hybrid retrieval corpus.
//!
//! ```bash
//! lexfuse index data/txt
//! lexfuse query "¿Cuál es el monto máximo para viáticos?"
//! lexfuse eval --documents data/txt --queries queries.jsonl --chunk-sizes 400,800 --chunk-overlaps 50
//! ```
//!
//! Set `LEXFUSE_USE_FAKE_EMBEDDINGS=1` to run without model files.

mod input;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use lexfuse_core::chunker::Chunker;
use lexfuse_core::config::PipelineConfig;
use lexfuse_core::traits::{Embedder, PairScorer};
use lexfuse_embed::{get_default_embedder, get_default_scorer};
use lexfuse_eval::{load_queries, EvalVariant, EvaluationHarness};
use lexfuse_hybrid::{
    read_active_version, write_active_version, CorpusHandle, CorpusIndex, HybridPipeline, PipelineVariant,
};
use lexfuse_vector::EmbeddingCache;

#[derive(Parser)]
#[command(name = "lexfuse", version, about = "Hybrid BM25 + dense retrieval with fusion and reranking")]
struct Cli {
    /// Configuration file; `lexfuse.<env>.toml` and LEXFUSE_* variables are layered on top
    #[arg(short, long, global = true, default_value = "lexfuse.toml")]
    config: PathBuf,

    /// Override `paths.index_dir`
    #[arg(long, global = true)]
    index_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Chunk and index a corpus, then make it the active version
    Index {
        /// Directory of .txt/.md files, or a JSON Lines file of documents
        input: PathBuf,
        /// Treat INPUT as JSON Lines of ready-made chunks
        #[arg(long)]
        chunks: bool,
        /// Explicit corpus version (default: hash of the chunks)
        #[arg(long)]
        corpus_version: Option<String>,
    },
    /// Search the active corpus and print the outcome as JSON
    Query {
        query: String,
        /// sparse_only, dense_only, fused_without_rerank, full or configured
        #[arg(long, default_value = "configured", value_parser = parse_variant)]
        variant: PipelineVariant,
        /// Corpus version to load instead of the active one
        #[arg(long)]
        corpus_version: Option<String>,
    },
    /// Run labeled queries through stage ablations and parameter sweeps
    Eval {
        /// Directory of .txt/.md files, or a JSON Lines file of documents
        #[arg(long)]
        documents: PathBuf,
        /// JSON array or JSON Lines of labeled queries
        #[arg(long)]
        queries: PathBuf,
        /// Skip the four stage ablations
        #[arg(long)]
        no_ablations: bool,
        #[arg(long, value_delimiter = ',')]
        chunk_sizes: Vec<usize>,
        #[arg(long, value_delimiter = ',')]
        chunk_overlaps: Vec<usize>,
        /// Fusion points as bm25:dense:rrf_k, e.g. 0.4:0.6:60
        #[arg(long, value_delimiter = ',', value_parser = parse_fusion_point)]
        fusion: Vec<(f32, f32, f32)>,
        /// Queries evaluated concurrently
        #[arg(long, default_value = "4")]
        concurrency: usize,
        /// Write the report here instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

fn parse_variant(raw: &str) -> Result<PipelineVariant, String> {
    serde_json::from_value(serde_json::Value::String(raw.to_string())).map_err(|_| format!("unknown variant {raw}"))
}

fn parse_fusion_point(raw: &str) -> Result<(f32, f32, f32), String> {
    let parts: Vec<f32> = raw
        .split(':')
        .map(|p| p.trim().parse::<f32>().map_err(|e| format!("{raw}: {e}")))
        .collect::<Result<_, _>>()?;
    match parts[..] {
        [bm25, dense, rrf_k] => Ok((bm25, dense, rrf_k)),
        _ => Err(format!("{raw}: expected bm25:dense:rrf_k")),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let mut config = PipelineConfig::load_from(&cli.config)
        .with_context(|| format!("loading configuration from {}", cli.config.display()))?;
    if let Some(dir) = &cli.index_dir {
        config.paths.index_dir = dir.to_string_lossy().into_owned();
    }

    match cli.command {
        Command::Index { input, chunks, corpus_version } => run_index(&config, &input, chunks, corpus_version).await,
        Command::Query { query, variant, corpus_version } => run_query(config, &query, variant, corpus_version).await,
        Command::Eval {
            documents,
            queries,
            no_ablations,
            chunk_sizes,
            chunk_overlaps,
            fusion,
            concurrency,
            output,
        } => {
            let variants = plan_variants(&config, no_ablations, chunk_sizes, chunk_overlaps, &fusion)?;
            run_eval(config, &documents, &queries, variants, concurrency, output.as_deref()).await
        }
    }
}

/// Ablations plus the requested sweeps. Giving only sizes or only overlaps
/// sweeps that axis against the configured value of the other.
fn plan_variants(
    config: &PipelineConfig,
    no_ablations: bool,
    chunk_sizes: Vec<usize>,
    chunk_overlaps: Vec<usize>,
    fusion: &[(f32, f32, f32)],
) -> Result<Vec<EvalVariant>> {
    let mut variants = if no_ablations { Vec::new() } else { EvalVariant::ablations() };
    if !chunk_sizes.is_empty() || !chunk_overlaps.is_empty() {
        let sizes = if chunk_sizes.is_empty() { vec![config.chunking.chunk_size] } else { chunk_sizes };
        let overlaps = if chunk_overlaps.is_empty() { vec![config.chunking.chunk_overlap] } else { chunk_overlaps };
        variants.extend(EvalVariant::chunking_sweep(&sizes, &overlaps));
    }
    variants.extend(EvalVariant::fusion_sweep(fusion));
    if variants.is_empty() {
        bail!("nothing to evaluate: ablations are off and no sweep was requested");
    }
    Ok(variants)
}

/// Models are optional at query time: a missing one turns into a retriever
/// failure or a rerank degradation instead of aborting.
fn load_embedder(config: &PipelineConfig) -> Option<Arc<dyn Embedder>> {
    if !config.dense.enabled {
        return None;
    }
    match get_default_embedder(&config.dense, &config.model_dir()) {
        Ok(embedder) => Some(embedder),
        Err(e) => {
            warn!(model = %config.dense.model, error = %e, "embedding model unavailable");
            None
        }
    }
}

fn load_scorer(config: &PipelineConfig) -> Option<Arc<dyn PairScorer>> {
    if !config.reranker.enabled {
        return None;
    }
    match get_default_scorer(&config.reranker, &config.model_dir()) {
        Ok(scorer) => Some(scorer),
        Err(e) => {
            warn!(model = %config.reranker.model, error = %e, "reranking model unavailable");
            None
        }
    }
}

async fn run_index(config: &PipelineConfig, source: &Path, ready_chunks: bool, version: Option<String>) -> Result<()> {
    let chunks = if ready_chunks {
        input::load_chunks(source)?
    } else {
        let documents = input::load_documents(source)?;
        info!(documents = documents.len(), source = %source.display(), "loaded documents");
        Chunker::new(config.chunking.clone())?.chunk_all(&documents)
    };
    if chunks.is_empty() {
        bail!("{} produced no chunks", source.display());
    }

    let embedder = load_embedder(config);
    let build_config = config.clone();
    let index = tokio::task::spawn_blocking(move || {
        CorpusIndex::build(chunks, &build_config, embedder.as_deref(), &EmbeddingCache::new(), version, true)
    })
    .await
    .context("index build task panicked")??;

    let root = config.index_dir();
    let dir = index.save(&root).await?;
    write_active_version(&root, index.version())?;
    info!(corpus_version = index.version(), chunks = index.len(), dir = %dir.display(), "corpus is active");
    println!("{}", index.version());
    Ok(())
}

async fn run_query(config: PipelineConfig, text: &str, variant: PipelineVariant, version: Option<String>) -> Result<()> {
    let root = config.index_dir();
    let version = match version {
        Some(v) => v,
        None => read_active_version(&root)?
            .with_context(|| format!("no active corpus under {}; run `lexfuse index` first", root.display()))?,
    };
    let embedder = load_embedder(&config);
    let scorer = load_scorer(&config);
    let corpus = CorpusIndex::load(&root, &version, &config, embedder.as_deref()).await?;
    let pipeline = HybridPipeline::new(
        config,
        Arc::new(CorpusHandle::new(corpus)),
        embedder,
        scorer,
        Arc::new(EmbeddingCache::new()),
    )?;
    let outcome = pipeline.query_with(text, variant).await?;
    println!("{}", serde_json::to_string_pretty(&outcome)?);
    Ok(())
}

async fn run_eval(
    config: PipelineConfig,
    documents: &Path,
    queries: &Path,
    variants: Vec<EvalVariant>,
    concurrency: usize,
    output: Option<&Path>,
) -> Result<()> {
    let documents = input::load_documents(documents)?;
    let queries = load_queries(queries)?;
    let embedder = load_embedder(&config);
    let scorer = load_scorer(&config);
    info!(documents = documents.len(), queries = queries.len(), variants = variants.len(), "starting evaluation");

    let harness = EvaluationHarness::new(config, documents, embedder, scorer)?.with_concurrency(concurrency);
    let report = harness.run_all(&variants, &queries).await?;
    for v in &report.variants {
        info!(
            variant = %v.name,
            relevance_at_k = v.metrics.relevance_at_k.unwrap_or_default(),
            mrr = v.metrics.mrr.unwrap_or_default(),
            exact_match = v.metrics.exact_match.unwrap_or_default(),
            p95_ms = v.metrics.latency.p95_ms,
            "variant summary"
        );
    }

    let json = report.to_json()?;
    match output {
        Some(path) => {
            fs::write(path, json).with_context(|| format!("writing {}", path.display()))?;
            info!(path = %path.display(), "wrote evaluation report");
        }
        None => println!("{json}"),
    }
    Ok(())
}
