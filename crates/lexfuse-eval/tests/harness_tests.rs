use std::sync::Arc;

use lexfuse_core::config::{ChunkingConfig, PipelineConfig};
use lexfuse_core::types::Document;
use lexfuse_embed::{HashEmbedder, HashPairScorer, HASH_DIM};
use lexfuse_eval::{load_queries, ConfigOverrides, EvalVariant, EvaluationHarness, LabeledQuery};

fn documents() -> Vec<Document> {
    vec![
        Document::new(
            "directiva-viaticos",
            "Artículo 5. Monto máximo de viáticos: S/ 320.00 (VIÁTICO POR DÍA).\n\n\
             Artículo 6. Los viáticos comprenden alimentación, hospedaje y movilidad local.",
        )
        .with_meta("category", "viaticos"),
        Document::new(
            "reglamento-caja-chica",
            "Artículo 3. El fondo de caja chica se destina a gastos menores y urgentes.\n\n\
             Artículo 4. Cada pago con caja chica no supera el 10% de una UIT.",
        )
        .with_meta("category", "tesoreria"),
        Document::new(
            "directiva-vacaciones",
            "Artículo 2. El servidor tiene derecho a treinta días de descanso vacacional por año.",
        ),
    ]
}

fn queries() -> Vec<LabeledQuery> {
    vec![
        LabeledQuery::new("viaticos", "¿Cuál es el monto máximo para viáticos?")
            .with_answer("S/ 320.00")
            .with_document("directiva-viaticos"),
        LabeledQuery::new("caja", "fondo de caja chica").with_meta("category", "tesoreria"),
        LabeledQuery::new("vacaciones", "descanso vacacional").with_document("directiva-vacaciones"),
    ]
}

fn config() -> PipelineConfig {
    let mut config = PipelineConfig::default();
    config.chunking = ChunkingConfig { chunk_size: 120, chunk_overlap: 20, ..ChunkingConfig::default() };
    config
}

fn harness() -> EvaluationHarness {
    EvaluationHarness::new(
        config(),
        documents(),
        Some(Arc::new(HashEmbedder::new(HASH_DIM))),
        Some(Arc::new(HashPairScorer::new(HASH_DIM))),
    )
    .unwrap()
}

#[tokio::test]
async fn ablations_report_every_variant() {
    let report = harness().run_all(&EvalVariant::ablations(), &queries()).await.unwrap();
    assert_eq!(report.queries, 3);
    assert_eq!(report.documents, 3);
    let names: Vec<_> = report.variants.iter().map(|v| v.name.as_str()).collect();
    assert_eq!(names, vec!["sparse_only", "dense_only", "fused_without_rerank", "full_pipeline"]);

    for variant in &report.variants {
        assert_eq!(variant.metrics.queries, 3);
        assert_eq!(variant.metrics.failed, 0);
        assert_eq!(variant.per_query.len(), 3);
        assert_eq!(variant.per_query[0].query_id, "viaticos", "per-query rows keep input order");
        assert!(variant.per_query.iter().all(|q| q.results.len() <= variant.final_k));
        assert!(variant.metrics.latency.p95_ms >= variant.metrics.latency.p50_ms);
    }

    let full = &report.variants[3];
    assert_eq!(full.metrics.exact_match, Some(1.0));
    assert_eq!(full.metrics.relevance_at_k, Some(1.0));
    assert_eq!(full.per_query[0].reciprocal_rank, Some(1.0));
    assert!(full.metrics.mean_context_tokens > 0.0);

    let sparse = &report.variants[0];
    assert_eq!(sparse.metrics.relevance_at_k, Some(1.0));
    assert_eq!(sparse.metrics.degraded, 0);

    let json = report.to_json().unwrap();
    assert!(json.contains("\"full_pipeline\""));
    assert!(json.contains("\"generated_at\""));
}

#[tokio::test]
async fn corpora_are_memoized_per_chunking() {
    let harness = harness();
    let mut variants = EvalVariant::chunking_sweep(&[120, 60], &[20]);
    variants.push(EvalVariant::fused_without_rerank());
    let report = harness.run_all(&variants, &queries()).await.unwrap();

    let version = |name: &str| {
        report.variants.iter().find(|v| v.name == name).map(|v| v.corpus_version.clone()).unwrap()
    };
    assert_eq!(version("chunking_120_20"), version("fused_without_rerank"));
    assert_ne!(version("chunking_120_20"), version("chunking_60_20"));
    let chunks = |name: &str| report.variants.iter().find(|v| v.name == name).map(|v| v.chunks).unwrap();
    assert!(chunks("chunking_60_20") > chunks("chunking_120_20"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn concurrent_variants_share_one_corpus() {
    let harness = harness();
    let queries = queries();
    let sparse_variant = EvalVariant::sparse_only();
    let dense_variant = EvalVariant::dense_only();
    let (sparse, dense) = tokio::join!(
        harness.run(&sparse_variant, &queries),
        harness.run(&dense_variant, &queries),
    );
    let (sparse, dense) = (sparse.unwrap(), dense.unwrap());
    assert_eq!(sparse.corpus_version, dense.corpus_version);

    let again = harness.run(&EvalVariant::fused_without_rerank(), &queries).await.unwrap();
    assert_eq!(again.corpus_version, sparse.corpus_version);
}

#[tokio::test]
async fn fusion_sweep_runs_each_point() {
    let variants = EvalVariant::fusion_sweep(&[(0.4, 0.6, 60.0), (1.0, 0.0, 10.0)]);
    let report = harness().run_all(&variants, &queries()).await.unwrap();
    assert_eq!(report.variants.len(), 2);
    assert_eq!(report.variants[1].overrides.rrf_k, Some(10.0));
    assert_eq!(report.variants[0].metrics.relevance_at_k, Some(1.0));
}

#[tokio::test]
async fn unanswerable_variants_count_failures() {
    let harness = EvaluationHarness::new(config(), documents(), None, None).unwrap();
    let report = harness.run(&EvalVariant::dense_only(), &queries()).await.unwrap();
    assert_eq!(report.metrics.failed, 3);
    assert_eq!(report.metrics.relevance_at_k, Some(0.0));
    assert!(report.per_query.iter().all(|q| q.error.is_some()));

    let report = harness.run(&EvalVariant::full_pipeline(), &queries()).await.unwrap();
    assert_eq!(report.metrics.failed, 0);
    assert_eq!(report.metrics.degraded, 3, "no reranking model means every query is degraded");
}

#[tokio::test]
async fn invalid_overrides_fail_the_run() {
    let bad = EvalVariant::full_pipeline().with_overrides(ConfigOverrides {
        chunk_size: Some(50),
        chunk_overlap: Some(80),
        ..ConfigOverrides::default()
    });
    assert!(harness().run(&bad, &queries()).await.is_err());
}

#[test]
fn query_sets_load_from_disk() {
    let tmp = tempfile::TempDir::new().unwrap();
    let path = tmp.path().join("queries.jsonl");
    std::fs::write(
        &path,
        "{\"id\": \"q1\", \"query\": \"monto de viáticos\", \"expected_answer\": \"S/ 320.00\"}\n",
    )
    .unwrap();
    let queries = load_queries(&path).unwrap();
    assert_eq!(queries[0].id, "q1");

    std::fs::write(&path, "{\"id\": \"q1\"}\n").unwrap();
    let err = load_queries(&path).unwrap_err();
    assert!(err.to_string().contains("queries.jsonl"), "{err}");
}
