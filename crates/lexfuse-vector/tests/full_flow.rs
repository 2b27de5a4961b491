use std::sync::Arc;

use lexfuse_core::config::DenseConfig;
use lexfuse_core::traits::{Embedder, Retriever};
use lexfuse_core::types::{Chunk, Meta, Origin};
use lexfuse_core::ErrorKind;
use lexfuse_embed::HashEmbedder;
use lexfuse_vector::{load_dense_index, save_dense_index, BuildOptions, DenseIndex, DenseRetriever, EmbeddingCache};

fn chunks() -> Vec<Chunk> {
    [
        ("viaticos:0", "Monto máximo de viáticos: S/ 320.00 (VIÁTICO POR DÍA)"),
        ("viaticos:1", "La rendición de cuentas de viáticos se presenta en diez días"),
        ("caja:0", "El fondo de caja chica cubre gastos menores y urgentes"),
        ("vacaciones:0", "Treinta días de descanso vacacional por año de servicio"),
    ]
    .into_iter()
    .map(|(id, text)| Chunk::new(id, id.split(':').next().unwrap_or(id), text, Meta::new()))
    .collect()
}

fn build(embedder: &HashEmbedder) -> DenseIndex {
    DenseIndex::build(&chunks(), embedder, &EmbeddingCache::new(), BuildOptions::default(), "v1").expect("build")
}

#[test]
fn dense_retriever_finds_the_overlapping_chunk() {
    let embedder = Arc::new(HashEmbedder::new(512));
    let index = Arc::new(build(&embedder));
    let retriever = DenseRetriever::new(index, embedder, &DenseConfig::default()).expect("retriever");
    assert_eq!(retriever.origin(), Origin::Dense);

    let hits = retriever.search("monto máximo de viáticos", 3).expect("search");
    assert_eq!(hits.len(), 3);
    assert_eq!(hits[0].chunk_id, "viaticos:0");
    assert!(hits.windows(2).all(|w| w[0].raw_score >= w[1].raw_score));
    assert!(retriever.search("   ", 3).expect("search").is_empty());
}

#[test]
fn retriever_refuses_a_different_model() {
    let index = Arc::new(build(&HashEmbedder::new(64)));
    let other: Arc<dyn Embedder> = Arc::new(HashEmbedder::new(32));
    let err = DenseRetriever::new(index, other, &DenseConfig::default()).err().expect("mismatch");
    assert_eq!(err.kind(), ErrorKind::Configuration);
}

#[tokio::test]
async fn lance_round_trip_preserves_search_results() -> anyhow::Result<()> {
    let tmp = tempfile::tempdir()?;
    let dir = tmp.path().join("v1/dense");
    let embedder = HashEmbedder::new(128);
    let index = build(&embedder);
    save_dense_index(&dir, &index).await?;

    let loaded = load_dense_index(&dir, "v1", embedder.model_id()).await?;
    assert_eq!(loaded.chunk_ids(), index.chunk_ids());
    assert_eq!(loaded.dim(), 128);
    let q = embedder.embed("caja chica");
    assert_eq!(loaded.search_vector(&q, 4, 0.0), index.search_vector(&q, 4, 0.0));

    // Saving again replaces the previous contents.
    save_dense_index(&dir, &loaded).await?;
    assert_eq!(load_dense_index(&dir, "v1", embedder.model_id()).await?.len(), 4);
    Ok(())
}

#[tokio::test]
async fn lance_index_for_another_version_or_model_is_rejected() -> anyhow::Result<()> {
    let tmp = tempfile::tempdir()?;
    let dir = tmp.path().join("dense");
    let embedder = HashEmbedder::new(16);
    save_dense_index(&dir, &build(&embedder)).await?;

    let wrong_version = load_dense_index(&dir, "v2", embedder.model_id()).await.err().expect("version mismatch");
    assert_eq!(wrong_version.kind(), ErrorKind::IndexSchema);
    let wrong_model = load_dense_index(&dir, "v1", "BAAI/bge-m3").await.err().expect("model mismatch");
    assert_eq!(wrong_model.kind(), ErrorKind::IndexSchema);
    Ok(())
}
