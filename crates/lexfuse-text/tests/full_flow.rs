use std::sync::Arc;

use lexfuse_core::chunker::Chunker;
use lexfuse_core::config::{ChunkingConfig, SparseConfig};
use lexfuse_core::traits::Retriever;
use lexfuse_core::types::{Document, Origin};
use lexfuse_text::{AnalyzerConfig, Bm25Params, SparseIndex, SparseRetriever};

fn corpus() -> Vec<Document> {
    vec![
        Document::new(
            "directiva-viaticos",
            "Artículo 5. Monto máximo de viáticos: S/ 320.00 (VIÁTICO POR DÍA).\n\n\
             Artículo 6. Los viáticos comprenden alimentación, hospedaje y movilidad local.",
        ),
        Document::new(
            "reglamento-caja-chica",
            "Artículo 3. El fondo de caja chica se destina a gastos menores y urgentes.\n\n\
             Artículo 4. El monto de cada pago con caja chica no supera el 10% de una UIT.",
        ),
        Document::new(
            "directiva-vacaciones",
            "Artículo 2. El servidor tiene derecho a treinta días de descanso vacacional por año.",
        ),
    ]
}

#[test]
fn sparse_full_flow() {
    let chunker = Chunker::new(ChunkingConfig { chunk_size: 120, chunk_overlap: 20, ..ChunkingConfig::default() })
        .expect("chunker");
    let chunks = chunker.chunk_all(&corpus());
    assert!(chunks.len() >= 5);

    let config = SparseConfig::default();
    let index = SparseIndex::build(&chunks, Bm25Params::from(&config), AnalyzerConfig::from(&config), "v1");
    let retriever = SparseRetriever::new(Arc::new(index), &config);
    assert_eq!(retriever.origin(), Origin::Sparse);

    let hits = retriever.search("¿Cuál es el monto máximo para viáticos?", 8).expect("search");
    assert!(!hits.is_empty());
    let top = chunks.iter().find(|c| c.id == hits[0].chunk_id).expect("top chunk exists");
    assert!(top.text.contains("S/ 320.00"), "unexpected top chunk: {}", top.text);
    for pair in hits.windows(2) {
        assert!(pair[0].raw_score >= pair[1].raw_score);
        assert_eq!(pair[1].rank, pair[0].rank + 1);
    }

    let vacation = retriever.search("vacaciones descanso", 3).expect("search");
    assert_eq!(vacation[0].chunk_id, "directiva-vacaciones:0");
}

#[test]
fn persisted_index_survives_a_reload() {
    let chunker = Chunker::new(ChunkingConfig::default()).expect("chunker");
    let chunks = chunker.chunk_all(&corpus());
    let config = SparseConfig::default();
    let analyzer = AnalyzerConfig::from(&config);
    let index = SparseIndex::build(&chunks, Bm25Params::from(&config), analyzer, "v7");

    let tmp = tempfile::TempDir::new().expect("tempdir");
    let path = tmp.path().join("indexes/v7/sparse.json");
    index.save(&path).expect("save");
    let loaded = SparseIndex::load(&path, "v7", &analyzer).expect("load");
    assert_eq!(loaded.corpus_version(), "v7");
    assert_eq!(loaded.search("caja chica", 4, 0.0), index.search("caja chica", 4, 0.0));
}
