use lexfuse_core::config::{DenseConfig, RerankerConfig};
use lexfuse_embed::{get_default_embedder, get_default_scorer, FAKE_MODELS_ENV, HASH_DIM};

#[test]
fn fake_models_shapes_and_determinism() {
    // Force the hash models to avoid loading large weights.
    std::env::set_var(FAKE_MODELS_ENV, "1");
    let root = std::path::Path::new("does-not-exist");

    let embedder = get_default_embedder(&DenseConfig::default(), root).expect("embedder");
    let texts = vec!["hola mundo".to_string(), "hola mundo".to_string()];
    let embs = embedder.embed_batch(&texts).expect("embed_batch");
    let (v1, v2) = (&embs[0], &embs[1]);

    assert_eq!(v1.len(), HASH_DIM);
    assert_eq!(embedder.dim(), HASH_DIM);
    let norm: f32 = v1.iter().map(|x| x * x).sum::<f32>().sqrt();
    assert!((norm - 1.0).abs() <= 1e-3, "vector is L2-normalized (norm={norm})");
    for (a, b) in v1.iter().zip(v2.iter()) {
        assert!((a - b).abs() <= 1e-6);
    }

    let scorer = get_default_scorer(&RerankerConfig::default(), root).expect("scorer");
    let scores = scorer.score_pairs("hola", &["hola mundo", "adiós"]).expect("scores");
    assert_eq!(scores.len(), 2);
    assert!(scores[0] > scores[1]);
}

#[test]
fn missing_model_directory_is_an_error() {
    let root = std::path::Path::new("does-not-exist");
    let loaded = lexfuse_embed::BgeEmbedder::load(root, "BAAI/bge-m3", lexfuse_core::config::DeviceHint::Cpu, true);
    assert!(loaded.is_err());
}
