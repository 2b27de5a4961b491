//! Embedding and reranking models.
//!
//! The candle models load from `<model_dir>/<model name>` (tokenizer.json,
//! config.json and safetensors or pytorch weights). Setting
//! `LEXFUSE_USE_FAKE_EMBEDDINGS=1` swaps in the deterministic hash models.

use anyhow::Result;
use std::path::Path;
use std::sync::Arc;
use tracing::info;

use lexfuse_core::config::{DenseConfig, RerankerConfig};
use lexfuse_core::traits::{Embedder, PairScorer};

pub mod cross_encoder;
pub mod device;
pub mod hash;
pub mod model;
pub mod pool;
pub mod tokenize;

pub use cross_encoder::CrossEncoderScorer;
pub use hash::{HashEmbedder, HashPairScorer};
pub use model::BgeEmbedder;
pub use pool::masked_mean;

pub const FAKE_MODELS_ENV: &str = "LEXFUSE_USE_FAKE_EMBEDDINGS";
pub const HASH_DIM: usize = 1024;

pub fn use_fake_models() -> bool {
    std::env::var(FAKE_MODELS_ENV)
        .ok()
        .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
        .unwrap_or(false)
}

pub fn get_default_embedder(config: &DenseConfig, model_root: &Path) -> Result<Arc<dyn Embedder>> {
    if use_fake_models() {
        info!("using hash embedder");
        return Ok(Arc::new(HashEmbedder::new(HASH_DIM)));
    }
    Ok(Arc::new(BgeEmbedder::load(model_root, &config.model, config.device, config.normalize_embeddings)?))
}

pub fn get_default_scorer(config: &RerankerConfig, model_root: &Path) -> Result<Arc<dyn PairScorer>> {
    if use_fake_models() {
        info!("using hash pair scorer");
        return Ok(Arc::new(HashPairScorer::new(HASH_DIM)));
    }
    Ok(Arc::new(CrossEncoderScorer::load(model_root, &config.model, config.device)?))
}
