//! Deterministic stand-ins for the neural models, used offline and in tests.

use anyhow::Result;
use std::hash::{Hash, Hasher};
use twox_hash::XxHash64;

use lexfuse_core::similarity::{cosine, normalize};
use lexfuse_core::traits::{Embedder, PairScorer};

pub const HASH_EMBEDDER_ID: &str = "lexfuse/hash-embedder";
pub const HASH_SCORER_ID: &str = "lexfuse/hash-pair-scorer";

/// Bag-of-words feature hashing into a fixed number of buckets, L2-normalised.
/// Texts sharing more words get higher cosine similarity.
#[derive(Debug, Clone)]
pub struct HashEmbedder {
    dim: usize,
}

impl HashEmbedder {
    pub fn new(dim: usize) -> Self {
        Self { dim: dim.max(1) }
    }

    pub fn embed(&self, text: &str) -> Vec<f32> {
        let mut v = vec![0f32; self.dim];
        let lowered = text.to_lowercase();
        for token in lowered.split(|c: char| !c.is_alphanumeric()).filter(|t| !t.is_empty()) {
            let mut hasher = XxHash64::with_seed(0);
            token.hash(&mut hasher);
            let h = hasher.finish();
            let idx = (h as usize) % self.dim;
            let val = (((h >> 32) as u32) as f32) / (u32::MAX as f32);
            v[idx] += 0.5 + 0.5 * val;
        }
        normalize(&mut v);
        v
    }
}

impl Embedder for HashEmbedder {
    fn model_id(&self) -> &str {
        HASH_EMBEDDER_ID
    }

    fn dim(&self) -> usize {
        self.dim
    }

    fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|t| self.embed(t)).collect())
    }
}

/// Scores a pair by the cosine of their hashed bag-of-words vectors.
#[derive(Debug, Clone)]
pub struct HashPairScorer {
    embedder: HashEmbedder,
}

impl HashPairScorer {
    pub fn new(dim: usize) -> Self {
        Self { embedder: HashEmbedder::new(dim) }
    }
}

impl PairScorer for HashPairScorer {
    fn model_id(&self) -> &str {
        HASH_SCORER_ID
    }

    fn score_pairs(&self, query: &str, passages: &[&str]) -> Result<Vec<f32>> {
        let q = self.embedder.embed(query);
        Ok(passages.iter().map(|p| cosine(&q, &self.embedder.embed(p))).collect())
    }
}
