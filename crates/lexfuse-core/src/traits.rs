use crate::types::{ChunkId, Origin, RetrievalHit};

/// A query-time ranking source. Implementations are read-only after build.
pub trait Retriever: Send + Sync {
    fn origin(&self) -> Origin;
    fn search(&self, query: &str, k: usize) -> anyhow::Result<Vec<RetrievalHit>>;
}

pub trait Embedder: Send + Sync {
    /// Stable identifier for the model (e.g. `BAAI/bge-m3`).
    fn model_id(&self) -> &str;
    fn dim(&self) -> usize;
    fn embed_batch(&self, texts: &[String]) -> anyhow::Result<Vec<Vec<f32>>>;
}

/// Pairwise relevance model used for reranking.
///
/// Each `(query, passage)` pair must be scored independently of the others
/// in the same call; batching is a throughput concern only.
pub trait PairScorer: Send + Sync {
    fn model_id(&self) -> &str;
    fn score_pairs(&self, query: &str, passages: &[&str]) -> anyhow::Result<Vec<f32>>;
}

/// Similarity between two indexed chunks, when both are known.
pub trait PairSimilarity: Send + Sync {
    fn similarity(&self, a: &ChunkId, b: &ChunkId) -> Option<f32>;
}
