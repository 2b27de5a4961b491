use std::sync::Arc;

use lexfuse_core::config::DenseConfig;
use lexfuse_core::error::{Error, Result};
use lexfuse_core::similarity::normalize;
use lexfuse_core::traits::{Embedder, Retriever};
use lexfuse_core::types::{Origin, RetrievalHit};

use crate::index_build::DenseIndex;

/// `Retriever` that embeds the query and scans a shared [`DenseIndex`].
pub struct DenseRetriever {
    index: Arc<DenseIndex>,
    embedder: Arc<dyn Embedder>,
    score_threshold: f32,
}

impl DenseRetriever {
    /// Fails with `Error::Configuration` when `embedder` is not the model the index was built with.
    pub fn new(index: Arc<DenseIndex>, embedder: Arc<dyn Embedder>, config: &DenseConfig) -> Result<Self> {
        if embedder.model_id() != index.model_id() {
            return Err(Error::Configuration(format!(
                "query embedder {} does not match index model {}",
                embedder.model_id(),
                index.model_id()
            )));
        }
        if embedder.dim() != index.dim() {
            return Err(Error::Configuration(format!(
                "query embedder produces {} dimensions, index stores {}",
                embedder.dim(),
                index.dim()
            )));
        }
        Ok(Self { index, embedder, score_threshold: config.score_threshold })
    }

    pub fn index(&self) -> &Arc<DenseIndex> {
        &self.index
    }
}

impl Retriever for DenseRetriever {
    fn origin(&self) -> Origin {
        Origin::Dense
    }

    fn search(&self, query: &str, k: usize) -> anyhow::Result<Vec<RetrievalHit>> {
        if query.trim().is_empty() || k == 0 || self.index.is_empty() {
            return Ok(Vec::new());
        }
        let mut vectors = self.embedder.embed_batch(&[query.to_string()])?;
        let Some(mut q) = vectors.pop() else {
            anyhow::bail!("embedder returned no vector for the query");
        };
        if self.index.is_normalized() {
            normalize(&mut q);
        }
        Ok(self.index.search_vector(&q, k, self.score_threshold))
    }
}
