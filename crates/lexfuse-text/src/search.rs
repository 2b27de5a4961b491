use std::sync::Arc;

use lexfuse_core::config::SparseConfig;
use lexfuse_core::traits::Retriever;
use lexfuse_core::types::{Origin, RetrievalHit};

use crate::index::SparseIndex;

/// `Retriever` over a shared, read-only [`SparseIndex`].
#[derive(Debug, Clone)]
pub struct SparseRetriever {
	index: Arc<SparseIndex>,
	score_threshold: f32,
}

impl SparseRetriever {
	pub fn new(index: Arc<SparseIndex>, config: &SparseConfig) -> Self {
		Self { index, score_threshold: config.score_threshold }
	}

	pub fn index(&self) -> &Arc<SparseIndex> {
		&self.index
	}
}

impl Retriever for SparseRetriever {
	fn origin(&self) -> Origin {
		Origin::Sparse
	}

	fn search(&self, query: &str, k: usize) -> anyhow::Result<Vec<RetrievalHit>> {
		Ok(self.index.search(query, k, self.score_threshold))
	}
}
