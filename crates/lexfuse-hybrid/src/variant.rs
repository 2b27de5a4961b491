use serde::{Deserialize, Serialize};
use std::fmt;

use lexfuse_core::config::PipelineConfig;

/// Which stages of the pipeline a query runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineVariant {
    SparseOnly,
    DenseOnly,
    FusedWithoutRerank,
    /// Every stage, regardless of the `enabled` switches in the config.
    Full,
    /// Whatever the config's `enabled` switches say.
    Configured,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StagePlan {
    pub sparse: bool,
    pub dense: bool,
    pub dedup: bool,
    pub rerank: bool,
}

impl PipelineVariant {
    pub fn plan(self, config: &PipelineConfig) -> StagePlan {
        match self {
            PipelineVariant::SparseOnly => StagePlan { sparse: true, dense: false, dedup: false, rerank: false },
            PipelineVariant::DenseOnly => StagePlan { sparse: false, dense: true, dedup: false, rerank: false },
            PipelineVariant::FusedWithoutRerank => StagePlan {
                sparse: config.sparse.enabled,
                dense: config.dense.enabled,
                dedup: config.fusion.deduplication.enabled,
                rerank: false,
            },
            PipelineVariant::Full => StagePlan { sparse: true, dense: true, dedup: true, rerank: true },
            PipelineVariant::Configured => StagePlan {
                sparse: config.sparse.enabled,
                dense: config.dense.enabled,
                dedup: config.fusion.deduplication.enabled,
                rerank: config.reranker.enabled,
            },
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            PipelineVariant::SparseOnly => "sparse_only",
            PipelineVariant::DenseOnly => "dense_only",
            PipelineVariant::FusedWithoutRerank => "fused_without_rerank",
            PipelineVariant::Full => "full",
            PipelineVariant::Configured => "configured",
        }
    }
}

impl fmt::Display for PipelineVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl StagePlan {
    pub fn retriever_count(&self) -> usize {
        usize::from(self.sparse) + usize::from(self.dense)
    }
}
