use serde::{Deserialize, Serialize};

use lexfuse_core::config::PipelineConfig;
use lexfuse_core::error::Result;
use lexfuse_hybrid::PipelineVariant;

/// Parameters an evaluation variant may change on top of the base config.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ConfigOverrides {
    pub chunk_size: Option<usize>,
    pub chunk_overlap: Option<usize>,
    pub bm25_weight: Option<f32>,
    pub dense_weight: Option<f32>,
    pub rrf_k: Option<f32>,
    pub dedup_threshold: Option<f32>,
}

impl ConfigOverrides {
    /// Apply on top of `base` and validate the result.
    pub fn apply(&self, base: &PipelineConfig) -> Result<PipelineConfig> {
        let mut config = base.clone();
        if let Some(v) = self.chunk_size {
            config.chunking.chunk_size = v;
        }
        if let Some(v) = self.chunk_overlap {
            config.chunking.chunk_overlap = v;
        }
        if let Some(v) = self.bm25_weight {
            config.fusion.weights.bm25 = v;
        }
        if let Some(v) = self.dense_weight {
            config.fusion.weights.dense = v;
        }
        if let Some(v) = self.rrf_k {
            config.fusion.rrf_k = v;
        }
        if let Some(v) = self.dedup_threshold {
            config.fusion.deduplication.threshold = v;
        }
        config.validate()?;
        Ok(config)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvalVariant {
    pub name: String,
    pub variant: PipelineVariant,
    #[serde(default)]
    pub overrides: ConfigOverrides,
}

impl EvalVariant {
    pub fn new(name: impl Into<String>, variant: PipelineVariant) -> Self {
        Self { name: name.into(), variant, overrides: ConfigOverrides::default() }
    }

    pub fn with_overrides(mut self, overrides: ConfigOverrides) -> Self {
        self.overrides = overrides;
        self
    }

    pub fn sparse_only() -> Self {
        Self::new("sparse_only", PipelineVariant::SparseOnly)
    }

    pub fn dense_only() -> Self {
        Self::new("dense_only", PipelineVariant::DenseOnly)
    }

    pub fn fused_without_rerank() -> Self {
        Self::new("fused_without_rerank", PipelineVariant::FusedWithoutRerank)
    }

    pub fn full_pipeline() -> Self {
        Self::new("full_pipeline", PipelineVariant::Full)
    }

    /// The four stage ablations, in that order.
    pub fn ablations() -> Vec<Self> {
        vec![Self::sparse_only(), Self::dense_only(), Self::fused_without_rerank(), Self::full_pipeline()]
    }

    /// Full pipeline for every `(size, overlap)` pair with `overlap < size`.
    pub fn chunking_sweep(sizes: &[usize], overlaps: &[usize]) -> Vec<Self> {
        sizes
            .iter()
            .flat_map(|&size| overlaps.iter().map(move |&overlap| (size, overlap)))
            .filter(|(size, overlap)| overlap < size)
            .map(|(size, overlap)| {
                Self::new(format!("chunking_{size}_{overlap}"), PipelineVariant::Full).with_overrides(ConfigOverrides {
                    chunk_size: Some(size),
                    chunk_overlap: Some(overlap),
                    ..ConfigOverrides::default()
                })
            })
            .collect()
    }

    /// Full pipeline for every `(bm25 weight, dense weight, rrf_k)` point.
    pub fn fusion_sweep(points: &[(f32, f32, f32)]) -> Vec<Self> {
        points
            .iter()
            .map(|&(bm25, dense, rrf_k)| {
                Self::new(format!("fusion_{bm25}_{dense}_{rrf_k}"), PipelineVariant::Full).with_overrides(
                    ConfigOverrides {
                        bm25_weight: Some(bm25),
                        dense_weight: Some(dense),
                        rrf_k: Some(rrf_k),
                        ..ConfigOverrides::default()
                    },
                )
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lexfuse_core::ErrorKind;

    #[test]
    fn chunking_sweep_skips_impossible_pairs() {
        let sweep = EvalVariant::chunking_sweep(&[100, 400], &[50, 200]);
        let names: Vec<_> = sweep.iter().map(|v| v.name.as_str()).collect();
        assert_eq!(names, vec!["chunking_100_50", "chunking_400_50", "chunking_400_200"]);
    }

    #[test]
    fn fusion_sweep_overrides_weights_and_rrf_k() {
        let sweep = EvalVariant::fusion_sweep(&[(0.4, 0.6, 60.0), (0.7, 0.3, 10.0)]);
        let config = sweep[1].overrides.apply(&PipelineConfig::default()).unwrap();
        assert_eq!(config.fusion.weights.bm25, 0.7);
        assert_eq!(config.fusion.weights.dense, 0.3);
        assert_eq!(config.fusion.rrf_k, 10.0);
        assert_eq!(sweep[0].name, "fusion_0.4_0.6_60");
    }

    #[test]
    fn invalid_overrides_fail_validation() {
        let overrides = ConfigOverrides { bm25_weight: Some(0.0), dense_weight: Some(0.0), ..Default::default() };
        let err = overrides.apply(&PipelineConfig::default()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::FusionConfig);

        let overrides = ConfigOverrides { chunk_size: Some(100), chunk_overlap: Some(100), ..Default::default() };
        assert_eq!(overrides.apply(&PipelineConfig::default()).unwrap_err().kind(), ErrorKind::Chunking);
    }
}
