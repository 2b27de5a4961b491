//! Pipeline configuration: typed sections, figment loading and validation.
//!
//! Sources are merged in order: built-in defaults, `lexfuse.toml`,
//! `lexfuse.<env>.toml` (env from `RUST_ENV`), then `LEXFUSE_<SECTION>__<KEY>`
//! environment variables. Validation happens once, at load time, and again
//! when a pipeline is constructed; nothing is re-parsed per query.

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::env;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::types::Origin;

const ENV_PREFIX: &str = "LEXFUSE_";
const SECTIONS: [&str; 6] = ["chunking", "sparse", "dense", "fusion", "reranker", "paths"];

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PipelineConfig {
    pub chunking: ChunkingConfig,
    pub sparse: SparseConfig,
    pub dense: DenseConfig,
    pub fusion: FusionConfig,
    pub reranker: RerankerConfig,
    pub paths: PathsConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SplitUnit {
    Paragraph,
    #[serde(alias = "fixed_length")]
    Fixed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ChunkingConfig {
    /// Maximum chunk length in characters.
    pub chunk_size: usize,
    /// Maximum number of characters shared by consecutive chunks.
    pub chunk_overlap: usize,
    pub split_unit: SplitUnit,
    /// Document metadata keys copied onto each chunk.
    pub metadata_fields: Vec<String>,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_size: 1000,
            chunk_overlap: 200,
            split_unit: SplitUnit::Paragraph,
            metadata_fields: ["source", "title", "date", "category"].iter().map(|s| s.to_string()).collect(),
        }
    }
}

impl ChunkingConfig {
    pub fn validate(&self) -> Result<()> {
        if self.chunk_size == 0 {
            return Err(Error::Chunking("chunk_size must be greater than zero".into()));
        }
        if self.chunk_overlap >= self.chunk_size {
            return Err(Error::Chunking(format!(
                "chunk_overlap ({}) must be smaller than chunk_size ({})",
                self.chunk_overlap, self.chunk_size
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TextLanguage {
    Spanish,
    English,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SparseConfig {
    pub enabled: bool,
    pub k: usize,
    pub k1: f32,
    pub b: f32,
    pub score_threshold: f32,
    pub stemming: bool,
    pub stopwords: bool,
    pub language: TextLanguage,
}

impl Default for SparseConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            k: 8,
            k1: 1.5,
            b: 0.75,
            score_threshold: 0.0,
            stemming: true,
            stopwords: true,
            language: TextLanguage::Spanish,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DenseConfig {
    pub enabled: bool,
    pub k: usize,
    pub score_threshold: f32,
    /// Embedding model identifier; must match the one the index was built with.
    pub model: String,
    pub embedding_batch_size: usize,
    pub normalize_embeddings: bool,
    pub device: DeviceHint,
}

impl Default for DenseConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            k: 8,
            score_threshold: 0.0,
            model: "BAAI/bge-m3".to_string(),
            embedding_batch_size: 32,
            normalize_embeddings: true,
            device: DeviceHint::Auto,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FusionMethod {
    Rrf,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FusionWeights {
    pub bm25: f32,
    pub dense: f32,
}

impl Default for FusionWeights {
    fn default() -> Self {
        Self { bm25: 0.4, dense: 0.6 }
    }
}

impl FusionWeights {
    pub fn get(&self, origin: Origin) -> f32 {
        match origin {
            Origin::Sparse => self.bm25,
            Origin::Dense => self.dense,
        }
    }

    pub fn total(&self) -> f32 {
        self.bm25 + self.dense
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DeduplicationConfig {
    pub enabled: bool,
    /// Cosine similarity above which two chunks are considered duplicates.
    pub threshold: f32,
}

impl Default for DeduplicationConfig {
    fn default() -> Self {
        Self { enabled: true, threshold: 0.92 }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FusionConfig {
    pub method: FusionMethod,
    pub rrf_k: f32,
    pub k: usize,
    pub weights: FusionWeights,
    pub deduplication: DeduplicationConfig,
}

impl Default for FusionConfig {
    fn default() -> Self {
        Self {
            method: FusionMethod::Rrf,
            rrf_k: 60.0,
            k: 8,
            weights: FusionWeights::default(),
            deduplication: DeduplicationConfig::default(),
        }
    }
}

impl FusionConfig {
    /// Checks the parameters the RRF formula depends on.
    pub fn validate(&self) -> Result<()> {
        if !self.rrf_k.is_finite() || self.rrf_k <= 0.0 {
            return Err(Error::FusionConfig(format!("rrf_k must be positive, got {}", self.rrf_k)));
        }
        for origin in Origin::ALL {
            let w = self.weights.get(origin);
            if !w.is_finite() || w < 0.0 {
                return Err(Error::FusionConfig(format!("weight for {origin} must be a non-negative number, got {w}")));
            }
        }
        if self.weights.total() <= 0.0 {
            return Err(Error::FusionConfig("fusion weights must sum to a positive value".into()));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceHint {
    Auto,
    Cpu,
    Cuda,
    Metal,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RerankerConfig {
    pub enabled: bool,
    pub model: String,
    pub device: DeviceHint,
    pub batch_size: usize,
    pub k: usize,
    pub score_threshold: f32,
    pub timeout_ms: u64,
}

impl Default for RerankerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            model: "BAAI/bge-reranker-v2-m3".to_string(),
            device: DeviceHint::Auto,
            batch_size: 16,
            k: 5,
            score_threshold: 0.0,
            timeout_ms: 30_000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PathsConfig {
    pub index_dir: String,
    pub model_dir: String,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self { index_dir: "data/indexes".to_string(), model_dir: "models".to_string() }
    }
}

impl PipelineConfig {
    /// Load `lexfuse.toml` from the working directory plus overlays.
    pub fn load() -> Result<Self> {
        Self::load_from(Path::new("lexfuse.toml"))
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        let env_name = env::var("RUST_ENV").unwrap_or_else(|_| "dev".to_string());
        if !path.is_file() {
            warn!(path = %path.display(), "configuration file not found; using defaults");
        }
        let mut figment = Figment::from(Serialized::defaults(PipelineConfig::default())).merge(Toml::file(path));
        if let Some(overlay) = env_overlay(path, &env_name) {
            if overlay.is_file() {
                debug!(overlay = %overlay.display(), env = %env_name, "layering environment configuration");
            }
            figment = figment.merge(Toml::file(overlay));
        }
        figment = figment.merge(
            Env::prefixed(ENV_PREFIX)
                .filter(|key| {
                    let key = key.as_str().to_ascii_lowercase();
                    SECTIONS.iter().any(|s| key.starts_with(&format!("{s}__")))
                })
                .split("__"),
        );
        Self::extract(&figment)
    }

    /// Parse a TOML document on top of the defaults (no files, no env).
    pub fn from_toml(source: &str) -> Result<Self> {
        let figment = Figment::from(Serialized::defaults(PipelineConfig::default())).merge(Toml::string(source));
        Self::extract(&figment)
    }

    fn extract(figment: &Figment) -> Result<Self> {
        let config: PipelineConfig = figment.extract().map_err(|e| Error::Configuration(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        self.chunking.validate()?;
        self.fusion.validate()?;

        if !self.sparse.enabled && !self.dense.enabled {
            return Err(Error::Configuration("at least one retriever must be enabled".into()));
        }
        let s = &self.sparse;
        if s.k == 0 {
            return Err(Error::Configuration("sparse.k must be greater than zero".into()));
        }
        if !s.k1.is_finite() || s.k1 < 0.0 {
            return Err(Error::Configuration(format!("sparse.k1 must be non-negative, got {}", s.k1)));
        }
        if !(0.0..=1.0).contains(&s.b) {
            return Err(Error::Configuration(format!("sparse.b must lie in [0, 1], got {}", s.b)));
        }
        if !s.score_threshold.is_finite() {
            return Err(Error::Configuration("sparse.score_threshold must be finite".into()));
        }

        let d = &self.dense;
        if d.k == 0 || d.embedding_batch_size == 0 {
            return Err(Error::Configuration("dense.k and dense.embedding_batch_size must be greater than zero".into()));
        }
        if d.model.trim().is_empty() {
            return Err(Error::Configuration("dense.model must name an embedding model".into()));
        }
        if !d.score_threshold.is_finite() {
            return Err(Error::Configuration("dense.score_threshold must be finite".into()));
        }

        if self.fusion.k == 0 {
            return Err(Error::Configuration("fusion.k must be greater than zero".into()));
        }
        let dedup = &self.fusion.deduplication;
        if !(-1.0..=1.0).contains(&dedup.threshold) {
            return Err(Error::Configuration(format!(
                "fusion.deduplication.threshold must lie in [-1, 1], got {}",
                dedup.threshold
            )));
        }

        let r = &self.reranker;
        if r.k == 0 || r.batch_size == 0 || r.timeout_ms == 0 {
            return Err(Error::Configuration(
                "reranker.k, reranker.batch_size and reranker.timeout_ms must be greater than zero".into(),
            ));
        }
        if r.enabled && r.model.trim().is_empty() {
            return Err(Error::Configuration("reranker.model must name a reranking model".into()));
        }
        if !r.score_threshold.is_finite() {
            return Err(Error::Configuration("reranker.score_threshold must be finite".into()));
        }
        Ok(())
    }

    /// Length bound shared by every pipeline variant.
    pub fn final_k(&self) -> usize {
        self.fusion.k.min(self.reranker.k)
    }

    pub fn index_dir(&self) -> PathBuf {
        expand_path(&self.paths.index_dir)
    }

    pub fn model_dir(&self) -> PathBuf {
        expand_path(&self.paths.model_dir)
    }
}

fn env_overlay(base: &Path, env_name: &str) -> Option<PathBuf> {
    let profile = match env_name {
        "dev" | "development" => "dev",
        "prod" | "production" => "prod",
        "test" | "testing" => "test",
        _ => return None,
    };
    let stem = base.file_stem()?.to_string_lossy();
    Some(base.with_file_name(format!("{stem}.{profile}.toml")))
}

/// Expand a user-provided path string:
/// - Expands leading '~' to the user's home directory
/// - Expands ${VAR} and $VAR environment variables
/// - Returns a PathBuf without attempting to canonicalize
pub fn expand_path<S: AsRef<str>>(input: S) -> PathBuf {
    let s = input.as_ref();
    let expanded_env = shellexpand::env(s).unwrap_or(std::borrow::Cow::Borrowed(s));
    let expanded = shellexpand::tilde(&expanded_env);
    PathBuf::from(expanded.as_ref())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        PipelineConfig::default().validate().expect("defaults validate");
    }

    #[test]
    fn overlap_not_smaller_than_size_is_a_chunking_error() {
        let mut config = PipelineConfig::default();
        config.chunking.chunk_overlap = config.chunking.chunk_size;
        let err = config.validate().unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::Chunking);
    }

    #[test]
    fn non_positive_rrf_k_is_a_fusion_error() {
        let mut config = PipelineConfig::default();
        config.fusion.rrf_k = 0.0;
        assert_eq!(config.validate().unwrap_err().kind(), crate::ErrorKind::FusionConfig);
    }

    #[test]
    fn zero_weights_are_a_fusion_error() {
        let mut config = PipelineConfig::default();
        config.fusion.weights = FusionWeights { bm25: 0.0, dense: 0.0 };
        assert_eq!(config.validate().unwrap_err().kind(), crate::ErrorKind::FusionConfig);
    }

    #[test]
    fn negative_weight_is_a_fusion_error() {
        let mut config = PipelineConfig::default();
        config.fusion.weights = FusionWeights { bm25: -0.5, dense: 1.0 };
        assert_eq!(config.validate().unwrap_err().kind(), crate::ErrorKind::FusionConfig);
    }

    #[test]
    fn both_retrievers_disabled_is_rejected() {
        let mut config = PipelineConfig::default();
        config.sparse.enabled = false;
        config.dense.enabled = false;
        assert_eq!(config.validate().unwrap_err().kind(), crate::ErrorKind::Configuration);
    }

    #[test]
    fn sample_config_matches_defaults() {
        let config = PipelineConfig::from_toml(include_str!("../../../lexfuse.toml")).expect("sample config");
        assert_eq!(config, PipelineConfig::default());
    }

    #[test]
    fn unknown_option_is_rejected() {
        let err = PipelineConfig::from_toml("[sparse]\nk3 = 1.0\n").unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::Configuration);
    }

    #[test]
    fn toml_overrides_merge_over_defaults() {
        let config = PipelineConfig::from_toml(
            r#"
            [fusion]
            rrf_k = 30
            weights = { bm25 = 0.5, dense = 0.5 }

            [chunking]
            split_unit = "fixed"
            "#,
        )
        .expect("valid toml");
        assert_eq!(config.fusion.rrf_k, 30.0);
        assert_eq!(config.fusion.weights.bm25, 0.5);
        assert_eq!(config.chunking.split_unit, SplitUnit::Fixed);
        assert_eq!(config.sparse, SparseConfig::default());
    }

    #[test]
    fn env_profile_and_variables_are_layered() {
        figment::Jail::expect_with(|jail| {
            jail.create_file("lexfuse.toml", "[sparse]\nk = 20\n")?;
            jail.create_file("lexfuse.test.toml", "[sparse]\nk1 = 1.2\n")?;
            jail.set_env("RUST_ENV", "test");
            jail.set_env("LEXFUSE_FUSION__K", "4");
            jail.set_env("LEXFUSE_USE_FAKE_EMBEDDINGS", "1");
            let config = PipelineConfig::load_from(Path::new("lexfuse.toml"))
                .map_err(|e| figment::Error::from(e.to_string()))?;
            assert_eq!(config.sparse.k, 20);
            assert_eq!(config.sparse.k1, 1.2);
            assert_eq!(config.fusion.k, 4);
            Ok(())
        });
    }

    #[test]
    fn missing_file_loads_the_defaults() {
        figment::Jail::expect_with(|_jail| {
            let config = PipelineConfig::load_from(Path::new("absent.toml"))
                .map_err(|e| figment::Error::from(e.to_string()))?;
            assert_eq!(config.sparse, SparseConfig::default());
            assert_eq!(config.final_k(), PipelineConfig::default().final_k());
            Ok(())
        });
    }

    #[test]
    fn final_k_is_the_smaller_of_fusion_and_rerank_k() {
        let mut config = PipelineConfig::default();
        config.fusion.k = 8;
        config.reranker.k = 5;
        assert_eq!(config.final_k(), 5);
        config.reranker.k = 12;
        assert_eq!(config.final_k(), 8);
    }
}
