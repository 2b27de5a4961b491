//! Hybrid retrieval: rank fusion, deduplication, reranking and the
//! per-query pipeline that ties the sparse and dense retrievers together.
mod cancel;
pub mod corpus;
pub mod fusion;
pub mod pipeline;
pub mod rerank;
pub mod variant;

pub use corpus::{derive_corpus_version, read_active_version, write_active_version, ChunkStore, CorpusHandle, CorpusIndex};
pub use fusion::{deduplicate, RankedList, ScoreFuser};
pub use pipeline::{HybridPipeline, QueryOutcome, QueryStage, QueryTrace, StageTiming};
pub use rerank::{Degradation, RerankCandidate, RerankOutcome, Reranked, Reranker};
pub use variant::{PipelineVariant, StagePlan};
