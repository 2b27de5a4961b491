//! lexfuse-text
//!
//! Lexical retrieval: a tantivy analyzer chain feeding an in-memory BM25 index,
//! plus the versioned on-disk envelope the index is persisted in.
pub mod analyzer;
pub mod index;
pub mod persist;
pub mod search;

pub use analyzer::{Analyzer, AnalyzerConfig};
pub use index::{Bm25Params, SparseIndex};
pub use search::SparseRetriever;
