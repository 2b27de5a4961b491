//! Dense retrieval: embedding cache, brute-force cosine index and its
//! LanceDB-backed persistence.
pub mod cache;
pub mod index_build;
pub mod schema;
pub mod search;
pub mod store;

pub use cache::{CacheStats, EmbeddingCache};
pub use index_build::{BuildOptions, DenseIndex};
pub use search::DenseRetriever;
pub use store::{load_dense_index, save_dense_index};
