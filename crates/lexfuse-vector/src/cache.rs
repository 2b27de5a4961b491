//! In-memory embedding cache keyed by `(chunk id, content hash)`.
//!
//! The cache is bound to one corpus version, embedding model and
//! normalisation setting; binding it to anything else drops every entry.
//! Lock sections never span a model call.
use parking_lot::RwLock;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct CacheKey {
    chunk_id: String,
    content_hash: String,
}

/// What the stored vectors were produced for.
#[derive(Debug, Clone, PartialEq, Eq)]
struct CacheBinding {
    corpus_version: String,
    model_id: String,
    normalize: bool,
}

#[derive(Debug, Default)]
struct CacheState {
    binding: Option<CacheBinding>,
    entries: HashMap<CacheKey, Arc<[f32]>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub entries: usize,
    pub hits: u64,
    pub misses: u64,
}

#[derive(Debug, Default)]
pub struct EmbeddingCache {
    state: RwLock<CacheState>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl EmbeddingCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind to `(corpus_version, model_id, normalize)`, clearing entries if
    /// any part differs from the current binding. Returns true when entries
    /// were dropped.
    pub fn rebind(&self, corpus_version: &str, model_id: &str, normalize: bool) -> bool {
        let binding = CacheBinding {
            corpus_version: corpus_version.to_string(),
            model_id: model_id.to_string(),
            normalize,
        };
        let mut state = self.state.write();
        if state.binding.as_ref() == Some(&binding) {
            return false;
        }
        let dropped = !state.entries.is_empty();
        state.entries.clear();
        state.binding = Some(binding);
        debug!(corpus_version, model_id, normalize, dropped, "embedding cache rebound");
        dropped
    }

    pub fn corpus_version(&self) -> Option<String> {
        self.state.read().binding.as_ref().map(|b| b.corpus_version.clone())
    }

    pub fn get(&self, chunk_id: &str, content_hash: &str) -> Option<Arc<[f32]>> {
        let key = CacheKey { chunk_id: chunk_id.to_string(), content_hash: content_hash.to_string() };
        let found = self.state.read().entries.get(&key).cloned();
        let counter = if found.is_some() { &self.hits } else { &self.misses };
        counter.fetch_add(1, Ordering::Relaxed);
        found
    }

    /// Concurrent inserts for the same key are harmless: last writer wins.
    pub fn insert(&self, chunk_id: &str, content_hash: &str, vector: Vec<f32>) {
        let key = CacheKey { chunk_id: chunk_id.to_string(), content_hash: content_hash.to_string() };
        self.state.write().entries.insert(key, Arc::from(vector));
    }

    pub fn len(&self) -> usize {
        self.state.read().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            entries: self.len(),
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
        }
    }
}
