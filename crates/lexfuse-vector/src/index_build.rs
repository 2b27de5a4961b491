use indicatif::{ProgressBar, ProgressStyle};
use std::collections::HashMap;
use std::time::Instant;
use tracing::info;

use lexfuse_core::error::{Error, Result};
use lexfuse_core::similarity::{cosine, l2_norm, normalize};
use lexfuse_core::traits::{Embedder, PairSimilarity};
use lexfuse_core::types::{Chunk, ChunkId, Origin, RetrievalHit};

use crate::cache::EmbeddingCache;

#[derive(Debug, Clone, Copy)]
pub struct BuildOptions {
    pub batch_size: usize,
    pub normalize: bool,
    /// Draw an indicatif progress bar on stderr.
    pub progress: bool,
}

impl Default for BuildOptions {
    fn default() -> Self {
        Self { batch_size: 32, normalize: true, progress: false }
    }
}

/// Chunk vectors stored row-major in insertion order. Read-only once built.
#[derive(Debug, Clone)]
pub struct DenseIndex {
    pub(crate) corpus_version: String,
    pub(crate) model_id: String,
    pub(crate) dim: usize,
    pub(crate) normalized: bool,
    pub(crate) chunk_ids: Vec<ChunkId>,
    pub(crate) content_hashes: Vec<String>,
    pub(crate) vectors: Vec<f32>,
    pub(crate) positions: HashMap<ChunkId, usize>,
}

impl DenseIndex {
    /// Embed every chunk, reusing cached vectors where the cache has them.
    pub fn build(
        chunks: &[Chunk],
        embedder: &dyn Embedder,
        cache: &EmbeddingCache,
        options: BuildOptions,
        corpus_version: &str,
    ) -> Result<Self> {
        let start = Instant::now();
        cache.rebind(corpus_version, embedder.model_id(), options.normalize);
        let dim = embedder.dim();
        let batch_size = options.batch_size.max(1);

        let pb = if options.progress { ProgressBar::new(chunks.len() as u64) } else { ProgressBar::hidden() };
        if let Ok(style) = ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} chunks ({percent}%) {msg}")
        {
            pb.set_style(style.progress_chars("#>-"));
        }

        let mut vectors = Vec::with_capacity(chunks.len() * dim);
        let mut embedded = 0usize;
        for batch in chunks.chunks(batch_size) {
            let mut rows: Vec<Option<Vec<f32>>> =
                batch.iter().map(|c| cache.get(&c.id, &c.content_hash).map(|v| v.to_vec())).collect();
            let missing: Vec<usize> = rows.iter().enumerate().filter(|(_, r)| r.is_none()).map(|(i, _)| i).collect();
            if !missing.is_empty() {
                let texts: Vec<String> = missing.iter().map(|&i| batch[i].text.clone()).collect();
                let fresh = embedder.embed_batch(&texts).map_err(|e| Error::Embedding(e.to_string()))?;
                if fresh.len() != texts.len() {
                    return Err(Error::Embedding(format!(
                        "embedder returned {} vectors for {} texts",
                        fresh.len(),
                        texts.len()
                    )));
                }
                for (&i, mut v) in missing.iter().zip(fresh) {
                    if options.normalize {
                        normalize(&mut v);
                    }
                    cache.insert(&batch[i].id, &batch[i].content_hash, v.clone());
                    rows[i] = Some(v);
                }
                embedded += missing.len();
            }
            for (chunk, row) in batch.iter().zip(rows) {
                let v = row.unwrap_or_default();
                if v.len() != dim {
                    return Err(Error::Embedding(format!(
                        "chunk {} embedded to {} dimensions, expected {dim}",
                        chunk.id,
                        v.len()
                    )));
                }
                vectors.extend_from_slice(&v);
            }
            pb.inc(batch.len() as u64);
        }
        pb.finish_and_clear();

        let index = Self::from_rows(
            corpus_version.to_string(),
            embedder.model_id().to_string(),
            dim,
            options.normalize,
            chunks.iter().map(|c| c.id.clone()).collect(),
            chunks.iter().map(|c| c.content_hash.clone()).collect(),
            vectors,
        );
        info!(
            corpus_version,
            model = embedder.model_id(),
            chunks = chunks.len(),
            embedded,
            reused = chunks.len() - embedded,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "built dense index"
        );
        Ok(index)
    }

    pub(crate) fn from_rows(
        corpus_version: String,
        model_id: String,
        dim: usize,
        normalized: bool,
        chunk_ids: Vec<ChunkId>,
        content_hashes: Vec<String>,
        vectors: Vec<f32>,
    ) -> Self {
        let positions = chunk_ids.iter().enumerate().map(|(i, id)| (id.clone(), i)).collect();
        Self { corpus_version, model_id, dim, normalized, chunk_ids, content_hashes, vectors, positions }
    }

    pub fn corpus_version(&self) -> &str {
        &self.corpus_version
    }

    pub fn model_id(&self) -> &str {
        &self.model_id
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    pub fn is_normalized(&self) -> bool {
        self.normalized
    }

    pub fn len(&self) -> usize {
        self.chunk_ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunk_ids.is_empty()
    }

    pub fn chunk_ids(&self) -> &[ChunkId] {
        &self.chunk_ids
    }

    pub fn vector(&self, chunk_id: &str) -> Option<&[f32]> {
        self.positions.get(chunk_id).map(|&i| self.row(i))
    }

    pub(crate) fn row(&self, i: usize) -> &[f32] {
        &self.vectors[i * self.dim..(i + 1) * self.dim]
    }

    /// Brute-force cosine search; equal scores rank the earlier-inserted chunk first.
    pub fn search_vector(&self, query: &[f32], k: usize, score_threshold: f32) -> Vec<RetrievalHit> {
        if k == 0 || query.len() != self.dim || l2_norm(query) <= f32::EPSILON {
            return Vec::new();
        }
        let mut scored: Vec<(usize, f32)> = (0..self.len())
            .map(|i| (i, cosine(query, self.row(i))))
            .filter(|(_, s)| *s >= score_threshold)
            .collect();
        scored.sort_by(|x, y| y.1.total_cmp(&x.1).then(x.0.cmp(&y.0)));
        scored.truncate(k);
        scored
            .into_iter()
            .enumerate()
            .map(|(rank, (i, score))| RetrievalHit {
                chunk_id: self.chunk_ids[i].clone(),
                raw_score: score,
                rank: rank + 1,
                origin: Origin::Dense,
            })
            .collect()
    }
}

impl PairSimilarity for DenseIndex {
    fn similarity(&self, a: &ChunkId, b: &ChunkId) -> Option<f32> {
        Some(cosine(self.vector(a)?, self.vector(b)?))
    }
}
