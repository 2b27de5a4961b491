//! Everything built for one corpus version, and the handle queries read it through.
//!
//! On disk a corpus lives under `<index_dir>/<version>/`:
//!
//! - `chunks.json`: versioned envelope with the chunk texts and metadata
//! - `sparse.json`: the BM25 index (see `lexfuse_text::persist`)
//! - `dense/`: the LanceDB vector store (see `lexfuse_vector::store`)
//!
//! `<index_dir>/ACTIVE` names the version new processes should load.

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, warn};

use lexfuse_core::config::PipelineConfig;
use lexfuse_core::error::{Error, Result};
use lexfuse_core::traits::Embedder;
use lexfuse_core::types::{hash_content, Chunk, ChunkId};
use lexfuse_text::{AnalyzerConfig, Bm25Params, SparseIndex};
use lexfuse_vector::{load_dense_index, save_dense_index, BuildOptions, DenseIndex, EmbeddingCache};

pub const CHUNKS_FILE: &str = "chunks.json";
pub const SPARSE_FILE: &str = "sparse.json";
pub const DENSE_DIR: &str = "dense";
pub const ACTIVE_FILE: &str = "ACTIVE";

const CHUNKS_FORMAT: &str = "lexfuse.chunks";
const CHUNKS_SCHEMA_VERSION: u32 = 1;

#[derive(Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct ChunkFile<C> {
    format: String,
    schema_version: u32,
    corpus_version: String,
    chunks: C,
}

/// First 16 hex chars of blake3 over `(id, content_hash)` in insertion order.
pub fn derive_corpus_version(chunks: &[Chunk]) -> String {
    let mut hasher = blake3::Hasher::new();
    for chunk in chunks {
        hasher.update(chunk.id.as_bytes());
        hasher.update(&[0]);
        hasher.update(chunk.content_hash.as_bytes());
        hasher.update(&[0xff]);
    }
    let hex = hasher.finalize().to_hex();
    hex.as_str()[..16].to_string()
}

/// Chunks by id, in insertion order.
#[derive(Debug, Clone, Default)]
pub struct ChunkStore {
    chunks: Vec<Chunk>,
    positions: HashMap<ChunkId, usize>,
}

impl ChunkStore {
    pub fn new(chunks: Vec<Chunk>) -> Result<Self> {
        let mut positions = HashMap::with_capacity(chunks.len());
        for (i, chunk) in chunks.iter().enumerate() {
            if positions.insert(chunk.id.clone(), i).is_some() {
                return Err(Error::Chunking(format!("duplicate chunk id {}", chunk.id)));
            }
        }
        Ok(Self { chunks, positions })
    }

    pub fn get(&self, id: &str) -> Option<&Chunk> {
        self.positions.get(id).map(|&i| &self.chunks[i])
    }

    pub fn as_slice(&self) -> &[Chunk] {
        &self.chunks
    }

    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    fn ids_match(&self, ids: &[ChunkId]) -> bool {
        ids.len() == self.chunks.len() && self.chunks.iter().zip(ids).all(|(c, id)| &c.id == id)
    }
}

/// The indexes for one corpus version. Read-only once built.
#[derive(Debug)]
pub struct CorpusIndex {
    version: String,
    chunks: ChunkStore,
    sparse: Option<Arc<SparseIndex>>,
    dense: Option<Arc<DenseIndex>>,
}

impl CorpusIndex {
    /// Index `chunks` with every retriever the config enables.
    ///
    /// The dense index is only built when an embedder is supplied.
    /// `version` defaults to [`derive_corpus_version`].
    pub fn build(
        chunks: Vec<Chunk>,
        config: &PipelineConfig,
        embedder: Option<&dyn Embedder>,
        cache: &EmbeddingCache,
        version: Option<String>,
        progress: bool,
    ) -> Result<Self> {
        let start = Instant::now();
        let store = ChunkStore::new(chunks)?;
        let version = version.unwrap_or_else(|| derive_corpus_version(store.as_slice()));

        let sparse = config.sparse.enabled.then(|| {
            Arc::new(SparseIndex::build(
                store.as_slice(),
                Bm25Params::from(&config.sparse),
                AnalyzerConfig::from(&config.sparse),
                version.clone(),
            ))
        });

        let dense = match (config.dense.enabled, embedder) {
            (true, Some(embedder)) => {
                let options = BuildOptions {
                    batch_size: config.dense.embedding_batch_size,
                    normalize: config.dense.normalize_embeddings,
                    progress,
                };
                Some(Arc::new(DenseIndex::build(store.as_slice(), embedder, cache, options, &version)?))
            }
            (true, None) => {
                warn!("dense retrieval is enabled but no embedder was supplied; dense index not built");
                None
            }
            (false, _) => None,
        };

        info!(
            corpus_version = %version,
            chunks = store.len(),
            sparse = sparse.is_some(),
            dense = dense.is_some(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "built corpus index"
        );
        Ok(Self { version, chunks: store, sparse, dense })
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn chunks(&self) -> &ChunkStore {
        &self.chunks
    }

    pub fn chunk(&self, id: &str) -> Option<&Chunk> {
        self.chunks.get(id)
    }

    pub fn sparse(&self) -> Option<&Arc<SparseIndex>> {
        self.sparse.as_ref()
    }

    pub fn dense(&self) -> Option<&Arc<DenseIndex>> {
        self.dense.as_ref()
    }

    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    /// Persist under `<root>/<version>/` and return that directory.
    pub async fn save(&self, root: &Path) -> Result<PathBuf> {
        let dir = root.join(&self.version);
        fs::create_dir_all(&dir)?;

        let file = ChunkFile {
            format: CHUNKS_FORMAT.to_string(),
            schema_version: CHUNKS_SCHEMA_VERSION,
            corpus_version: self.version.clone(),
            chunks: self.chunks.as_slice(),
        };
        let mut writer = BufWriter::new(File::create(dir.join(CHUNKS_FILE))?);
        serde_json::to_writer(&mut writer, &file)?;
        writer.flush()?;

        if let Some(sparse) = &self.sparse {
            sparse.save(&dir.join(SPARSE_FILE))?;
        }
        if let Some(dense) = &self.dense {
            save_dense_index(&dir.join(DENSE_DIR), dense).await?;
        }
        info!(dir = %dir.display(), corpus_version = %self.version, "saved corpus index");
        Ok(dir)
    }

    /// Load `<root>/<version>/`, checking every file against the version and
    /// against the chunk list.
    ///
    /// Retrievers disabled in `config` are not loaded; the dense index also
    /// needs the embedder that will encode queries. A retriever whose index is
    /// missing or fails validation is left out with a warning, so queries see
    /// it as unavailable. The load only fails when `chunks.json` is bad or no
    /// retriever index could be read at all.
    pub async fn load(
        root: &Path,
        version: &str,
        config: &PipelineConfig,
        embedder: Option<&dyn Embedder>,
    ) -> Result<Self> {
        let dir = root.join(version);
        let chunks = load_chunks(&dir.join(CHUNKS_FILE), version)?;
        let mut failures = Vec::new();

        let sparse = if config.sparse.enabled {
            match load_sparse(&dir, version, config, &chunks) {
                Ok(index) => Some(Arc::new(index)),
                Err(e) => {
                    warn!(dir = %dir.display(), error = %e, "sparse index unreadable; serving without it");
                    failures.push(e);
                    None
                }
            }
        } else {
            None
        };

        let dense = match (config.dense.enabled, embedder) {
            (true, Some(embedder)) => match load_dense(&dir, version, embedder, &chunks).await {
                Ok(index) => Some(Arc::new(index)),
                Err(e) => {
                    warn!(dir = %dir.display(), error = %e, "dense index unreadable; serving without it");
                    failures.push(e);
                    None
                }
            },
            (true, None) => {
                warn!("dense retrieval is enabled but no embedder was supplied; dense index not loaded");
                None
            }
            (false, _) => None,
        };

        if sparse.is_none() && dense.is_none() && !failures.is_empty() {
            return Err(failures.swap_remove(0));
        }
        info!(
            dir = %dir.display(),
            chunks = chunks.len(),
            sparse = sparse.is_some(),
            dense = dense.is_some(),
            "loaded corpus index"
        );
        Ok(Self { version: version.to_string(), chunks, sparse, dense })
    }
}

fn load_sparse(dir: &Path, version: &str, config: &PipelineConfig, chunks: &ChunkStore) -> Result<SparseIndex> {
    let index = SparseIndex::load(&dir.join(SPARSE_FILE), version, &AnalyzerConfig::from(&config.sparse))?;
    if !chunks.ids_match(index.chunk_ids()) {
        return Err(Error::IndexSchema("sparse index does not cover the stored chunks".into()));
    }
    Ok(index)
}

async fn load_dense(dir: &Path, version: &str, embedder: &dyn Embedder, chunks: &ChunkStore) -> Result<DenseIndex> {
    let index = load_dense_index(&dir.join(DENSE_DIR), version, embedder.model_id()).await?;
    if !chunks.ids_match(index.chunk_ids()) {
        return Err(Error::IndexSchema("dense index does not cover the stored chunks".into()));
    }
    Ok(index)
}

fn load_chunks(path: &Path, version: &str) -> Result<ChunkStore> {
    let reader = BufReader::new(File::open(path)?);
    let file: ChunkFile<Vec<Chunk>> = serde_json::from_reader(reader)
        .map_err(|e| Error::IndexSchema(format!("{} is not a chunk envelope: {e}", path.display())))?;
    if file.format != CHUNKS_FORMAT {
        return Err(Error::IndexSchema(format!("unexpected format tag {:?}", file.format)));
    }
    if file.schema_version != CHUNKS_SCHEMA_VERSION {
        return Err(Error::IndexSchema(format!(
            "chunk schema version {} is not supported (expected {CHUNKS_SCHEMA_VERSION})",
            file.schema_version
        )));
    }
    if file.corpus_version != version {
        return Err(Error::IndexSchema(format!(
            "chunks were stored for corpus version {}, expected {version}",
            file.corpus_version
        )));
    }
    if let Some(chunk) = file.chunks.iter().find(|c| hash_content(&c.text) != c.content_hash) {
        return Err(Error::IndexSchema(format!("content hash of chunk {} does not match its text", chunk.id)));
    }
    ChunkStore::new(file.chunks).map_err(|e| Error::IndexSchema(e.to_string()))
}

/// Record `version` as the one to load by default.
pub fn write_active_version(root: &Path, version: &str) -> Result<()> {
    fs::create_dir_all(root)?;
    fs::write(root.join(ACTIVE_FILE), format!("{version}\n"))?;
    info!(root = %root.display(), corpus_version = version, "flipped active corpus version");
    Ok(())
}

pub fn read_active_version(root: &Path) -> Result<Option<String>> {
    match fs::read_to_string(root.join(ACTIVE_FILE)) {
        Ok(s) => Ok(Some(s.trim().to_string()).filter(|v| !v.is_empty())),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// Shared pointer to the corpus queries run against.
///
/// A query clones the `Arc` once; `swap` never disturbs queries already
/// holding the previous index.
#[derive(Debug)]
pub struct CorpusHandle {
    current: RwLock<Arc<CorpusIndex>>,
}

impl CorpusHandle {
    pub fn new(index: CorpusIndex) -> Self {
        Self::from_shared(Arc::new(index))
    }

    /// Serve an index that other handles may also hold.
    pub fn from_shared(index: Arc<CorpusIndex>) -> Self {
        Self { current: RwLock::new(index) }
    }

    pub fn current(&self) -> Arc<CorpusIndex> {
        Arc::clone(&self.current.read())
    }

    pub fn version(&self) -> String {
        self.current.read().version.clone()
    }

    /// Install a fully built index and return the one it replaced.
    pub fn swap(&self, index: CorpusIndex) -> Arc<CorpusIndex> {
        let next = Arc::new(index);
        let previous = std::mem::replace(&mut *self.current.write(), next);
        info!(from = %previous.version, to = %self.version(), "swapped corpus index");
        previous
    }
}
