//! Domain types shared by the retrievers, the fuser and the reranker.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

pub type ChunkId = String;
pub type Meta = BTreeMap<String, String>;

/// A source document as handed over by the ingestion collaborator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub id: String,
    pub text: String,
    #[serde(default)]
    pub metadata: Meta,
}

impl Document {
    pub fn new(id: impl Into<String>, text: impl Into<String>) -> Self {
        Self { id: id.into(), text: text.into(), metadata: Meta::new() }
    }

    pub fn with_meta(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

/// Byte offsets of a chunk inside its parent document text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Span {
    pub start: usize,
    pub end: usize,
}

impl Span {
    pub fn len(&self) -> usize {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.end == self.start
    }
}

/// A bounded passage of a document; the unit of retrieval.
///
/// - `id`: `"<document_id>:<chunk_index>"`, stable for a corpus version
/// - `span`: exact byte range of `text` inside the document
/// - `content_hash`: blake3 hex digest of `text`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    pub id: ChunkId,
    pub document_id: String,
    pub text: String,
    pub span: Span,
    pub chunk_index: usize,
    #[serde(default)]
    pub metadata: Meta,
    pub content_hash: String,
}

impl Chunk {
    /// Build a chunk from externally supplied fields, computing the content hash.
    pub fn new(
        id: impl Into<String>,
        document_id: impl Into<String>,
        text: impl Into<String>,
        metadata: Meta,
    ) -> Self {
        let text = text.into();
        let content_hash = hash_content(&text);
        let span = Span { start: 0, end: text.len() };
        Self {
            id: id.into(),
            document_id: document_id.into(),
            text,
            span,
            chunk_index: 0,
            metadata,
            content_hash,
        }
    }
}

pub fn hash_content(s: &str) -> String {
    blake3::hash(s.as_bytes()).to_hex().to_string()
}

/// Indicates which retriever produced a hit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Origin {
    #[serde(rename = "bm25")]
    Sparse,
    #[serde(rename = "dense")]
    Dense,
}

impl Origin {
    pub const ALL: [Origin; 2] = [Origin::Sparse, Origin::Dense];

    pub fn as_str(&self) -> &'static str {
        match self {
            Origin::Sparse => "bm25",
            Origin::Dense => "dense",
        }
    }
}

impl fmt::Display for Origin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One ranked hit from a single retriever. `rank` is 1-based.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrievalHit {
    pub chunk_id: ChunkId,
    pub raw_score: f32,
    pub rank: usize,
    pub origin: Origin,
}

/// A candidate after rank fusion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FusedResult {
    pub chunk_id: ChunkId,
    pub fused_score: f32,
    pub contributing_origins: BTreeSet<Origin>,
    pub rank: usize,
    /// Highest raw score among the contributing origins (tie-break only).
    pub best_raw_score: f32,
}

/// Output of the engine, handed to the answer-synthesis consumer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FinalResult {
    pub chunk_id: ChunkId,
    pub text: String,
    pub metadata: Meta,
    pub final_score: f32,
}
