use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use tracing::info;

use lexfuse_core::config::SparseConfig;
use lexfuse_core::types::{Chunk, ChunkId, Origin, RetrievalHit};

use crate::analyzer::{Analyzer, AnalyzerConfig};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Bm25Params {
	pub k1: f32,
	pub b: f32,
}

impl Default for Bm25Params {
	fn default() -> Self {
		Self { k1: 1.5, b: 0.75 }
	}
}

impl From<&SparseConfig> for Bm25Params {
	fn from(config: &SparseConfig) -> Self {
		Self { k1: config.k1, b: config.b }
	}
}

/// One entry of a term's postings list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Posting {
	/// Insertion ordinal of the chunk.
	pub doc: u32,
	pub tf: u32,
}

/// In-memory BM25 index over analyzed chunk text. Read-only once built.
#[derive(Debug, Clone)]
pub struct SparseIndex {
	pub(crate) corpus_version: String,
	pub(crate) params: Bm25Params,
	pub(crate) analyzer: Analyzer,
	pub(crate) chunk_ids: Vec<ChunkId>,
	pub(crate) doc_lens: Vec<u32>,
	pub(crate) avg_len: f32,
	/// term -> postings ascending by ordinal
	pub(crate) postings: BTreeMap<String, Vec<Posting>>,
}

impl SparseIndex {
	pub fn build(chunks: &[Chunk], params: Bm25Params, analyzer: AnalyzerConfig, corpus_version: impl Into<String>) -> Self {
		let analyzer = Analyzer::new(analyzer);
		let mut postings: BTreeMap<String, Vec<Posting>> = BTreeMap::new();
		let mut chunk_ids = Vec::with_capacity(chunks.len());
		let mut doc_lens = Vec::with_capacity(chunks.len());
		for (ordinal, chunk) in chunks.iter().enumerate() {
			let tokens = analyzer.tokens(&chunk.text);
			let mut tf: HashMap<String, u32> = HashMap::new();
			for token in &tokens {
				*tf.entry(token.clone()).or_insert(0) += 1;
			}
			// Ordinals are visited in increasing order, so each list stays sorted.
			for (term, count) in tf {
				postings.entry(term).or_default().push(Posting { doc: ordinal as u32, tf: count });
			}
			chunk_ids.push(chunk.id.clone());
			doc_lens.push(tokens.len() as u32);
		}
		let index = Self::from_parts(corpus_version.into(), params, analyzer, chunk_ids, doc_lens, postings);
		info!(
			corpus_version = %index.corpus_version,
			chunks = index.len(),
			terms = index.postings.len(),
			"built sparse index"
		);
		index
	}

	pub(crate) fn from_parts(
		corpus_version: String,
		params: Bm25Params,
		analyzer: Analyzer,
		chunk_ids: Vec<ChunkId>,
		doc_lens: Vec<u32>,
		postings: BTreeMap<String, Vec<Posting>>,
	) -> Self {
		let total: u64 = doc_lens.iter().map(|&l| u64::from(l)).sum();
		let avg_len = if doc_lens.is_empty() { 0.0 } else { total as f32 / doc_lens.len() as f32 };
		Self { corpus_version, params, analyzer, chunk_ids, doc_lens, avg_len, postings }
	}

	pub fn corpus_version(&self) -> &str {
		&self.corpus_version
	}

	pub fn params(&self) -> Bm25Params {
		self.params
	}

	pub fn analyzer_config(&self) -> &AnalyzerConfig {
		self.analyzer.config()
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

	/// Top `k` chunks by BM25 score for `query`.
	///
	/// Scores below `score_threshold` are dropped before truncation; equal
	/// scores rank the earlier-inserted chunk first.
	pub fn search(&self, query: &str, k: usize, score_threshold: f32) -> Vec<RetrievalHit> {
		let terms = self.analyzer.tokens(query);
		if terms.is_empty() || k == 0 || self.is_empty() {
			return Vec::new();
		}
		let n = self.len() as f32;
		let avg_len = if self.avg_len > 0.0 { self.avg_len } else { 1.0 };
		let Bm25Params { k1, b } = self.params;

		let mut scores: HashMap<u32, f32> = HashMap::new();
		for term in &terms {
			let Some(list) = self.postings.get(term) else { continue };
			let df = list.len() as f32;
			let idf = ((n - df + 0.5) / (df + 0.5)).ln_1p();
			for posting in list {
				let tf = posting.tf as f32;
				let len = self.doc_lens[posting.doc as usize] as f32;
				let norm = k1 * (1.0 - b + b * len / avg_len);
				*scores.entry(posting.doc).or_insert(0.0) += idf * tf * (k1 + 1.0) / (tf + norm);
			}
		}

		let mut ranked: Vec<(u32, f32)> = scores.into_iter().filter(|(_, s)| *s >= score_threshold).collect();
		ranked.sort_by(|x, y| y.1.total_cmp(&x.1).then(x.0.cmp(&y.0)));
		ranked.truncate(k);
		ranked
			.into_iter()
			.enumerate()
			.map(|(i, (doc, score))| RetrievalHit {
				chunk_id: self.chunk_ids[doc as usize].clone(),
				raw_score: score,
				rank: i + 1,
				origin: Origin::Sparse,
			})
			.collect()
	}
}
