//! Versioned JSON envelope for `SparseIndex`.
//!
//! Anything that does not match the expected format tag, schema version,
//! corpus version or structural invariants is rejected with `Error::IndexSchema`.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;
use tracing::info;

use lexfuse_core::error::{Error, Result};
use lexfuse_core::types::ChunkId;

use crate::analyzer::{Analyzer, AnalyzerConfig};
use crate::index::{Bm25Params, Posting, SparseIndex};

pub const FORMAT_TAG: &str = "lexfuse.sparse-index";
pub const SCHEMA_VERSION: u32 = 1;

#[derive(Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct SparseIndexFile {
	format: String,
	schema_version: u32,
	corpus_version: String,
	params: Bm25Params,
	analyzer: AnalyzerConfig,
	chunk_ids: Vec<ChunkId>,
	doc_lens: Vec<u32>,
	postings: BTreeMap<String, Vec<Posting>>,
}

impl SparseIndex {
	pub fn save(&self, path: &Path) -> Result<()> {
		if let Some(parent) = path.parent() {
			fs::create_dir_all(parent)?;
		}
		let file = SparseIndexFile {
			format: FORMAT_TAG.to_string(),
			schema_version: SCHEMA_VERSION,
			corpus_version: self.corpus_version.clone(),
			params: self.params,
			analyzer: *self.analyzer.config(),
			chunk_ids: self.chunk_ids.clone(),
			doc_lens: self.doc_lens.clone(),
			postings: self.postings.clone(),
		};
		let mut writer = BufWriter::new(File::create(path)?);
		serde_json::to_writer(&mut writer, &file)?;
		writer.flush()?;
		info!(path = %path.display(), corpus_version = %self.corpus_version, "saved sparse index");
		Ok(())
	}

	/// Load an index written by [`SparseIndex::save`].
	///
	/// `corpus_version` and `analyzer` are what the caller is about to query
	/// with; an index built for anything else is refused.
	pub fn load(path: &Path, corpus_version: &str, analyzer: &AnalyzerConfig) -> Result<Self> {
		let reader = BufReader::new(File::open(path)?);
		let file: SparseIndexFile = serde_json::from_reader(reader)
			.map_err(|e| Error::IndexSchema(format!("{} is not a sparse index envelope: {e}", path.display())))?;

		if file.format != FORMAT_TAG {
			return Err(Error::IndexSchema(format!("unexpected format tag {:?}", file.format)));
		}
		if file.schema_version != SCHEMA_VERSION {
			return Err(Error::IndexSchema(format!(
				"schema version {} is not supported (expected {SCHEMA_VERSION})",
				file.schema_version
			)));
		}
		if file.corpus_version != corpus_version {
			return Err(Error::IndexSchema(format!(
				"index was built for corpus version {}, expected {corpus_version}",
				file.corpus_version
			)));
		}
		if &file.analyzer != analyzer {
			return Err(Error::IndexSchema(format!(
				"index analyzer {:?} differs from configured {:?}",
				file.analyzer, analyzer
			)));
		}
		validate_structure(&file)?;

		let index = SparseIndex::from_parts(
			file.corpus_version,
			file.params,
			Analyzer::new(file.analyzer),
			file.chunk_ids,
			file.doc_lens,
			file.postings,
		);
		info!(path = %path.display(), chunks = index.len(), "loaded sparse index");
		Ok(index)
	}
}

fn validate_structure(file: &SparseIndexFile) -> Result<()> {
	let bad = |msg: String| -> Result<()> { Err(Error::IndexSchema(msg)) };
	if !file.params.k1.is_finite() || file.params.k1 < 0.0 || !(0.0..=1.0).contains(&file.params.b) {
		return bad(format!("invalid BM25 parameters {:?}", file.params));
	}
	if file.chunk_ids.len() != file.doc_lens.len() {
		return bad(format!("{} chunk ids but {} document lengths", file.chunk_ids.len(), file.doc_lens.len()));
	}
	let n = file.chunk_ids.len();
	for (term, list) in &file.postings {
		if list.is_empty() {
			return bad(format!("term {term:?} has an empty postings list"));
		}
		let mut previous: Option<u32> = None;
		for posting in list {
			if posting.doc as usize >= n {
				return bad(format!("term {term:?} points at ordinal {} of {n}", posting.doc));
			}
			if posting.tf == 0 || posting.tf > file.doc_lens[posting.doc as usize] {
				return bad(format!("term {term:?} has term frequency {} in ordinal {}", posting.tf, posting.doc));
			}
			if previous.is_some_and(|p| p >= posting.doc) {
				return bad(format!("postings for {term:?} are not strictly ascending"));
			}
			previous = Some(posting.doc);
		}
	}
	Ok(())
}

#[cfg(test)]
mod tests {
	use super::*;
	use lexfuse_core::types::{Chunk, Meta};
	use lexfuse_core::ErrorKind;
	use tempfile::TempDir;

	fn index() -> SparseIndex {
		let chunks = vec![
			Chunk::new("d:0", "d", "monto máximo de viáticos por día", Meta::new()),
			Chunk::new("d:1", "d", "rendición de cuentas de viáticos", Meta::new()),
		];
		SparseIndex::build(&chunks, Bm25Params::default(), AnalyzerConfig::default(), "v1")
	}

	#[test]
	fn save_then_load_answers_queries_identically() {
		let tmp = TempDir::new().unwrap();
		let path = tmp.path().join("v1/sparse.json");
		let original = index();
		original.save(&path).unwrap();
		let loaded = SparseIndex::load(&path, "v1", &AnalyzerConfig::default()).unwrap();
		assert_eq!(loaded.chunk_ids(), original.chunk_ids());
		assert_eq!(loaded.search("viáticos monto", 5, 0.0), original.search("viáticos monto", 5, 0.0));
	}

	#[test]
	fn wrong_corpus_version_is_rejected() {
		let tmp = TempDir::new().unwrap();
		let path = tmp.path().join("sparse.json");
		index().save(&path).unwrap();
		let err = SparseIndex::load(&path, "v2", &AnalyzerConfig::default()).unwrap_err();
		assert_eq!(err.kind(), ErrorKind::IndexSchema);
	}

	#[test]
	fn different_analyzer_is_rejected() {
		let tmp = TempDir::new().unwrap();
		let path = tmp.path().join("sparse.json");
		index().save(&path).unwrap();
		let other = AnalyzerConfig { stemming: false, ..AnalyzerConfig::default() };
		assert_eq!(SparseIndex::load(&path, "v1", &other).unwrap_err().kind(), ErrorKind::IndexSchema);
	}

	fn tamper(path: &Path, edit: impl FnOnce(&mut serde_json::Value)) {
		let mut value: serde_json::Value = serde_json::from_str(&fs::read_to_string(path).unwrap()).unwrap();
		edit(&mut value);
		fs::write(path, serde_json::to_string(&value).unwrap()).unwrap();
	}

	#[test]
	fn tampered_envelopes_are_rejected() {
		let edits: Vec<Box<dyn FnOnce(&mut serde_json::Value)>> = vec![
			Box::new(|v| v["format"] = "someone.else".into()),
			Box::new(|v| v["schema_version"] = 7.into()),
			Box::new(|v| v["extra"] = true.into()),
			Box::new(|v| v["doc_lens"] = serde_json::json!([1])),
			Box::new(|v| v["postings"]["viatic"] = serde_json::json!([{ "doc": 9, "tf": 1 }])),
			Box::new(|v| v["postings"]["viatic"] = serde_json::json!([{ "doc": 1, "tf": 1 }, { "doc": 0, "tf": 1 }])),
			Box::new(|v| v["postings"]["viatic"] = serde_json::json!([{ "doc": 0, "tf": 0 }])),
		];
		for edit in edits {
			let tmp = TempDir::new().unwrap();
			let path = tmp.path().join("sparse.json");
			index().save(&path).unwrap();
			tamper(&path, edit);
			let err = SparseIndex::load(&path, "v1", &AnalyzerConfig::default()).unwrap_err();
			assert_eq!(err.kind(), ErrorKind::IndexSchema);
		}
	}

	#[test]
	fn garbage_file_is_an_index_schema_error() {
		let tmp = TempDir::new().unwrap();
		let path = tmp.path().join("sparse.json");
		fs::write(&path, b"not json at all").unwrap();
		let err = SparseIndex::load(&path, "v1", &AnalyzerConfig::default()).unwrap_err();
		assert_eq!(err.kind(), ErrorKind::IndexSchema);
	}
}
