//! Reading documents and pre-cut chunks from disk.

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::Path;
use walkdir::WalkDir;

use lexfuse_core::types::{Chunk, Document, Meta};

const TEXT_EXTENSIONS: &[&str] = &["txt", "md"];

/// A chunk supplied by the caller instead of the chunker.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ChunkRecord {
    id: String,
    document_id: String,
    text: String,
    #[serde(default)]
    metadata: Meta,
}

/// Documents from a JSON Lines file, or every text file under a directory.
pub fn load_documents(path: &Path) -> Result<Vec<Document>> {
    if path.is_dir() {
        return documents_from_dir(path);
    }
    read_json_lines(path)
}

pub fn load_chunks(path: &Path) -> Result<Vec<Chunk>> {
    let records: Vec<ChunkRecord> = read_json_lines(path)?;
    Ok(records.into_iter().map(|r| Chunk::new(r.id, r.document_id, r.text, r.metadata)).collect())
}

fn read_json_lines<T: for<'de> Deserialize<'de>>(path: &Path) -> Result<Vec<T>> {
    let raw = fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    raw.lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(n, line)| serde_json::from_str(line).with_context(|| format!("{}:{}", path.display(), n + 1)))
        .collect()
}

fn documents_from_dir(dir: &Path) -> Result<Vec<Document>> {
    let mut documents = Vec::new();
    for entry in WalkDir::new(dir).sort_by_file_name().into_iter().filter_map(|e| e.ok()) {
        let path = entry.path();
        let is_text = path.extension().and_then(|e| e.to_str()).is_some_and(|e| TEXT_EXTENSIONS.contains(&e));
        if !entry.file_type().is_file() || !is_text {
            continue;
        }
        let text = fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
        if text.trim().is_empty() {
            continue;
        }
        let relative = path.strip_prefix(dir).unwrap_or(path);
        let id = relative.with_extension("").to_string_lossy().replace('\\', "/");
        let mut document = Document::new(id, text).with_meta("source", relative.to_string_lossy());
        if let Some(stem) = path.file_stem() {
            document = document.with_meta("title", stem.to_string_lossy());
        }
        documents.push(document);
    }
    if documents.is_empty() {
        bail!("no .txt or .md files under {}", dir.display());
    }
    Ok(documents)
}
