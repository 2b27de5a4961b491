//! Splits documents into overlapping, metadata-tagged chunks.
//!
//! Offsets are byte offsets into the document text and are a pure function of
//! `(chunk_size, chunk_overlap, split_unit)`. Sizes are counted in characters.

use tracing::debug;

use crate::config::{ChunkingConfig, SplitUnit};
use crate::error::Result;
use crate::types::{hash_content, Chunk, Document, Meta, Span};

#[derive(Debug, Clone)]
pub struct Chunker {
    config: ChunkingConfig,
}

impl Chunker {
    /// Fails with `Error::Chunking` when `chunk_overlap >= chunk_size`.
    pub fn new(config: ChunkingConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &ChunkingConfig {
        &self.config
    }

    /// Lazily yields the chunks of `document`. Calling again restarts from the top.
    pub fn chunks<'a>(&'a self, document: &'a Document) -> ChunkIter<'a> {
        let whole = Span { start: 0, end: document.text.len() };
        let units = match self.config.split_unit {
            SplitUnit::Fixed => fixed_spans(&document.text, whole, self.config.chunk_size, self.config.chunk_overlap),
            SplitUnit::Paragraph => paragraph_spans(&document.text)
                .into_iter()
                .flat_map(|p| {
                    if char_len(&document.text, p) > self.config.chunk_size {
                        fixed_spans(&document.text, p, self.config.chunk_size, self.config.chunk_overlap)
                    } else {
                        vec![p]
                    }
                })
                .collect(),
        };
        ChunkIter { chunker: self, document, units, cursor: 0, next_index: 0 }
    }

    pub fn chunk_all(&self, documents: &[Document]) -> Vec<Chunk> {
        let chunks: Vec<Chunk> = documents.iter().flat_map(|d| self.chunks(d)).collect();
        debug!(
            documents = documents.len(),
            chunks = chunks.len(),
            chunk_size = self.config.chunk_size,
            chunk_overlap = self.config.chunk_overlap,
            "chunked documents"
        );
        chunks
    }

    fn metadata_subset(&self, metadata: &Meta) -> Meta {
        self.config
            .metadata_fields
            .iter()
            .filter_map(|key| metadata.get(key).map(|v| (key.clone(), v.clone())))
            .collect()
    }
}

#[derive(Debug, Clone)]
pub struct ChunkIter<'a> {
    chunker: &'a Chunker,
    document: &'a Document,
    /// Atomic pieces: paragraphs (or fixed windows of oversized ones).
    units: Vec<Span>,
    cursor: usize,
    next_index: usize,
}

impl<'a> ChunkIter<'a> {
    fn next_span(&mut self) -> Option<Span> {
        let units = &self.units;
        let i = self.cursor;
        if i >= units.len() {
            return None;
        }
        let text = &self.document.text;
        let size = self.chunker.config.chunk_size;
        let overlap = self.chunker.config.chunk_overlap;

        let mut j = i + 1;
        if self.chunker.config.split_unit == SplitUnit::Paragraph {
            while j < units.len() && char_len(text, Span { start: units[i].start, end: units[j].end }) <= size {
                j += 1;
            }
        }
        let span = Span { start: units[i].start, end: units[j - 1].end };

        // Carry trailing units into the next chunk while they fit the overlap budget
        // and still leave room for the next unseen unit.
        let mut next = j;
        if self.chunker.config.split_unit == SplitUnit::Paragraph && j < units.len() {
            for c in (i + 1)..j {
                let carried = char_len(text, Span { start: units[c].start, end: units[j - 1].end });
                let with_next = char_len(text, Span { start: units[c].start, end: units[j].end });
                if carried <= overlap && with_next <= size {
                    next = c;
                    break;
                }
            }
        }
        self.cursor = next;
        Some(span)
    }
}

impl<'a> Iterator for ChunkIter<'a> {
    type Item = Chunk;

    fn next(&mut self) -> Option<Chunk> {
        let span = self.next_span()?;
        let chunk_index = self.next_index;
        self.next_index += 1;
        let text = self.document.text[span.start..span.end].to_string();
        Some(Chunk {
            id: format!("{}:{}", self.document.id, chunk_index),
            document_id: self.document.id.clone(),
            content_hash: hash_content(&text),
            text,
            span,
            chunk_index,
            metadata: self.chunker.metadata_subset(&self.document.metadata),
        })
    }
}

fn char_len(text: &str, span: Span) -> usize {
    text[span.start..span.end].chars().count()
}

/// Paragraphs are maximal runs of non-blank lines, trimmed of surrounding whitespace.
fn paragraph_spans(text: &str) -> Vec<Span> {
    let mut spans = Vec::new();
    let mut current: Option<Span> = None;
    let mut offset = 0;
    for line in text.split_inclusive('\n') {
        let line_start = offset;
        offset += line.len();
        if line.trim().is_empty() {
            if let Some(span) = current.take() {
                spans.push(span);
            }
            continue;
        }
        let start = line_start + (line.len() - line.trim_start().len());
        let end = line_start + line.trim_end().len();
        match current.as_mut() {
            Some(span) => span.end = end,
            None => current = Some(Span { start, end }),
        }
    }
    if let Some(span) = current {
        spans.push(span);
    }
    spans
}

/// Fixed-length windows over `segment`.
///
/// A window end backs off to the last whitespace in its second half; the next
/// window starts at most `overlap` characters before the previous end and is
/// snapped forward to a word start, so overlap never exceeds `overlap`.
fn fixed_spans(text: &str, segment: Span, size: usize, overlap: usize) -> Vec<Span> {
    let chars: Vec<(usize, char)> = text[segment.start..segment.end]
        .char_indices()
        .map(|(i, c)| (segment.start + i, c))
        .collect();
    let n = chars.len();
    let byte_at = |i: usize| if i < n { chars[i].0 } else { segment.end };
    let is_ws = |i: usize| chars[i].1.is_whitespace();

    let mut spans = Vec::new();
    let mut start = 0;
    while start < n && is_ws(start) {
        start += 1;
    }
    while start < n {
        let hard_end = (start + size).min(n);
        let mut end = hard_end;
        if hard_end < n {
            let floor = start + size / 2;
            if let Some(j) = (floor + 1..=hard_end).rev().find(|&j| is_ws(j - 1)) {
                end = j;
            }
        }
        let mut trimmed = end;
        while trimmed > start && is_ws(trimmed - 1) {
            trimmed -= 1;
        }
        if trimmed > start {
            spans.push(Span { start: byte_at(start), end: byte_at(trimmed) });
        }
        if end >= n {
            break;
        }
        let mut next = end.saturating_sub(overlap).max(start + 1);
        if let Some(j) = (next..end).find(|&j| is_ws(j - 1)) {
            next = j;
        }
        while next < n && is_ws(next) {
            next += 1;
        }
        start = next;
    }
    spans
}
