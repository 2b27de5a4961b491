//! Answer- and ranking-quality metrics for a single query, plus latency summaries.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use lexfuse_core::types::Chunk;

use crate::dataset::LabeledQuery;

/// Lowercase, turn every non-alphanumeric run into a single space.
pub fn normalize(text: &str) -> String {
    let lowered = text.to_lowercase();
    let mut out = String::with_capacity(lowered.len());
    for word in lowered.split(|c: char| !c.is_alphanumeric()).filter(|w| !w.is_empty()) {
        if !out.is_empty() {
            out.push(' ');
        }
        out.push_str(word);
    }
    out
}

pub fn tokens(text: &str) -> Vec<String> {
    normalize(text).split(' ').filter(|t| !t.is_empty()).map(str::to_string).collect()
}

/// Share of distinct answer tokens found anywhere in the retrieved texts.
pub fn token_overlap(answer: &str, retrieved: &[&str]) -> f64 {
    let wanted: HashSet<String> = tokens(answer).into_iter().collect();
    if wanted.is_empty() {
        return 0.0;
    }
    let found: HashSet<String> = retrieved.iter().flat_map(|t| tokens(t)).collect();
    wanted.iter().filter(|t| found.contains(*t)).count() as f64 / wanted.len() as f64
}

/// Whether the normalized answer occurs inside any retrieved text.
pub fn exact_match(answer: &str, retrieved: &[&str]) -> bool {
    let answer = normalize(answer);
    if answer.is_empty() {
        return false;
    }
    let padded = format!(" {answer} ");
    retrieved.iter().any(|t| format!(" {} ", normalize(t)).contains(&padded))
}

/// A chunk counts as relevant when it comes from an expected document,
/// carries every expected metadata pair, or contains the expected answer.
pub fn is_relevant(query: &LabeledQuery, chunk: &Chunk) -> bool {
    if query.expected_document_ids.iter().any(|d| d == &chunk.document_id) {
        return true;
    }
    if !query.expected_metadata.is_empty()
        && query.expected_metadata.iter().all(|(k, v)| chunk.metadata.get(k) == Some(v))
    {
        return true;
    }
    query.expected_answer.as_deref().is_some_and(|a| exact_match(a, &[chunk.text.as_str()]))
}

/// 1 / rank of the first relevant result, or 0.
pub fn reciprocal_rank(relevance: &[bool]) -> f64 {
    relevance.iter().position(|&r| r).map_or(0.0, |i| 1.0 / (i + 1) as f64)
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct LatencySummary {
    pub mean_ms: f64,
    pub p50_ms: f64,
    pub p95_ms: f64,
    pub max_ms: f64,
}

impl LatencySummary {
    pub fn from_samples(samples: &[f64]) -> Self {
        if samples.is_empty() {
            return Self::default();
        }
        let mut sorted = samples.to_vec();
        sorted.sort_by(f64::total_cmp);
        let mean = sorted.iter().sum::<f64>() / sorted.len() as f64;
        Self {
            mean_ms: mean,
            p50_ms: percentile(&sorted, 50.0),
            p95_ms: percentile(&sorted, 95.0),
            max_ms: sorted[sorted.len() - 1],
        }
    }
}

/// Nearest-rank percentile of an ascending slice.
fn percentile(sorted: &[f64], p: f64) -> f64 {
    let rank = ((p / 100.0) * sorted.len() as f64).ceil() as usize;
    sorted[rank.clamp(1, sorted.len()) - 1]
}

pub fn mean(values: impl IntoIterator<Item = f64>) -> Option<f64> {
    let (sum, n) = values.into_iter().fold((0.0, 0usize), |(s, n), v| (s + v, n + 1));
    (n > 0).then(|| sum / n as f64)
}
