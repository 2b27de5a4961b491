//! Labeled query sets.
//!
//! A set is either a JSON array of [`LabeledQuery`] objects or JSON Lines
//! with one object per line (blank lines and `#` comments are skipped).

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::path::Path;

use lexfuse_core::error::{Error, Result};
use lexfuse_core::types::Meta;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LabeledQuery {
    pub id: String,
    pub query: String,
    #[serde(default)]
    pub expected_answer: Option<String>,
    #[serde(default)]
    pub expected_document_ids: Vec<String>,
    #[serde(default)]
    pub expected_metadata: Meta,
}

impl LabeledQuery {
    pub fn new(id: impl Into<String>, query: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            query: query.into(),
            expected_answer: None,
            expected_document_ids: Vec::new(),
            expected_metadata: Meta::new(),
        }
    }

    pub fn with_answer(mut self, answer: impl Into<String>) -> Self {
        self.expected_answer = Some(answer.into());
        self
    }

    pub fn with_document(mut self, document_id: impl Into<String>) -> Self {
        self.expected_document_ids.push(document_id.into());
        self
    }

    pub fn with_meta(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.expected_metadata.insert(key.into(), value.into());
        self
    }

    /// True when there is something to judge results against.
    pub fn is_labeled(&self) -> bool {
        self.expected_answer.as_deref().is_some_and(|a| !a.trim().is_empty())
            || !self.expected_document_ids.is_empty()
            || !self.expected_metadata.is_empty()
    }
}

pub fn load_queries(path: &Path) -> Result<Vec<LabeledQuery>> {
    let raw = fs::read_to_string(path)?;
    parse_queries(&raw).map_err(|e| match e {
        Error::Configuration(msg) => Error::Configuration(format!("{}: {msg}", path.display())),
        other => other,
    })
}

pub fn parse_queries(raw: &str) -> Result<Vec<LabeledQuery>> {
    let queries: Vec<LabeledQuery> = if raw.trim_start().starts_with('[') {
        serde_json::from_str(raw).map_err(|e| Error::Configuration(format!("invalid query set: {e}")))?
    } else {
        raw.lines()
            .enumerate()
            .filter(|(_, line)| {
                let line = line.trim();
                !line.is_empty() && !line.starts_with('#')
            })
            .map(|(n, line)| {
                serde_json::from_str(line).map_err(|e| Error::Configuration(format!("line {}: {e}", n + 1)))
            })
            .collect::<Result<_>>()?
    };

    let mut seen = HashSet::new();
    for q in &queries {
        if q.query.trim().is_empty() {
            return Err(Error::Configuration(format!("query {} has no text", q.id)));
        }
        if !seen.insert(q.id.as_str()) {
            return Err(Error::Configuration(format!("duplicate query id {}", q.id)));
        }
    }
    Ok(queries)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_json_lines_with_comments() {
        let raw = r#"
# viáticos
{"id": "q1", "query": "¿Cuál es el monto máximo para viáticos?", "expected_answer": "S/ 320.00"}

{"id": "q2", "query": "caja chica", "expected_document_ids": ["reglamento-caja-chica"]}
"#;
        let queries = parse_queries(raw).unwrap();
        assert_eq!(queries.len(), 2);
        assert_eq!(queries[0].expected_answer.as_deref(), Some("S/ 320.00"));
        assert_eq!(queries[1].expected_document_ids, vec!["reglamento-caja-chica"]);
        assert!(queries.iter().all(LabeledQuery::is_labeled));
    }

    #[test]
    fn parses_a_json_array() {
        let raw = r#"[{"id": "a", "query": "vacaciones", "expected_metadata": {"category": "rrhh"}}]"#;
        let queries = parse_queries(raw).unwrap();
        assert_eq!(queries[0].expected_metadata.get("category").map(String::as_str), Some("rrhh"));
    }

    #[test]
    fn reports_the_offending_line() {
        let raw = "{\"id\": \"a\", \"query\": \"x\"}\n{\"id\": \"b\", \"qurey\": \"typo\"}\n";
        let err = parse_queries(raw).unwrap_err();
        assert!(err.to_string().contains("line 2"), "{err}");
    }

    #[test]
    fn rejects_duplicates_and_blank_queries() {
        assert!(parse_queries("{\"id\": \"a\", \"query\": \"x\"}\n{\"id\": \"a\", \"query\": \"y\"}").is_err());
        assert!(parse_queries("{\"id\": \"a\", \"query\": \"  \"}").is_err());
    }

    #[test]
    fn unlabeled_queries_are_detected() {
        assert!(!LabeledQuery::new("a", "x").is_labeled());
        assert!(LabeledQuery::new("a", "x").with_document("doc").is_labeled());
    }
}
