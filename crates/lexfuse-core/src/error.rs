use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::Origin;

/// Machine-readable failure kinds surfaced to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Chunking,
    Configuration,
    RetrievalUnavailable,
    FusionConfig,
    /// Non-fatal: carried by a query outcome, never returned as an `Err`.
    RerankDegraded,
    IndexSchema,
    Embedding,
    Io,
    Serialization,
}

/// A retriever that failed while serving a single query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrieverFailure {
    pub origin: Origin,
    pub message: String,
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("Invalid chunking parameters: {0}")]
    Chunking(String),

    #[error("Invalid configuration: {0}")]
    Configuration(String),

    #[error("All enabled retrievers failed ({})", describe_failures(.failures))]
    RetrievalUnavailable { failures: Vec<RetrieverFailure> },

    #[error("Invalid fusion configuration: {0}")]
    FusionConfig(String),

    #[error("Persisted index rejected: {0}")]
    IndexSchema(String),

    #[error("Embedding failed: {0}")]
    Embedding(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Serialization(#[from] serde_json::Error),
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Chunking(_) => ErrorKind::Chunking,
            Error::Configuration(_) => ErrorKind::Configuration,
            Error::RetrievalUnavailable { .. } => ErrorKind::RetrievalUnavailable,
            Error::FusionConfig(_) => ErrorKind::FusionConfig,
            Error::IndexSchema(_) => ErrorKind::IndexSchema,
            Error::Embedding(_) => ErrorKind::Embedding,
            Error::Io(_) => ErrorKind::Io,
            Error::Serialization(_) => ErrorKind::Serialization,
        }
    }
}

fn describe_failures(failures: &[RetrieverFailure]) -> String {
    failures
        .iter()
        .map(|f| format!("{}: {}", f.origin, f.message))
        .collect::<Vec<_>>()
        .join("; ")
}

pub type Result<T> = std::result::Result<T, Error>;
