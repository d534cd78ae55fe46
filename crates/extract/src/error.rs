use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Failure of a single extraction call. Recoverable: the caller treats the
/// input as having produced no subgraph.
#[derive(Debug, Error)]
pub enum ExtractionError {
    #[error("language model request failed: {0}")]
    Provider(String),

    #[error("malformed structured response: {0}")]
    MalformedResponse(String),

    #[error("extraction timed out after {0:?}")]
    Timeout(Duration),
}

impl ExtractionError {
    pub fn provider(err: impl std::fmt::Display) -> Self {
        Self::Provider(err.to_string())
    }
}

#[derive(Debug, Error)]
pub enum OntologyLoadError {
    #[error("failed to read ontology file {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse ontology file {path:?}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// Two canonical nodes share an id but carry different types.
#[derive(Debug, Clone, Error, PartialEq, Eq, Serialize, Deserialize)]
#[error("node '{id}' has conflicting types '{existing}' and '{incoming}'")]
pub struct MergeConflictError {
    pub id: String,
    pub existing: String,
    pub incoming: String,
}
