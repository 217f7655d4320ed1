//! Artifact store error taxonomy: `ArtifactError` covers everything that
//! can go wrong keeping the "all writes are atomic" guarantee.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ArtifactError {
    #[error("io error at {path}: {source}")]
    Io { path: String, #[source] source: std::io::Error },

    #[error("malformed JSON at {path}: {source}")]
    Json { path: String, #[source] source: serde_json::Error },
}
