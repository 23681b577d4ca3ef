use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum IndexError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("regex error: {0}")]
    RegexError(#[from] regex::Error),

    #[error("path has no file name: {0}")]
    MissingFileName(String),

    #[error("invalid indexing config: {0}")]
    InvalidConfig(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("no page markers found in document {document_id}")]
    Segmentation { document_id: String },

    #[error("duplicate document id {0}")]
    DuplicateDocument(String),

    #[error("embedding failed for {document_id} chunk {chunk_idx}: {source}")]
    Embedding {
        document_id: String,
        chunk_idx: usize,
        #[source]
        source: StoreError,
    },

    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("invalid response from {backend}: {details}")]
    BackendResponse { backend: String, details: String },

    #[error("{backend} rejected statement: {details}")]
    Statement { backend: String, details: String },

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("url parse error: {0}")]
    Url(#[from] url::ParseError),

    #[error("serialize error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("vector dimension {actual} does not match configured {expected}")]
    Dimension { expected: usize, actual: usize },

    #[error("store not available yet: {0}")]
    NotReady(String),
}

impl StoreError {
    pub fn backend_response(backend: &str, details: impl Into<String>) -> Self {
        Self::BackendResponse {
            backend: backend.to_string(),
            details: details.into(),
        }
    }

    /// Whether retrying later could succeed.
    pub fn is_unavailable(&self) -> bool {
        match self {
            Self::Http(_) | Self::NotReady(_) | Self::Statement { .. } => true,
            Self::BackendResponse { .. } => true,
            Self::Url(_) | Self::Serialization(_) | Self::Dimension { .. } => false,
        }
    }
}

/// Error classes surfaced in query result records.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    BackendUnavailable,
    NotFound,
    InvalidRequest,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct QueryFailure {
    pub kind: FailureKind,
    pub message: String,
}

impl QueryFailure {
    pub fn not_found(message: impl Into<String>) -> Self {
        Self {
            kind: FailureKind::NotFound,
            message: message.into(),
        }
    }

    pub fn invalid(message: impl Into<String>) -> Self {
        Self {
            kind: FailureKind::InvalidRequest,
            message: message.into(),
        }
    }
}

impl From<StoreError> for QueryFailure {
    fn from(error: StoreError) -> Self {
        let kind = if error.is_unavailable() {
            FailureKind::BackendUnavailable
        } else {
            FailureKind::InvalidRequest
        };
        Self {
            kind,
            message: error.to_string(),
        }
    }
}

impl fmt::Display for QueryFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}: {}", self.kind, self.message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transport_failures_map_to_backend_unavailable() {
        let failure = QueryFailure::from(StoreError::NotReady("qdrant".to_string()));
        assert_eq!(failure.kind, FailureKind::BackendUnavailable);
    }

    #[test]
    fn malformed_requests_are_not_retriable() {
        let error = StoreError::Dimension {
            expected: 128,
            actual: 3,
        };
        assert!(!error.is_unavailable());
        assert_eq!(QueryFailure::from(error).kind, FailureKind::InvalidRequest);
    }

    #[test]
    fn failure_kind_serializes_in_snake_case() {
        let json = serde_json::to_string(&QueryFailure::not_found("page 4")).unwrap();
        assert_eq!(json, r#"{"kind":"not_found","message":"page 4"}"#);
    }
}
