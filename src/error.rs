//! Core error taxonomy (§7). Every failure that crosses a port boundary or a
//! pipeline phase boundary is eventually converted into one of these variants.

use axum::{http::StatusCode, response::IntoResponse, Json};
use serde_json::json;

#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("validation: {0}")]
    Validation(String),

    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("extraction failed: {0}")]
    ExtractionFailed(String),

    #[error("embedding failed: {0}")]
    EmbeddingFailed(String),

    #[error("index failed: {0}")]
    IndexFailed(String),

    #[error("llm failed: {0}")]
    LlmFailed(String),

    #[error("persistence failed: {0}")]
    PersistenceFailed(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl CoreError {
    pub fn code(&self) -> &'static str {
        match self {
            CoreError::Validation(_) => "VALIDATION",
            CoreError::Forbidden(_) => "FORBIDDEN",
            CoreError::NotFound(_) => "NOT_FOUND",
            CoreError::ExtractionFailed(_) => "EXTRACTION_FAILED",
            CoreError::EmbeddingFailed(_) => "EMBEDDING_FAILED",
            CoreError::IndexFailed(_) => "INDEX_FAILED",
            CoreError::LlmFailed(_) => "LLM_FAILED",
            CoreError::PersistenceFailed(_) => "PERSISTENCE_FAILED",
            CoreError::Internal(_) => "INTERNAL",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            CoreError::Validation(_) => StatusCode::BAD_REQUEST,
            CoreError::Forbidden(_) => StatusCode::FORBIDDEN,
            CoreError::NotFound(_) => StatusCode::NOT_FOUND,
            CoreError::ExtractionFailed(_) => StatusCode::BAD_REQUEST,
            CoreError::EmbeddingFailed(_) => StatusCode::SERVICE_UNAVAILABLE,
            CoreError::IndexFailed(_) => StatusCode::SERVICE_UNAVAILABLE,
            CoreError::LlmFailed(_) => StatusCode::SERVICE_UNAVAILABLE,
            CoreError::PersistenceFailed(_) => StatusCode::INTERNAL_SERVER_ERROR,
            CoreError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for CoreError {
    fn into_response(self) -> axum::response::Response {
        let status = self.status();
        let body = Json(json!({
            "error": self.code(),
            "message": self.to_string(),
        }));
        (status, body).into_response()
    }
}

/// Adapters speak `anyhow`; this is the single seam where an adapter failure
/// becomes a classified core error. Callers should prefer constructing a
/// `CoreError` variant directly when they know the failure class; this impl
/// exists for the few spots where an opaque adapter error has no better home.
impl From<anyhow::Error> for CoreError {
    fn from(err: anyhow::Error) -> Self {
        CoreError::Internal(err.to_string())
    }
}
