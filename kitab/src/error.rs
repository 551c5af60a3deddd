use axum::response::{IntoResponse, Response};
use thiserror::Error;

use crate::api::ApiResponse;

#[derive(Error, Debug)]
pub enum KitabError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Embedding error: {0}")]
    Embedding(String),

    #[error("Vector search error: {0}")]
    VectorSearch(String),

    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("API rate limit exceeded, retry after {retry_after:?} seconds")]
    ApiRateLimit { retry_after: Option<u64> },

    #[error("API authentication error: {0}")]
    ApiAuth(String),

    #[error("LLM error: {0}")]
    Llm(String),

    #[error("LLM rate limit exceeded, retry after {retry_after:?} seconds")]
    LlmRateLimit { retry_after: Option<u64> },

    /// The query subprocess failed or reported an error marker.
    #[error("Query process error: {0}")]
    Protocol(String),

    #[error("Internal server error: {0}")]
    Internal(String),
}

impl KitabError {
    /// Failures of the embedding service, vector database or model API.
    ///
    /// The chat relay shows these to the user as-is; anything else is
    /// masked. None are retried.
    pub fn is_upstream(&self) -> bool {
        matches!(
            self,
            KitabError::Embedding(_)
                | KitabError::VectorSearch(_)
                | KitabError::Http(_)
                | KitabError::ApiRateLimit { .. }
                | KitabError::ApiAuth(_)
                | KitabError::Llm(_)
                | KitabError::LlmRateLimit { .. }
        )
    }
}

impl IntoResponse for KitabError {
    fn into_response(self) -> Response {
        ApiResponse::<()>::from(self).into_response()
    }
}

pub type Result<T> = std::result::Result<T, KitabError>;
