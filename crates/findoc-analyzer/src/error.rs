//! Error types for the analyzer service

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

/// Result type alias for analyzer operations
pub type Result<T> = std::result::Result<T, Error>;

/// Analyzer service errors
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Upload or enqueue failed before a job existed
    #[error("Error processing financial document: {0}")]
    Submission(String),

    /// Malformed request (missing form field, bad JSON body)
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Unique constraint violated
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Lookup found nothing
    #[error("Not found: {0}")]
    NotFound(String),

    /// SQLite error
    #[error("Database error: {0}")]
    Database(String),

    /// Job queue error
    #[error("Queue error: {0}")]
    Queue(String),

    /// Ollama/LLM error
    #[error("LLM error: {0}")]
    Llm(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP request error
    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Create a database error
    pub fn database(message: impl Into<String>) -> Self {
        Self::Database(message.into())
    }

    /// Create an LLM error
    pub fn llm(message: impl Into<String>) -> Self {
        Self::Llm(message.into())
    }

    /// Create a submission error
    pub fn submission(message: impl Into<String>) -> Self {
        Self::Submission(message.into())
    }

    /// Create an internal error
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// HTTP status for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            Error::InvalidRequest(_) => StatusCode::UNPROCESSABLE_ENTITY,
            Error::Conflict(_) => StatusCode::CONFLICT,
            Error::NotFound(_) => StatusCode::NOT_FOUND,
            Error::Llm(_) | Error::Http(_) => StatusCode::BAD_GATEWAY,
            Error::Config(_)
            | Error::Submission(_)
            | Error::Database(_)
            | Error::Queue(_)
            | Error::Io(_)
            | Error::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!("Request failed: {}", self);
        }

        let body = Json(json!({ "detail": self.to_string() }));
        (status, body).into_response()
    }
}
