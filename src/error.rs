//! Common error types for the worker node

use axum::{
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

/// Application-wide error type
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP client error: {0}")]
    HttpClient(#[from] reqwest::Error),

    /// Inbound body could not be parsed as a JSON object
    #[error("Malformed request payload: {0}")]
    PayloadParse(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// The job queue rejected the submission or was unreachable
    #[error("Job submission failed: {0}")]
    Submission(String),

    /// A single status poll failed; polls are never retried
    #[error("Job status poll failed: {0}")]
    PollTransport(String),

    /// The job queue reported the job as failed
    #[error("Generation failed: {0}")]
    Generation(String),

    #[error("Generated image not found: {0}")]
    ArtifactMissing(String),

    #[error("Safety classification failed: {0}")]
    Classification(String),

    /// Address discovery or registry post failed. Never leaves the liveness reporter.
    #[error("Liveness announcement failed: {0}")]
    LivenessAnnounce(String),

    #[error("Timeout: {0}")]
    Timeout(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl AppError {
    /// HTTP status the error maps to at the request boundary
    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::PayloadParse(_) | AppError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// Error response body
#[derive(Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = Json(ErrorResponse {
            error: self.to_string(),
        });

        (status, [(header::CONNECTION, "close")], body).into_response()
    }
}

/// Result type alias for convenience
pub type Result<T> = std::result::Result<T, AppError>;
