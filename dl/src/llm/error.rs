//! Generation error types

use std::time::Duration;
use thiserror::Error;

/// Errors that can occur while calling the generation service
#[derive(Debug, Error)]
pub enum LlmError {
    #[error("Rate limited, retry after {retry_after:?}")]
    RateLimited { retry_after: Duration },

    #[error("API error {status}: {message}")]
    ApiError { status: u16, message: String },

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Missing credentials: set the {0} environment variable")]
    MissingCredentials(String),

    #[error("Unsupported provider: {0}")]
    UnsupportedProvider(String),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

impl LlmError {
    /// Check if this error is retryable
    pub fn is_retryable(&self) -> bool {
        match self {
            LlmError::RateLimited { .. } => true,
            LlmError::ApiError { status, .. } => *status == 408 || *status >= 500,
            LlmError::Network(_) => true,
            LlmError::InvalidResponse(_)
            | LlmError::MissingCredentials(_)
            | LlmError::UnsupportedProvider(_)
            | LlmError::Json(_) => false,
        }
    }
}
