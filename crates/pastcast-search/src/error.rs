//! Search tool error types.

use thiserror::Error;

/// Errors that can occur when calling a search backend.
#[derive(Debug, Error)]
pub enum SearchError {
    /// The API returned a 429 rate limit response.
    #[error("rate limited, retry after {retry_after_ms}ms")]
    RateLimited { retry_after_ms: u64 },

    /// Authentication failed (invalid API key).
    #[error("authentication failed: {0}")]
    AuthenticationFailed(String),

    /// No API key was configured for the tool.
    #[error("missing API key: set {0}")]
    MissingApiKey(&'static str),

    /// The testing time could not be turned into a date cutoff.
    #[error("invalid testing time: {0}")]
    InvalidTestingTime(String),

    /// The API returned an error response.
    #[error("API error (HTTP {status}): {message}")]
    ApiError { status: u16, message: String },

    /// The request timed out.
    #[error("request timed out after {0}s")]
    Timeout(u64),

    /// A network error occurred.
    #[error("network error: {0}")]
    NetworkError(String),
}
