//! Harness error types.
//!
//! Every failure is surfaced synchronously at the offending call. Nothing in
//! the core retries; retry policy belongs to individual search tools.

use thiserror::Error;

/// Errors raised by registries, the problem loader, the environment manager,
/// and the metrics engine.
#[derive(Debug, Error)]
pub enum PastcastError {
    /// A name was looked up that nothing is registered or loaded under.
    #[error("{kind} '{name}' not found (available: {})", available.join(", "))]
    NotFound {
        kind: &'static str,
        name: String,
        available: Vec<String>,
    },

    /// A caller-supplied value is out of range or otherwise malformed.
    #[error("validation failed: {0}")]
    Validation(String),

    /// A registry or catalog was set up inconsistently.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// A search tool did not return within the session timeout.
    #[error("search tool '{tool}' timed out after {secs}s")]
    SearchTimeout { tool: String, secs: u64 },

    /// A search tool returned an error.
    #[error("search tool '{tool}' failed: {source:#}")]
    SearchFailed {
        tool: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl PastcastError {
    pub(crate) fn not_found(
        kind: &'static str,
        name: impl Into<String>,
        available: Vec<String>,
    ) -> Self {
        PastcastError::NotFound {
            kind,
            name: name.into(),
            available,
        }
    }

    /// Returns `true` for unknown-name failures.
    pub fn is_not_found(&self) -> bool {
        matches!(self, PastcastError::NotFound { .. })
    }

    /// Returns `true` for rejected inputs.
    pub fn is_validation(&self) -> bool {
        matches!(self, PastcastError::Validation(_))
    }

    /// Returns `true` for inconsistent registry or catalog setup.
    pub fn is_configuration(&self) -> bool {
        matches!(self, PastcastError::Configuration(_))
    }
}

/// Result alias used throughout `pastcast-core`.
pub type Result<T> = std::result::Result<T, PastcastError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_found_lists_available_names() {
        let err = PastcastError::not_found(
            "search tool",
            "bing",
            vec!["mock_google".into(), "perplexity_search".into()],
        );
        assert!(err.is_not_found());
        assert_eq!(
            err.to_string(),
            "search tool 'bing' not found (available: mock_google, perplexity_search)"
        );
    }

    #[test]
    fn classification_helpers() {
        assert!(PastcastError::Validation("x".into()).is_validation());
        assert!(PastcastError::Configuration("x".into()).is_configuration());
        assert!(!PastcastError::Validation("x".into()).is_not_found());
    }
}
