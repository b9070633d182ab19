//! Error types for the TOC extraction pipeline.

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias using our custom error.
pub type Result<T> = std::result::Result<T, TreeIndexError>;

/// Errors that can occur while building a tree index.
#[derive(Error, Debug)]
pub enum TreeIndexError {
    /// Error reading or writing files.
    #[error("I/O error for path '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The PDF could not be opened or parsed at the document level.
    #[error("Unreadable PDF '{path}': {reason}")]
    UnreadablePdf { path: PathBuf, reason: String },

    /// Invalid configuration.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// LLM API returned an error response.
    ///
    /// `status` is kept so the dispatcher can classify 429/5xx as transient.
    #[error("[{phase}] LLM API error ({status}): {message}")]
    LlmApi {
        phase: String,
        status: u16,
        message: String,
    },

    /// HTTP transport failure (connection reset, DNS, TLS).
    #[error("[{phase}] HTTP request failed: {source}")]
    Http {
        phase: String,
        #[source]
        source: reqwest::Error,
    },

    /// An LLM call exceeded its per-call timeout.
    #[error("[{phase}] LLM call timed out after {seconds}s")]
    LlmTimeout { phase: String, seconds: u64 },

    /// The LLM response could not be parsed into the expected shape.
    #[error("[{phase}] Failed to parse LLM response: {message}")]
    LlmParse { phase: String, message: String },

    /// Error during serialization/deserialization.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// The pipeline was cancelled by an external signal.
    #[error("Pipeline cancelled during phase '{0}'")]
    Cancelled(String),
}

impl TreeIndexError {
    /// Create an I/O error with path context.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Create a parse error tagged with a phase name.
    pub fn parse(phase: impl Into<String>, message: impl Into<String>) -> Self {
        Self::LlmParse {
            phase: phase.into(),
            message: message.into(),
        }
    }

    /// Whether retrying this error with backoff can reasonably succeed.
    ///
    /// Timeouts, rate limits (429) and server errors (5xx) are transient;
    /// everything else fails fast.
    pub fn is_transient(&self) -> bool {
        match self {
            TreeIndexError::LlmTimeout { .. } => true,
            TreeIndexError::Http { .. } => true,
            TreeIndexError::LlmApi { status, .. } => *status == 429 || *status >= 500,
            _ => false,
        }
    }
}

impl From<serde_json::Error> for TreeIndexError {
    fn from(err: serde_json::Error) -> Self {
        TreeIndexError::Serialization(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        let timeout = TreeIndexError::LlmTimeout {
            phase: "verification".to_string(),
            seconds: 60,
        };
        assert!(timeout.is_transient());

        let rate_limited = TreeIndexError::LlmApi {
            phase: "structure_extraction".to_string(),
            status: 429,
            message: "rate limited".to_string(),
        };
        assert!(rate_limited.is_transient());

        let server = TreeIndexError::LlmApi {
            phase: "gap_filling".to_string(),
            status: 503,
            message: "overloaded".to_string(),
        };
        assert!(server.is_transient());

        let auth = TreeIndexError::LlmApi {
            phase: "structure_extraction".to_string(),
            status: 401,
            message: "bad key".to_string(),
        };
        assert!(!auth.is_transient());

        let parse = TreeIndexError::parse("verification", "not json");
        assert!(!parse.is_transient());
    }

    #[test]
    fn test_error_messages_carry_phase() {
        let err = TreeIndexError::LlmParse {
            phase: "page_mapping".to_string(),
            message: "unexpected token".to_string(),
        };
        assert!(err.to_string().contains("page_mapping"));
    }
}
