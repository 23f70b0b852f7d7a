//! Error types for the Hermes orchestration service
//!
//! This module provides structured error handling using thiserror for
//! error definitions and anyhow for propagation at the boundaries.

use thiserror::Error;

/// Main error type for Hermes operations
#[derive(Error, Debug)]
pub enum HermesError {
    /// Database operation failed
    #[error("Database error: {0}")]
    Database(String),

    /// Database driver error
    #[error("Database error: {0}")]
    Libsql(#[from] libsql::Error),

    /// Schema migration failed
    #[error("Migration error: {0}")]
    Migration(String),

    /// Record not found (user, chat, or sub-agent)
    #[error("Not found: {0}")]
    NotFound(String),

    /// Caller does not own the addressed resource
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// Completion provider request failed
    #[error("LLM API error: {0}")]
    LlmApi(String),

    /// Search provider request failed
    #[error("Search API error: {0}")]
    SearchApi(String),

    /// Model-supplied tool arguments could not be parsed
    #[error("Invalid tool arguments: {0}")]
    InvalidToolArgs(String),

    /// Fetch tool exceeded its per-call deadline
    #[error("Request to {url} timed out after {timeout_ms}ms")]
    FetchTimeout { url: String, timeout_ms: u64 },

    /// Invalid id format
    #[error("Invalid id: {0}")]
    InvalidId(#[from] uuid::Error),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// HTTP request error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Generic error with context
    #[error("{0}")]
    Other(String),
}

/// Result type alias for Hermes operations
pub type Result<T> = std::result::Result<T, HermesError>;

/// Convert anyhow::Error to HermesError
impl From<anyhow::Error> for HermesError {
    fn from(err: anyhow::Error) -> Self {
        HermesError::Other(err.to_string())
    }
}
