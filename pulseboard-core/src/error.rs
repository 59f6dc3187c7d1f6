//! Error types for pulseboard-core

use thiserror::Error;

/// Main error type for the pulseboard-core library
#[derive(Error, Debug)]
pub enum Error {
    /// Database error
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON parsing error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// The snapshot/session store could not be reached
    #[error("store unavailable: {0}")]
    StoreUnavailable(String),

    /// Malformed client request
    #[error("validation error: {0}")]
    Validation(String),

    /// Planning session not found
    #[error("session not found: {0}")]
    SessionNotFound(i64),

    /// Kanban task not found
    #[error("task not found: {0}")]
    TaskNotFound(i64),
}

impl Error {
    /// Shorthand for building a validation error.
    pub fn validation(message: impl Into<String>) -> Self {
        Error::Validation(message.into())
    }
}

/// Result type alias for pulseboard-core
pub type Result<T> = std::result::Result<T, Error>;
