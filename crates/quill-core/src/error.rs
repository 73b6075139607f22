//! Unified error types for Quill

use thiserror::Error;

/// Unified error type for all Quill operations
#[derive(Error, Debug)]
pub enum QuillError {
    #[error("transport error: {0}")]
    Transport(String),

    #[error("invalid run spec: {0}")]
    InvalidSpec(String),

    #[error("job not found: {0}")]
    JobNotFound(String),

    #[error("invalid job state transition: {0}")]
    InvalidTransition(String),

    #[error("job error: {0}")]
    Job(String),

    #[error("config error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type alias using QuillError
pub type Result<T> = std::result::Result<T, QuillError>;
