//! Error types for Crisis Flux
//!
//! The classification path is infallible; these errors only surface from
//! configuration loading, audit persistence and the CLI.

use thiserror::Error;

/// Errors that can occur outside the classification path
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Invalid JSON: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse input: {0}")]
    ParseError(String),

    #[error("Audit storage unavailable: {0}")]
    Storage(String),

    #[error("Engine has been shut down")]
    Stopped,
}
