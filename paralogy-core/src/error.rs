//! Structured error types for the paralogy workspace.

use thiserror::Error;

/// Unified error type for all paralogy operations.
#[derive(Debug, Error)]
pub enum ParalogyError {
    /// I/O error while writing samples or reading input.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Parse error (malformed Newick or map input)
    #[error("parse error: {0}")]
    Parse(String),

    /// Invalid input (bad construction parameters, inconsistent maps)
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Catch-all for other errors
    #[error("{0}")]
    Other(String),
}

/// Convenience alias used throughout the paralogy workspace.
pub type Result<T> = std::result::Result<T, ParalogyError>;
