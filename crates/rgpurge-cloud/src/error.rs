//! Control-plane error types

use thiserror::Error;

/// Errors raised by control-plane reads.
///
/// Mutating calls never return these: they report a
/// [`CallOutcome`](crate::CallOutcome) instead.
#[derive(Error, Debug)]
pub enum CloudError {
    #[error("Query failed: {0}")]
    QueryFailed(String),

    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("Command execution failed: {0}")]
    CommandFailed(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, CloudError>;
