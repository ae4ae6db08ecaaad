//! Agent error types.

use std::time::Duration;

use thiserror::Error;

use crate::storage::StorageError;

/// Errors that can occur while collecting or pushing metrics.
#[derive(Debug, Error)]
pub enum AgentError {
    /// HTTP transport error.
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// Push did not finish before its deadline.
    #[error("push timed out after {0:?}")]
    Timeout(Duration),

    /// Collector answered with a non-success status.
    #[error("collector responded with {status}: {body}")]
    Status { status: u16, body: String },

    /// Configuration error.
    #[error("config error: {0}")]
    Config(String),

    /// Storage error.
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
}
