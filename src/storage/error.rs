//! Storage-specific error types.
//!
//! Durable operations return [`StorageError`] on failure, which can be
//! matched to determine the underlying cause (database, file, codec, etc.).
//! Input that never reaches the store is rejected with [`ValidationError`].

use thiserror::Error;

/// Errors that can occur in the storage layer.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Database operation failed (sqlx error).
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Snapshot file could not be opened, read, or written.
    #[error("snapshot file error: {0}")]
    Io(#[from] std::io::Error),

    /// Snapshot content could not be encoded or decoded.
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),

    /// Invalid data in a durable record (e.g., a gauge without a value).
    #[error("invalid data: {0}")]
    InvalidData(String),

    /// Operation did not finish before its deadline.
    #[error("operation timed out after {0:?}")]
    Timeout(std::time::Duration),

    /// No persistence backend is configured.
    #[error("persistence backend is not configured")]
    NotConfigured,

    /// Internal error (e.g., task join failure).
    #[error("internal error: {0}")]
    Internal(String),
}

/// Snapshot codec failures.
#[derive(Debug, Error)]
pub enum CodecError {
    /// JSON serialization/deserialization error.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// Gauge value cannot be represented in the snapshot format.
    #[error("gauge '{0}' has a non-finite value")]
    NonFinite(String),
}

/// Rejected metric input, raised before anything reaches the store.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    /// Metric name is empty.
    #[error("metric name is required")]
    MissingName,

    /// Metric type is neither `gauge` nor `counter`.
    #[error("unknown metric type: {0}")]
    UnknownKind(String),

    /// Value could not be parsed for the metric type.
    #[error("invalid {kind} value: '{raw}'")]
    InvalidValue { kind: &'static str, raw: String },

    /// Value field required by the metric type is absent.
    #[error("{kind} '{name}' is missing its {field}")]
    MissingValue {
        kind: &'static str,
        name: String,
        field: &'static str,
    },
}
