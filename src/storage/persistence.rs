//! Pluggable durable backend for metric state.
//!
//! Two implementations ship with the crate:
//! - [`FileBackend`](crate::storage::FileBackend): whole-file JSON snapshot
//! - [`SqlBackend`](crate::storage::SqlBackend): SQLite table via sqlx
//!
//! Callers wrap mutating calls in a [`RetryPolicy`](crate::storage::RetryPolicy);
//! backends themselves never retry.

use async_trait::async_trait;

use crate::storage::{DurableRecord, MetricUpdate, StorageError};

/// Durable storage of metric records behind a uniform interface.
#[async_trait]
pub trait Persistence: Send + Sync + 'static {
    /// Short backend name for log output.
    fn name(&self) -> &'static str;

    /// Create or replace a single gauge record.
    async fn upsert_gauge(&self, name: &str, value: f64) -> Result<(), StorageError>;

    /// Create a counter record, or add `delta` to the stored total.
    ///
    /// Must be a single atomic backend operation so concurrent calls for the
    /// same name never lose an increment.
    async fn upsert_counter(&self, name: &str, delta: i64) -> Result<(), StorageError>;

    /// Apply every record as an incremental upsert, all or nothing.
    ///
    /// Gauges replace, counters accumulate. If any record fails, no effect of
    /// the batch is visible and the whole call fails.
    async fn commit_batch(&self, records: &[DurableRecord]) -> Result<(), StorageError>;

    /// Write an absolute snapshot, all or nothing.
    ///
    /// Unlike [`commit_batch`](Self::commit_batch), counter records carry
    /// totals and replace the stored value. A file holds exactly the
    /// snapshot afterwards; a table keeps rows the snapshot does not name.
    async fn store_snapshot(&self, records: &[DurableRecord]) -> Result<(), StorageError>;

    /// Every currently stored record.
    async fn load_all(&self) -> Result<Vec<DurableRecord>, StorageError>;

    /// Liveness probe of the backend, independent of metric operations.
    async fn ping(&self) -> Result<(), StorageError>;

    /// Release backend resources.
    async fn close(&self) {}
}

/// Validate a durable record before it is applied by a backend.
pub(crate) fn checked(record: &DurableRecord) -> Result<MetricUpdate, StorageError> {
    MetricUpdate::try_from(record.clone()).map_err(|e| StorageError::InvalidData(e.to_string()))
}
