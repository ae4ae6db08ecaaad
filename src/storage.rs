//! Storage Layer
//!
//! Concurrent in-memory metric state with pluggable durability:
//! - **Store**: one reader/writer lock over gauges and counters
//! - **Backends**: JSON snapshot file or SQLite table, behind [`Persistence`]
//! - **Repository**: write-through or periodic snapshot flushing with bounded retry
//!
//! # Components
//!
//! - [`MetricStore`]: Gauge overwrite and counter accumulation semantics
//! - [`MetricUpdate`] / [`DurableRecord`]: Validated mutations and their durable form
//! - [`RetryPolicy`]: Fixed backoff schedule shared by every external write
//! - [`FileBackend`] / [`SqlBackend`]: [`Persistence`] implementations
//! - [`SnapshotCodec`]: Snapshot file encoding
//! - [`Repository`]: Store plus backend coordination
//! - [`StorageBuilder`] / [`StorageHandles`]: Initialization and lifecycle management

mod builder;
mod codec;
pub mod db;
mod error;
mod file;
mod persistence;
mod repository;
mod retry;
pub mod schema;
mod sql;
mod store;
mod types;

pub use builder::{BackendConfig, DEFAULT_STORE_INTERVAL, StorageBuilder, StorageHandles};
pub use codec::SnapshotCodec;
pub use error::{CodecError, StorageError, ValidationError};
pub use file::FileBackend;
pub use persistence::Persistence;
pub use repository::{DEFAULT_FLUSH_TIMEOUT, FlushMode, Repository};
pub use retry::{DEFAULT_RETRY_DELAYS, RetryPolicy};
pub use sql::SqlBackend;
pub use store::MetricStore;
pub use types::{DurableRecord, MetricKind, MetricUpdate};
