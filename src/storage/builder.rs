//! Storage builder and handles.
//!
//! Provides a builder pattern for constructing the storage layer
//! and a handles struct for accessing the store and its repository.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use crate::storage::repository::DEFAULT_FLUSH_TIMEOUT;
use crate::storage::{
    FileBackend, FlushMode, MetricStore, Persistence, Repository, RetryPolicy, SqlBackend,
    StorageError,
};

/// Default interval between snapshot flushes for the file backend.
pub const DEFAULT_STORE_INTERVAL: Duration = Duration::from_secs(300);

/// Which durable backend to use.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendConfig {
    /// No durability, metrics live only in memory.
    Memory,
    /// Whole-file JSON snapshot at `path`.
    File { path: PathBuf },
    /// SQLite database at `url` (e.g. `sqlite:data/metrics.db`).
    Database { url: String },
}

/// Builder for constructing the storage layer.
pub struct StorageBuilder {
    backend: BackendConfig,
    restore: bool,
    store_interval: Duration,
    flush_mode: Option<FlushMode>,
    retry: RetryPolicy,
    flush_timeout: Duration,
}

impl StorageBuilder {
    /// Create a new storage builder for the given backend.
    ///
    /// Restore is enabled and the file backend flushes every 300 seconds.
    pub fn new(backend: BackendConfig) -> Self {
        Self {
            backend,
            restore: true,
            store_interval: DEFAULT_STORE_INTERVAL,
            flush_mode: None,
            retry: RetryPolicy::default(),
            flush_timeout: DEFAULT_FLUSH_TIMEOUT,
        }
    }

    /// Load the backend's records into the store on build.
    pub fn restore(mut self, restore: bool) -> Self {
        self.restore = restore;
        self
    }

    /// Set the snapshot interval for the file backend.
    ///
    /// Zero means every update is written synchronously.
    pub fn store_interval(mut self, interval: Duration) -> Self {
        self.store_interval = interval;
        self
    }

    /// Override the flush mode derived from the backend.
    pub fn flush_mode(mut self, mode: FlushMode) -> Self {
        self.flush_mode = Some(mode);
        self
    }

    /// Set the retry policy for backend writes.
    pub fn retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Set the deadline for a single snapshot flush attempt.
    pub fn flush_timeout(mut self, timeout: Duration) -> Self {
        self.flush_timeout = timeout;
        self
    }

    fn resolve_mode(&self) -> FlushMode {
        if let Some(mode) = self.flush_mode {
            return mode;
        }
        match self.backend {
            BackendConfig::File { .. } if !self.store_interval.is_zero() => {
                FlushMode::Periodic(self.store_interval)
            }
            _ => FlushMode::WriteThrough,
        }
    }

    /// Build the storage layer and return handles.
    ///
    /// Connects the backend, restores saved metrics if enabled, and starts
    /// the periodic flush task. Must be called inside a Tokio runtime.
    ///
    /// # Errors
    /// - `StorageError::Io` if the snapshot file cannot be opened or created
    /// - `StorageError::Database` if the database is unreachable
    ///
    /// Snapshot content that cannot be decoded is logged and the store
    /// starts empty.
    pub async fn build(self) -> Result<StorageHandles, StorageError> {
        let mode = self.resolve_mode();

        let backend: Option<Arc<dyn Persistence>> = match &self.backend {
            BackendConfig::Memory => None,
            BackendConfig::File { path } => Some(Arc::new(FileBackend::open(path).await?)),
            BackendConfig::Database { url } => Some(Arc::new(SqlBackend::connect(url).await?)),
        };

        let store = Arc::new(MetricStore::new());
        let repository = Arc::new(
            Repository::new(Arc::clone(&store), backend)
                .with_mode(mode)
                .with_retry(self.retry)
                .with_flush_timeout(self.flush_timeout),
        );

        if self.restore {
            match repository.restore().await {
                Ok(_) => {}
                Err(StorageError::Codec(e)) => {
                    tracing::warn!(error = %e, "Saved metrics are not decodable, starting empty");
                }
                Err(e) => return Err(e),
            }
        }

        repository.start();

        tracing::info!(
            backend = repository.backend_name().unwrap_or("memory"),
            mode = ?mode,
            restored = store.len(),
            "Storage initialized"
        );

        Ok(StorageHandles { store, repository })
    }
}

/// Handles to the storage layer.
#[derive(Debug, Clone)]
pub struct StorageHandles {
    /// The in-memory metric table.
    pub store: Arc<MetricStore>,
    /// Store plus backend coordination, shared by request handlers.
    pub repository: Arc<Repository>,
}

impl StorageHandles {
    /// Gracefully shutdown the storage layer.
    ///
    /// Stops the periodic flush, runs the final flush with retry, and
    /// closes the backend.
    pub async fn shutdown(self) -> Result<(), StorageError> {
        self.repository.shutdown().await
    }
}
