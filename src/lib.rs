//! Metrika - Metrics Collection Library
//!
//! This crate provides the core functionality for the Metrika metrics server
//! and its reporting agent. It can be used as a library, or run through the
//! `metrika` (server) and `metrika-agent` executables.
//!
//! # Architecture
//!
//! - **Storage**: Concurrent in-memory gauges and counters with file or SQLite durability
//! - **Server**: HTTP API for metric updates and lookups
//! - **Agent**: System metrics sampling and batch push to the server
//! - **Config**: YAML configuration with environment overrides
//!
//! # Example
//!
//! ```rust,ignore
//! use metrika::storage::{BackendConfig, StorageBuilder};
//! use metrika::server::{AppState, create_router};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let handles = StorageBuilder::new(BackendConfig::File { path: "metrics.json".into() })
//!         .build()
//!         .await?;
//!     let app = create_router(AppState { repository: handles.repository.clone() });
//!
//!     let listener = tokio::net::TcpListener::bind("0.0.0.0:8080").await?;
//!     axum::serve(listener, app).await?;
//!     handles.shutdown().await?;
//!     Ok(())
//! }
//! ```

pub mod agent;
pub mod config;
pub mod server;
pub mod signal;
pub mod storage;

pub use agent::{Agent, AgentError};
pub use config::{AgentConfig, AppConfig, ConfigError};
pub use storage::{
    DurableRecord, MetricKind, MetricStore, MetricUpdate, Persistence, Repository, RetryPolicy,
    StorageBuilder, StorageError, StorageHandles,
};
