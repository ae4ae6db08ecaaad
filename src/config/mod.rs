//! Configuration module for Metrika.
//!
//! Provides YAML-based configuration loading and validation for:
//! - Server settings (listen address)
//! - Storage settings (snapshot file, database DSN, flush interval, restore)
//! - Retry schedule
//! - Agent settings (collector address, poll and report intervals)

mod agent;
mod app;
mod validation;

pub use agent::AgentConfig;
pub use app::{AppConfig, RetryConfig, ServerConfig, StorageConfig};
pub use validation::{ConfigError, expand_env_vars, parse_delays, parse_duration};

// Re-export constants
pub use agent::{
    DEFAULT_AGENT_ADDRESS, DEFAULT_POLL_INTERVAL, DEFAULT_PUSH_TIMEOUT, DEFAULT_REPORT_INTERVAL,
};
pub use app::{DEFAULT_FILE_STORAGE_PATH, DEFAULT_SERVER_ADDRESS};
