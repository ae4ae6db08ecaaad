//! Server configuration structures.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::storage::{
    BackendConfig, DEFAULT_FLUSH_TIMEOUT, DEFAULT_STORE_INTERVAL, RetryPolicy, StorageBuilder,
};

use super::validation::{ConfigError, parse_delays, read_yaml};

// =============================================================================
// Constants
// =============================================================================

/// Default server listen address.
pub const DEFAULT_SERVER_ADDRESS: &str = "0.0.0.0:8080";

/// Default snapshot file path.
pub const DEFAULT_FILE_STORAGE_PATH: &str = "./metrics.json";

fn default_retry_delays() -> Vec<String> {
    vec!["1s".to_string(), "3s".to_string(), "5s".to_string()]
}

/// Check that `address` looks like `host:port`.
pub(crate) fn validate_address(address: &str, field: &str) -> Result<(), ConfigError> {
    let valid = address
        .rsplit_once(':')
        .is_some_and(|(host, port)| !host.is_empty() && port.parse::<u16>().is_ok_and(|p| p > 0));
    if valid {
        Ok(())
    } else {
        Err(ConfigError::ValidationError(format!(
            "invalid {field}: '{address}' (expected host:port)"
        )))
    }
}

// =============================================================================
// Server Configuration
// =============================================================================

/// Web server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Listen address as `host:port` (default: "0.0.0.0:8080").
    pub address: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            address: DEFAULT_SERVER_ADDRESS.to_string(),
        }
    }
}

// =============================================================================
// Storage Configuration
// =============================================================================

/// Durability configuration.
///
/// A non-empty `database_dsn` selects the SQLite backend; otherwise a
/// non-empty `file_storage_path` selects the snapshot file; otherwise metrics
/// are kept in memory only.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Snapshot file path (default: "./metrics.json").
    pub file_storage_path: String,

    /// Database connection URL, e.g. `sqlite:data/metrics.db`.
    pub database_dsn: String,

    /// Snapshot interval for the file backend (default: 300s, 0 = synchronous).
    #[serde(with = "humantime_serde")]
    pub store_interval: Duration,

    /// Load saved metrics on startup (default: false).
    pub restore: bool,

    /// Deadline for one snapshot flush attempt (default: 10s).
    #[serde(with = "humantime_serde")]
    pub flush_timeout: Duration,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            file_storage_path: DEFAULT_FILE_STORAGE_PATH.to_string(),
            database_dsn: String::new(),
            store_interval: DEFAULT_STORE_INTERVAL,
            restore: false,
            flush_timeout: DEFAULT_FLUSH_TIMEOUT,
        }
    }
}

impl StorageConfig {
    /// Backend selected by this configuration.
    pub fn backend(&self) -> BackendConfig {
        if !self.database_dsn.trim().is_empty() {
            BackendConfig::Database {
                url: self.database_dsn.trim().to_string(),
            }
        } else if !self.file_storage_path.trim().is_empty() {
            BackendConfig::File {
                path: PathBuf::from(self.file_storage_path.trim()),
            }
        } else {
            BackendConfig::Memory
        }
    }
}

// =============================================================================
// Retry Configuration
// =============================================================================

/// Backoff schedule shared by every external write.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Delays between attempts (default: ["1s", "3s", "5s"]).
    pub delays: Vec<String>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            delays: default_retry_delays(),
        }
    }
}

impl RetryConfig {
    /// Build the retry policy.
    ///
    /// # Errors
    /// Returns `ConfigError::ValidationError` if a delay does not parse or
    /// the schedule is not ascending.
    pub fn policy(&self) -> Result<RetryPolicy, ConfigError> {
        Ok(RetryPolicy::new(parse_delays(&self.delays)?))
    }
}

// =============================================================================
// Application Configuration
// =============================================================================

/// Top-level server configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Web server configuration.
    pub server: ServerConfig,

    /// Storage configuration.
    pub storage: StorageConfig,

    /// Retry configuration.
    pub retry: RetryConfig,
}

impl AppConfig {
    /// Load configuration from a YAML file.
    ///
    /// `${VAR}` and `${VAR:-default}` references are expanded before parsing.
    ///
    /// # Errors
    /// Returns `ConfigError` if the file cannot be read, parsed, or validated.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let config: Self = read_yaml(path)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration values.
    ///
    /// # Errors
    /// Returns `ConfigError::ValidationError` if any field is invalid.
    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_address(&self.server.address, "server address")?;

        if self.storage.flush_timeout.is_zero() {
            return Err(ConfigError::ValidationError(
                "storage flush_timeout must be positive".to_string(),
            ));
        }

        self.retry.policy()?;

        Ok(())
    }

    /// Storage builder configured from this file.
    ///
    /// # Errors
    /// Returns `ConfigError` if the retry schedule is invalid.
    pub fn storage_builder(&self) -> Result<StorageBuilder, ConfigError> {
        Ok(StorageBuilder::new(self.storage.backend())
            .restore(self.storage.restore)
            .store_interval(self.storage.store_interval)
            .flush_timeout(self.storage.flush_timeout)
            .retry(self.retry.policy()?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = AppConfig::default();
        assert_eq!(config.server.address, "0.0.0.0:8080");
        assert_eq!(config.storage.store_interval, Duration::from_secs(300));
        assert!(!config.storage.restore);
        assert_eq!(
            config.retry.policy().unwrap().delays(),
            &[
                Duration::from_secs(1),
                Duration::from_secs(3),
                Duration::from_secs(5)
            ]
        );
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_backend_selection() {
        let mut storage = StorageConfig::default();
        assert_eq!(
            storage.backend(),
            BackendConfig::File {
                path: PathBuf::from("./metrics.json")
            }
        );

        storage.database_dsn = "sqlite:metrics.db".to_string();
        assert_eq!(
            storage.backend(),
            BackendConfig::Database {
                url: "sqlite:metrics.db".to_string()
            }
        );

        storage.database_dsn.clear();
        storage.file_storage_path.clear();
        assert_eq!(storage.backend(), BackendConfig::Memory);
    }

    #[test]
    fn test_load_yaml() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
server:
  address: "127.0.0.1:9090"
storage:
  file_storage_path: ""
  database_dsn: "${{METRIKA_UNSET_DSN_TEST:-sqlite:test.db}}"
  store_interval: 0s
  restore: true
retry:
  delays: ["10ms", "20ms"]
"#
        )
        .unwrap();

        let config = AppConfig::load(file.path()).unwrap();
        assert_eq!(config.server.address, "127.0.0.1:9090");
        assert_eq!(config.storage.store_interval, Duration::ZERO);
        assert!(config.storage.restore);
        assert_eq!(config.storage.flush_timeout, DEFAULT_FLUSH_TIMEOUT);
        assert_eq!(
            config.storage.backend(),
            BackendConfig::Database {
                url: "sqlite:test.db".to_string()
            }
        );
        assert_eq!(config.retry.policy().unwrap().max_attempts(), 3);
    }

    #[test]
    fn test_validation_invalid_address() {
        let mut config = AppConfig::default();
        config.server.address = "localhost".to_string();

        let result = config.validate();
        assert!(result.is_err());
        assert!(
            result
                .unwrap_err()
                .to_string()
                .contains("invalid server address")
        );

        config.server.address = "localhost:0".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validation_invalid_retry() {
        let mut config = AppConfig::default();
        config.retry.delays = vec!["3s".to_string(), "1s".to_string()];
        assert!(config.validate().is_err());
    }
}
