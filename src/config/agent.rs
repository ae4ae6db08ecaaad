//! Agent configuration structures.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::app::{RetryConfig, validate_address};
use super::validation::{ConfigError, read_yaml};

/// Default collector address.
pub const DEFAULT_AGENT_ADDRESS: &str = "localhost:8080";

/// Default interval between system samples.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(2);

/// Default interval between pushes to the collector.
pub const DEFAULT_REPORT_INTERVAL: Duration = Duration::from_secs(10);

/// Default deadline for one push attempt.
pub const DEFAULT_PUSH_TIMEOUT: Duration = Duration::from_secs(5);

/// Agent configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    /// Collector address as `host:port` or a full `http(s)://` URL.
    pub address: String,

    /// Sampling interval (default: 2s).
    #[serde(with = "humantime_serde")]
    pub poll_interval: Duration,

    /// Push interval (default: 10s).
    #[serde(with = "humantime_serde")]
    pub report_interval: Duration,

    /// Deadline for a single push attempt (default: 5s).
    #[serde(with = "humantime_serde")]
    pub push_timeout: Duration,

    /// Retry schedule for pushes.
    pub retry: RetryConfig,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            address: DEFAULT_AGENT_ADDRESS.to_string(),
            poll_interval: DEFAULT_POLL_INTERVAL,
            report_interval: DEFAULT_REPORT_INTERVAL,
            push_timeout: DEFAULT_PUSH_TIMEOUT,
            retry: RetryConfig::default(),
        }
    }
}

impl AgentConfig {
    /// Load configuration from a YAML file.
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
        let host = self
            .address
            .trim()
            .trim_start_matches("http://")
            .trim_start_matches("https://")
            .trim_end_matches('/');
        validate_address(host, "collector address")?;

        for (name, value) in [
            ("poll_interval", self.poll_interval),
            ("report_interval", self.report_interval),
            ("push_timeout", self.push_timeout),
        ] {
            if value.is_zero() {
                return Err(ConfigError::ValidationError(format!(
                    "agent {name} must be positive"
                )));
            }
        }

        self.retry.policy()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_agent_config_default() {
        let config = AgentConfig::default();
        assert_eq!(config.address, "localhost:8080");
        assert_eq!(config.poll_interval, Duration::from_secs(2));
        assert_eq!(config.report_interval, Duration::from_secs(10));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_agent_config_accepts_url() {
        let config = AgentConfig {
            address: "http://collector.local:8080/".to_string(),
            ..Default::default()
        };
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_agent_config_rejects_zero_interval() {
        let config = AgentConfig {
            report_interval: Duration::ZERO,
            ..Default::default()
        };
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("report_interval"));
    }

    #[test]
    fn test_agent_config_load() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "address: \"127.0.0.1:18080\"\npoll_interval: 500ms\nreport_interval: 3s\n"
        )
        .unwrap();

        let config = AgentConfig::load(file.path()).unwrap();
        assert_eq!(config.address, "127.0.0.1:18080");
        assert_eq!(config.poll_interval, Duration::from_millis(500));
        assert_eq!(config.report_interval, Duration::from_secs(3));
        assert_eq!(config.push_timeout, DEFAULT_PUSH_TIMEOUT);
    }
}
