//! Configuration loading and validation utilities.

use std::path::Path;
use std::time::Duration;

use serde::de::DeserializeOwned;
use thiserror::Error;

/// Configuration error types.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read configuration file.
    #[error("failed to read config file: {0}")]
    IoError(#[from] std::io::Error),

    /// Failed to parse YAML configuration.
    #[error("failed to parse YAML config: {0}")]
    ParseError(#[from] serde_yaml::Error),

    /// Configuration validation failed.
    #[error("config validation error: {0}")]
    ValidationError(String),
}

/// Parse duration string using humantime.
///
/// Supports various formats: `30s`, `1m`, `5m30s`, `1h`, `100ms`, etc.
///
/// # Examples
///
/// ```
/// use metrika::config::parse_duration;
///
/// assert_eq!(parse_duration("1s").unwrap().as_secs(), 1);
/// assert_eq!(parse_duration("5m").unwrap().as_secs(), 300);
/// assert_eq!(parse_duration("250ms").unwrap().as_millis(), 250);
/// ```
pub fn parse_duration(s: &str) -> Result<Duration, String> {
    let s = s.trim();
    if s.is_empty() {
        return Err("duration string is empty".to_string());
    }
    humantime::parse_duration(s).map_err(|e| e.to_string())
}

/// Parse a retry schedule, rejecting delays that are not ascending.
pub fn parse_delays(delays: &[String]) -> Result<Vec<Duration>, ConfigError> {
    let parsed = delays
        .iter()
        .map(|d| {
            parse_duration(d)
                .map_err(|e| ConfigError::ValidationError(format!("retry delay '{d}': {e}")))
        })
        .collect::<Result<Vec<_>, _>>()?;

    if parsed.windows(2).any(|w| w[1] < w[0]) {
        return Err(ConfigError::ValidationError(
            "retry delays must be ascending".to_string(),
        ));
    }
    Ok(parsed)
}

/// Expand environment variables in a string.
/// Supports ${VAR} and ${VAR:-default} syntax.
pub fn expand_env_vars(input: &str) -> String {
    static ENV_VAR_REGEX: std::sync::OnceLock<regex::Regex> = std::sync::OnceLock::new();

    let regex = ENV_VAR_REGEX.get_or_init(|| {
        regex::Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)(?::-([^}]*))?\}")
            .expect("failed to compile env var regex")
    });

    regex
        .replace_all(input, |caps: &regex::Captures| {
            let var_name = &caps[1];
            let default_value = caps.get(2).map(|m| m.as_str()).unwrap_or("");
            std::env::var(var_name).unwrap_or_else(|_| default_value.to_string())
        })
        .into_owned()
}

/// Read a YAML file, expand `${VAR}` references, and deserialize it.
pub(crate) fn read_yaml<T: DeserializeOwned>(path: impl AsRef<Path>) -> Result<T, ConfigError> {
    let content = std::fs::read_to_string(path.as_ref())?;
    Ok(serde_yaml::from_str(&expand_env_vars(&content))?)
}
