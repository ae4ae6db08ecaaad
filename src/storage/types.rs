//! Core data types for the storage layer.
//!
//! - [`MetricKind`]: Gauge or counter namespace
//! - [`DurableRecord`]: Wire and on-disk representation of one metric
//! - [`MetricUpdate`]: Validated, typed mutation accepted by the store

use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display, EnumString};

use crate::storage::ValidationError;

/// Metric kind classification.
///
/// Gauges and counters occupy independent namespaces, so the same name may
/// exist once per kind.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Serialize,
    Deserialize,
    EnumString,
    Display,
    AsRefStr,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum MetricKind {
    /// Point-in-time value, replaced on every update.
    Gauge,
    /// Running total, every update adds a delta.
    Counter,
}

impl MetricKind {
    /// Parse a kind, mapping unknown names to a validation error.
    pub fn parse(kind: &str) -> Result<Self, ValidationError> {
        kind.parse()
            .map_err(|_| ValidationError::UnknownKind(kind.to_string()))
    }
}

/// One metric as written to a snapshot file, a database row, or the wire.
///
/// `value` is present only for gauges, `delta` only for counters.
///
/// # Example
///
/// ```
/// use metrika::storage::{DurableRecord, MetricKind};
///
/// let record = DurableRecord::counter("PollCount", 3);
/// assert_eq!(record.kind, MetricKind::Counter);
/// assert_eq!(
///     serde_json::to_string(&record).unwrap(),
///     r#"{"id":"PollCount","type":"counter","delta":3}"#
/// );
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DurableRecord {
    /// Metric name.
    pub id: String,
    /// Metric kind.
    #[serde(rename = "type")]
    pub kind: MetricKind,
    /// Counter total or delta.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delta: Option<i64>,
    /// Gauge value.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<f64>,
}

impl DurableRecord {
    /// Create a gauge record.
    pub fn gauge(id: impl Into<String>, value: f64) -> Self {
        Self {
            id: id.into(),
            kind: MetricKind::Gauge,
            delta: None,
            value: Some(value),
        }
    }

    /// Create a counter record.
    pub fn counter(id: impl Into<String>, delta: i64) -> Self {
        Self {
            id: id.into(),
            kind: MetricKind::Counter,
            delta: Some(delta),
            value: None,
        }
    }
}

/// A validated metric mutation.
///
/// Untyped input (URL segments, JSON bodies) is converted into this type once,
/// at the validation boundary. The store only ever sees `MetricUpdate`.
#[derive(Debug, Clone, PartialEq)]
pub enum MetricUpdate {
    /// Replace the gauge value.
    Gauge { name: String, value: f64 },
    /// Add `delta` to the counter total.
    Counter { name: String, delta: i64 },
}

impl MetricUpdate {
    /// Parse an update from its textual parts (`/update/{kind}/{name}/{value}`).
    ///
    /// # Errors
    /// - `MissingName` if `name` is empty
    /// - `UnknownKind` if `kind` is not `gauge` or `counter`
    /// - `InvalidValue` if `raw` does not parse for the kind
    pub fn parse(kind: &str, name: &str, raw: &str) -> Result<Self, ValidationError> {
        if name.is_empty() {
            return Err(ValidationError::MissingName);
        }

        match MetricKind::parse(kind)? {
            MetricKind::Gauge => {
                let value = raw
                    .trim()
                    .parse::<f64>()
                    .ok()
                    .filter(|v| v.is_finite())
                    .ok_or_else(|| ValidationError::InvalidValue {
                        kind: "gauge",
                        raw: raw.to_string(),
                    })?;
                Ok(Self::Gauge {
                    name: name.to_string(),
                    value,
                })
            }
            MetricKind::Counter => {
                let delta =
                    raw.trim()
                        .parse::<i64>()
                        .map_err(|_| ValidationError::InvalidValue {
                            kind: "counter",
                            raw: raw.to_string(),
                        })?;
                Ok(Self::Counter {
                    name: name.to_string(),
                    delta,
                })
            }
        }
    }

    /// Metric name.
    pub fn name(&self) -> &str {
        match self {
            Self::Gauge { name, .. } | Self::Counter { name, .. } => name,
        }
    }

    /// Metric kind.
    pub fn kind(&self) -> MetricKind {
        match self {
            Self::Gauge { .. } => MetricKind::Gauge,
            Self::Counter { .. } => MetricKind::Counter,
        }
    }
}

impl TryFrom<DurableRecord> for MetricUpdate {
    type Error = ValidationError;

    fn try_from(record: DurableRecord) -> Result<Self, Self::Error> {
        if record.id.is_empty() {
            return Err(ValidationError::MissingName);
        }

        match record.kind {
            MetricKind::Gauge => {
                let value = record.value.ok_or_else(|| ValidationError::MissingValue {
                    kind: "gauge",
                    name: record.id.clone(),
                    field: "value",
                })?;
                if !value.is_finite() {
                    return Err(ValidationError::InvalidValue {
                        kind: "gauge",
                        raw: value.to_string(),
                    });
                }
                Ok(Self::Gauge {
                    name: record.id,
                    value,
                })
            }
            MetricKind::Counter => {
                let delta = record.delta.ok_or_else(|| ValidationError::MissingValue {
                    kind: "counter",
                    name: record.id.clone(),
                    field: "delta",
                })?;
                Ok(Self::Counter {
                    name: record.id,
                    delta,
                })
            }
        }
    }
}

impl From<MetricUpdate> for DurableRecord {
    fn from(update: MetricUpdate) -> Self {
        match update {
            MetricUpdate::Gauge { name, value } => Self::gauge(name, value),
            MetricUpdate::Counter { name, delta } => Self::counter(name, delta),
        }
    }
}
