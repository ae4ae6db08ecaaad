//! Batch push of agent metrics to the collector.

use std::time::Duration;

use reqwest::Client;

use crate::agent::AgentError;
use crate::storage::{DurableRecord, MetricKind, MetricStore, RetryPolicy};

/// Build the batch endpoint URL from a `host:port` or `http(s)://` address.
pub fn batch_endpoint(address: &str) -> Result<String, AgentError> {
    let address = address.trim().trim_end_matches('/');
    if address.is_empty() {
        return Err(AgentError::Config("collector address is empty".to_string()));
    }

    if address.starts_with("http://") || address.starts_with("https://") {
        Ok(format!("{address}/updates/"))
    } else {
        Ok(format!("http://{address}/updates/"))
    }
}

/// Posts store snapshots to the collector's batch endpoint.
pub struct Reporter {
    client: Client,
    endpoint: String,
    retry: RetryPolicy,
    timeout: Duration,
}

impl std::fmt::Debug for Reporter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reporter")
            .field("endpoint", &self.endpoint)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

impl Reporter {
    /// Create a reporter for the collector at `address`.
    ///
    /// Each push attempt is bounded by `timeout`.
    ///
    /// # Errors
    /// Returns `AgentError::Config` if the address is empty or the HTTP client
    /// cannot be built.
    pub fn new(address: &str, retry: RetryPolicy, timeout: Duration) -> Result<Self, AgentError> {
        let endpoint = batch_endpoint(address)?;

        // Build HTTP client with timeout
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AgentError::Config(format!("Failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            endpoint,
            retry,
            timeout,
        })
    }

    /// Batch endpoint URL.
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Post `records` once.
    pub async fn push(&self, records: &[DurableRecord]) -> Result<(), AgentError> {
        let response = self
            .client
            .post(&self.endpoint)
            .json(records)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    AgentError::Timeout(self.timeout)
                } else {
                    AgentError::Http(e)
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AgentError::Status {
                status: status.as_u16(),
                body,
            });
        }
        Ok(())
    }

    /// Push the current contents of `store` with retry.
    ///
    /// Counters carry deltas on the wire: after a successful push the pushed
    /// amounts are subtracted from the local totals, so increments made
    /// during the push are kept for the next report. Counters with nothing
    /// new are left out. Returns the number of records pushed.
    pub async fn report(&self, store: &MetricStore) -> Result<usize, AgentError> {
        let mut records = store.snapshot();
        records.retain(|r| !(r.kind == MetricKind::Counter && r.delta == Some(0)));
        if records.is_empty() {
            return Ok(0);
        }

        self.retry
            .run("push_metrics", || self.push(&records))
            .await?;

        for record in &records {
            if record.kind == MetricKind::Counter
                && let Some(delta) = record.delta
            {
                store.add_counter(&record.id, delta.saturating_neg());
            }
        }

        tracing::debug!(endpoint = %self.endpoint, count = records.len(), "Metrics reported");
        Ok(records.len())
    }
}
