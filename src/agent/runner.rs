//! Agent main loop.

use std::future::Future;
use std::sync::Arc;

use tokio::time::{Duration, Instant, MissedTickBehavior};

use crate::agent::{AgentError, Reporter, SystemCollector};
use crate::config::AgentConfig;
use crate::storage::MetricStore;

/// Periodically samples system metrics and pushes them to the collector.
#[derive(Debug)]
pub struct Agent {
    collector: SystemCollector,
    reporter: Reporter,
    poll_interval: Duration,
    report_interval: Duration,
}

impl Agent {
    /// Create an agent from configuration.
    ///
    /// # Errors
    /// Returns `AgentError::Config` if the configuration is invalid.
    pub fn new(config: &AgentConfig) -> Result<Self, AgentError> {
        config
            .validate()
            .map_err(|e| AgentError::Config(e.to_string()))?;
        let retry = config
            .retry
            .policy()
            .map_err(|e| AgentError::Config(e.to_string()))?;

        let store = Arc::new(MetricStore::new());
        Ok(Self {
            collector: SystemCollector::new(store),
            reporter: Reporter::new(&config.address, retry, config.push_timeout)?,
            poll_interval: config.poll_interval,
            report_interval: config.report_interval,
        })
    }

    /// The agent-side metric store.
    pub fn store(&self) -> &Arc<MetricStore> {
        self.collector.store()
    }

    /// Run until Ctrl+C or SIGTERM.
    pub async fn run(self) -> Result<(), AgentError> {
        self.run_until(crate::signal::shutdown_signal()).await
    }

    /// Run until `shutdown` completes, then push one final report.
    ///
    /// Failed reports are logged; the counters they carried stay in the
    /// store and go out with the next report.
    pub async fn run_until(mut self, shutdown: impl Future<Output = ()>) -> Result<(), AgentError> {
        let mut poll = tokio::time::interval(self.poll_interval);
        poll.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut report =
            tokio::time::interval_at(Instant::now() + self.report_interval, self.report_interval);
        report.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tokio::pin!(shutdown);

        tracing::info!(
            endpoint = self.reporter.endpoint(),
            poll_interval = ?self.poll_interval,
            report_interval = ?self.report_interval,
            "Agent started"
        );

        loop {
            tokio::select! {
                _ = poll.tick() => {
                    self.collector.poll();
                }
                _ = report.tick() => {
                    if let Err(e) = self.reporter.report(self.collector.store()).await {
                        tracing::error!(error = %e, "Failed to report metrics");
                    }
                }
                _ = &mut shutdown => {
                    tracing::info!("Shutdown requested");
                    break;
                }
            }
        }

        match self.reporter.report(self.collector.store()).await {
            Ok(count) => tracing::info!(count, "Final report sent"),
            Err(e) => tracing::error!(error = %e, "Final report failed"),
        }
        Ok(())
    }
}
