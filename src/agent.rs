//! Metrics agent.
//!
//! Samples host and process figures into a local [`MetricStore`](crate::storage::MetricStore)
//! and pushes them to the collector's batch endpoint:
//! - [`SystemCollector`]: sysinfo-based sampling plus the `PollCount` counter
//! - [`Reporter`]: JSON batch push with retry
//! - [`Agent`]: poll/report loop with graceful shutdown

mod collector;
mod error;
mod reporter;
mod runner;

pub use collector::{POLL_COUNT, SystemCollector};
pub use error::AgentError;
pub use reporter::{Reporter, batch_endpoint};
pub use runner::Agent;
