//! System metrics sampling via sysinfo.

use std::sync::Arc;

use sysinfo::{Pid, ProcessRefreshKind, ProcessesToUpdate, System};

use crate::storage::{MetricStore, MetricUpdate};

/// Counter incremented once per poll.
pub const POLL_COUNT: &str = "PollCount";

/// Samples host and process figures into a [`MetricStore`].
///
/// Every poll sets the gauges and adds one to [`POLL_COUNT`] in a single
/// store batch, so a concurrent snapshot never sees half a sample.
pub struct SystemCollector {
    system: System,
    pid: Option<Pid>,
    store: Arc<MetricStore>,
}

impl std::fmt::Debug for SystemCollector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SystemCollector")
            .field("pid", &self.pid)
            .finish_non_exhaustive()
    }
}

impl SystemCollector {
    /// Create a collector writing into `store`.
    pub fn new(store: Arc<MetricStore>) -> Self {
        let pid = match sysinfo::get_current_pid() {
            Ok(pid) => Some(pid),
            Err(e) => {
                tracing::warn!(error = e, "Process metrics unavailable");
                None
            }
        };

        Self {
            system: System::new(),
            pid,
            store,
        }
    }

    /// The store this collector writes into.
    pub fn store(&self) -> &Arc<MetricStore> {
        &self.store
    }

    /// Take one sample. Returns the number of gauges written.
    pub fn poll(&mut self) -> usize {
        self.system.refresh_memory();
        self.system.refresh_cpu_usage();

        let mut gauges: Vec<(&'static str, f64)> = vec![
            ("TotalMemory", self.system.total_memory() as f64),
            ("UsedMemory", self.system.used_memory() as f64),
            ("FreeMemory", self.system.free_memory() as f64),
            ("AvailableMemory", self.system.available_memory() as f64),
            ("TotalSwap", self.system.total_swap() as f64),
            ("UsedSwap", self.system.used_swap() as f64),
            ("FreeSwap", self.system.free_swap() as f64),
            ("CPUutilization", f64::from(self.system.global_cpu_usage())),
            ("Uptime", System::uptime() as f64),
        ];

        if let Some(pid) = self.pid {
            self.system.refresh_processes_specifics(
                ProcessesToUpdate::Some(&[pid]),
                true,
                ProcessRefreshKind::nothing().with_memory().with_cpu(),
            );
            if let Some(process) = self.system.process(pid) {
                gauges.push(("ProcessMemory", process.memory() as f64));
                gauges.push(("ProcessVirtualMemory", process.virtual_memory() as f64));
                gauges.push(("ProcessCPU", f64::from(process.cpu_usage())));
            }
        }

        let mut updates: Vec<MetricUpdate> = gauges
            .into_iter()
            .filter(|(_, value)| value.is_finite())
            .map(|(name, value)| MetricUpdate::Gauge {
                name: name.to_string(),
                value,
            })
            .collect();
        let count = updates.len();
        updates.push(MetricUpdate::Counter {
            name: POLL_COUNT.to_string(),
            delta: 1,
        });

        self.store.apply_batch(&updates);
        tracing::debug!(gauges = count, "System metrics polled");
        count
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_poll_populates_gauges_and_counter() {
        let store = Arc::new(MetricStore::new());
        let mut collector = SystemCollector::new(Arc::clone(&store));

        let gauges = collector.poll();
        collector.poll();

        assert!(gauges >= 9);
        assert_eq!(store.counter(POLL_COUNT), Some(2));
        assert!(store.gauge("TotalMemory").is_some());
        assert!(store.gauge("CPUutilization").is_some());
        assert_eq!(store.len(), gauges + 1);
    }
}
