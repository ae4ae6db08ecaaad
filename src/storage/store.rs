//! Concurrent in-memory metric table.
//!
//! All mutations and snapshot reads go through one reader/writer lock:
//! point lookups run in parallel, every write is exclusive. Critical sections
//! are pure in-memory work; persistence happens after the lock is released.

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::storage::{DurableRecord, MetricKind, MetricUpdate};

#[derive(Debug, Default)]
struct Metrics {
    gauges: HashMap<String, f64>,
    counters: HashMap<String, i64>,
}

impl Metrics {
    fn apply(&mut self, update: &MetricUpdate) -> DurableRecord {
        match update {
            MetricUpdate::Gauge { name, value } => {
                self.gauges.insert(name.clone(), *value);
                DurableRecord::gauge(name.as_str(), *value)
            }
            MetricUpdate::Counter { name, delta } => {
                let total = self.counters.entry(name.clone()).or_insert(0);
                *total = total.saturating_add(*delta);
                DurableRecord::counter(name.as_str(), *total)
            }
        }
    }
}

/// Thread-safe holder of current gauge and counter values.
///
/// Callers never get references into the table: reads return copies and
/// writes go through the typed mutation API.
///
/// # Example
///
/// ```
/// use metrika::storage::MetricStore;
///
/// let store = MetricStore::new();
/// store.add_counter("PollCount", 1);
/// store.add_counter("PollCount", 2);
/// store.set_gauge("Alloc", 1024.0);
///
/// assert_eq!(store.counter("PollCount"), Some(3));
/// assert_eq!(store.gauge("Alloc"), Some(1024.0));
/// assert_eq!(store.gauge("PollCount"), None);
/// ```
#[derive(Debug, Default)]
pub struct MetricStore {
    inner: RwLock<Metrics>,
}

impl MetricStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    // A panic inside a critical section cannot leave a half-applied update,
    // so a poisoned lock still guards consistent data.
    fn read(&self) -> RwLockReadGuard<'_, Metrics> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Metrics> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Replace the gauge value (last write wins).
    pub fn set_gauge(&self, name: &str, value: f64) {
        self.write().gauges.insert(name.to_string(), value);
    }

    /// Add `delta` to the counter total, starting from zero if absent.
    ///
    /// Returns the new total. The whole read-modify-write runs under the
    /// write lock, so concurrent calls never lose an increment. Totals
    /// saturate at the `i64` bounds.
    pub fn add_counter(&self, name: &str, delta: i64) -> i64 {
        let mut metrics = self.write();
        let total = metrics.counters.entry(name.to_string()).or_insert(0);
        *total = total.saturating_add(delta);
        *total
    }

    /// Apply a validated update and return the resulting record.
    pub fn apply(&self, update: &MetricUpdate) -> DurableRecord {
        self.write().apply(update)
    }

    /// Apply several updates under a single write lock.
    ///
    /// Readers observe either none or all of the batch.
    pub fn apply_batch(&self, updates: &[MetricUpdate]) {
        let mut metrics = self.write();
        for update in updates {
            metrics.apply(update);
        }
    }

    /// Current gauge value, `None` if the gauge is unknown.
    pub fn gauge(&self, name: &str) -> Option<f64> {
        self.read().gauges.get(name).copied()
    }

    /// Current counter total, `None` if the counter is unknown.
    pub fn counter(&self, name: &str) -> Option<i64> {
        self.read().counters.get(name).copied()
    }

    /// Current value of a metric as a record.
    pub fn get(&self, kind: MetricKind, name: &str) -> Option<DurableRecord> {
        match kind {
            MetricKind::Gauge => self.gauge(name).map(|v| DurableRecord::gauge(name, v)),
            MetricKind::Counter => self.counter(name).map(|d| DurableRecord::counter(name, d)),
        }
    }

    /// Copy of every metric at a single instant.
    ///
    /// The read lock spans the whole enumeration. Records are ordered by name,
    /// then kind.
    pub fn snapshot(&self) -> Vec<DurableRecord> {
        let mut records = {
            let metrics = self.read();
            let mut records = Vec::with_capacity(metrics.gauges.len() + metrics.counters.len());
            records.extend(
                metrics
                    .gauges
                    .iter()
                    .map(|(name, value)| DurableRecord::gauge(name.as_str(), *value)),
            );
            records.extend(
                metrics
                    .counters
                    .iter()
                    .map(|(name, total)| DurableRecord::counter(name.as_str(), *total)),
            );
            records
        };

        records.sort_by(|a, b| a.id.cmp(&b.id).then(a.kind.cmp(&b.kind)));
        records
    }

    /// Bulk-load initial state, typically once at startup.
    ///
    /// Gauges load their `value`; counters load their `delta` as the starting
    /// total (it is not added to an existing total). Records missing the field
    /// for their kind are skipped. Returns the number of records loaded.
    pub fn restore(&self, records: impl IntoIterator<Item = DurableRecord>) -> usize {
        let mut metrics = self.write();
        let mut loaded = 0;

        for record in records {
            match (record.kind, record.value, record.delta) {
                (MetricKind::Gauge, Some(value), _) => {
                    metrics.gauges.insert(record.id, value);
                }
                (MetricKind::Counter, _, Some(total)) => {
                    metrics.counters.insert(record.id, total);
                }
                _ => {
                    tracing::warn!(id = %record.id, kind = %record.kind, "Skipping incomplete record on restore");
                    continue;
                }
            }
            loaded += 1;
        }

        loaded
    }

    /// Number of metrics across both namespaces.
    pub fn len(&self) -> usize {
        let metrics = self.read();
        metrics.gauges.len() + metrics.counters.len()
    }

    /// Whether the store holds no metrics.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_gauge_last_write_wins() {
        let store = MetricStore::new();
        store.set_gauge("Alloc", 1024.0);
        store.set_gauge("Alloc", 2048.0);
        assert_eq!(store.gauge("Alloc"), Some(2048.0));
    }

    #[test]
    fn test_unknown_metrics() {
        let store = MetricStore::new();
        assert_eq!(store.gauge("missing"), None);
        assert_eq!(store.counter("missing"), None);
        assert!(store.get(MetricKind::Counter, "missing").is_none());
        assert!(store.is_empty());
    }

    #[test]
    fn test_namespaces_are_independent() {
        let store = MetricStore::new();
        store.set_gauge("shared", 1.5);
        store.add_counter("shared", 4);

        assert_eq!(store.gauge("shared"), Some(1.5));
        assert_eq!(store.counter("shared"), Some(4));
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn test_apply_returns_resulting_state() {
        let store = MetricStore::new();
        let update = MetricUpdate::Counter {
            name: "hits".to_string(),
            delta: 5,
        };
        store.apply(&update);
        assert_eq!(store.apply(&update), DurableRecord::counter("hits", 10));
    }

    #[test]
    fn test_concurrent_add_counter_loses_nothing() {
        let store = Arc::new(MetricStore::new());
        let threads = 8;
        let per_thread = 1_000;

        std::thread::scope(|s| {
            for t in 0..threads {
                let store = Arc::clone(&store);
                s.spawn(move || {
                    for _ in 0..per_thread {
                        store.add_counter("PollCount", t + 1);
                    }
                });
            }
        });

        let expected: i64 = (1..=threads).map(|d| d * per_thread).sum();
        assert_eq!(store.counter("PollCount"), Some(expected));
    }

    #[test]
    fn test_apply_batch_is_atomic_for_readers() {
        let store = Arc::new(MetricStore::new());
        let batch: Vec<MetricUpdate> = (0..100)
            .map(|i| MetricUpdate::Counter {
                name: format!("c{i}"),
                delta: 1,
            })
            .collect();

        std::thread::scope(|s| {
            let writer = Arc::clone(&store);
            s.spawn(move || {
                for _ in 0..50 {
                    writer.apply_batch(&batch);
                }
            });

            let reader = Arc::clone(&store);
            s.spawn(move || {
                for _ in 0..200 {
                    let snapshot = reader.snapshot();
                    let totals: Vec<i64> = snapshot.iter().filter_map(|r| r.delta).collect();
                    if let Some(first) = totals.first() {
                        assert_eq!(totals.len(), 100);
                        assert!(totals.iter().all(|t| t == first));
                    }
                }
            });
        });
    }

    #[test]
    fn test_poll_count_and_alloc_scenario() {
        let store = MetricStore::new();
        for _ in 0..3 {
            store.add_counter("PollCount", 1);
        }
        store.set_gauge("Alloc", 1024.0);
        store.set_gauge("Alloc", 2048.0);

        assert_eq!(store.counter("PollCount"), Some(3));
        assert_eq!(store.gauge("Alloc"), Some(2048.0));
        assert_eq!(
            store.snapshot(),
            vec![
                DurableRecord::gauge("Alloc", 2048.0),
                DurableRecord::counter("PollCount", 3),
            ]
        );
    }

    #[test]
    fn test_restore_from_snapshot_reproduces_state() {
        let source = MetricStore::new();
        source.set_gauge("Alloc", 2048.0);
        source.set_gauge("HeapSys", 0.25);
        source.add_counter("PollCount", 42);
        source.add_counter("Alloc", -3);

        let restored = MetricStore::new();
        assert_eq!(restored.restore(source.snapshot()), 4);

        assert_eq!(restored.snapshot(), source.snapshot());
        assert_eq!(restored.counter("PollCount"), Some(42));
        assert_eq!(restored.counter("Alloc"), Some(-3));
    }

    #[test]
    fn test_restore_loads_totals_without_adding() {
        let store = MetricStore::new();
        store.add_counter("PollCount", 10);
        store.restore(vec![DurableRecord::counter("PollCount", 3)]);
        assert_eq!(store.counter("PollCount"), Some(3));
    }

    #[test]
    fn test_restore_skips_incomplete_records() {
        let store = MetricStore::new();
        let incomplete = DurableRecord {
            id: "Alloc".to_string(),
            kind: MetricKind::Gauge,
            delta: Some(1),
            value: None,
        };
        assert_eq!(store.restore(vec![incomplete]), 0);
        assert!(store.is_empty());
    }
}
