//! Coordination between the in-memory store and the durable backend.
//!
//! [`Repository`] is what request handlers talk to. It mutates the
//! [`MetricStore`] first and then, depending on the [`FlushMode`], either
//! writes the change through to the backend or leaves it to the periodic
//! snapshot task. Backend calls never happen while the store lock is held.
//!
//! Write-through updates the backend could not take are kept as pending
//! deltas and replayed with `commit_batch` on [`Repository::flush`] and at
//! shutdown. Write-through never sends absolute snapshots: the backend total
//! may include increments this process never saw.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

use crate::storage::{
    DurableRecord, MetricKind, MetricStore, MetricUpdate, Persistence, RetryPolicy, StorageError,
};

/// Default deadline for one snapshot flush attempt.
pub const DEFAULT_FLUSH_TIMEOUT: Duration = Duration::from_secs(10);

/// When changes reach the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushMode {
    /// Every update is written to the backend right after the in-memory change.
    WriteThrough,
    /// A background task writes a full snapshot at this interval.
    Periodic(Duration),
}

/// Writes full snapshots of the store to the backend.
#[derive(Clone)]
struct Flusher {
    store: Arc<MetricStore>,
    backend: Arc<dyn Persistence>,
    retry: RetryPolicy,
    timeout: Duration,
}

impl Flusher {
    async fn flush_once(&self) -> Result<(), StorageError> {
        let records = self.store.snapshot();
        tokio::time::timeout(self.timeout, self.backend.store_snapshot(&records))
            .await
            .map_err(|_| StorageError::Timeout(self.timeout))??;

        tracing::debug!(
            backend = self.backend.name(),
            count = records.len(),
            "Snapshot flushed"
        );
        Ok(())
    }

    async fn flush_with_retry(&self, label: &str) -> Result<(), StorageError> {
        self.retry.run(label, || self.flush_once()).await
    }
}

/// Handle to the background snapshot task.
struct FlushTask {
    shutdown: watch::Sender<bool>,
    handle: Option<JoinHandle<()>>,
}

impl FlushTask {
    fn spawn(flusher: Flusher, interval: Duration) -> Self {
        let (shutdown, mut shutdown_rx) = watch::channel(false);

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            tracing::info!(interval = ?interval, "Periodic flush started");
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if let Err(e) = flusher.flush_with_retry("periodic_flush").await {
                            tracing::error!(error = %e, "Periodic flush failed, retrying next tick");
                        }
                    }
                    _ = shutdown_rx.changed() => break,
                }
            }
            tracing::info!("Periodic flush stopped");
        });

        Self {
            shutdown,
            handle: Some(handle),
        }
    }

    async fn stop(mut self) {
        let _ = self.shutdown.send(true);
        if let Some(handle) = self.handle.take()
            && let Err(e) = handle.await
        {
            tracing::error!(error = %e, "Flush task terminated abnormally");
        }
    }
}

impl Drop for FlushTask {
    fn drop(&mut self) {
        let _ = self.shutdown.send(true);
    }
}

/// Metric store plus its (optional) durable backend.
///
/// Without a backend the repository is purely in-memory and
/// [`ping`](Self::ping) reports `NotConfigured`.
pub struct Repository {
    store: Arc<MetricStore>,
    backend: Option<Arc<dyn Persistence>>,
    retry: RetryPolicy,
    mode: FlushMode,
    flush_timeout: Duration,
    flush_task: Mutex<Option<FlushTask>>,
    pending: Mutex<Vec<MetricUpdate>>,
}

impl std::fmt::Debug for Repository {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Repository")
            .field("backend", &self.backend_name())
            .field("mode", &self.mode)
            .field("flush_timeout", &self.flush_timeout)
            .finish_non_exhaustive()
    }
}

impl Repository {
    /// Create a write-through repository with the default retry policy.
    pub fn new(store: Arc<MetricStore>, backend: Option<Arc<dyn Persistence>>) -> Self {
        Self {
            store,
            backend,
            retry: RetryPolicy::default(),
            mode: FlushMode::WriteThrough,
            flush_timeout: DEFAULT_FLUSH_TIMEOUT,
            flush_task: Mutex::new(None),
            pending: Mutex::new(Vec::new()),
        }
    }

    /// Set the flush mode.
    pub fn with_mode(mut self, mode: FlushMode) -> Self {
        self.mode = mode;
        self
    }

    /// Set the retry policy used for every backend write.
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Set the deadline for a single snapshot flush attempt.
    pub fn with_flush_timeout(mut self, timeout: Duration) -> Self {
        self.flush_timeout = timeout;
        self
    }

    /// The in-memory store.
    pub fn store(&self) -> &Arc<MetricStore> {
        &self.store
    }

    /// The configured flush mode.
    pub fn mode(&self) -> FlushMode {
        self.mode
    }

    /// Name of the configured backend, if any.
    pub fn backend_name(&self) -> Option<&'static str> {
        self.backend.as_ref().map(|b| b.name())
    }

    /// Number of write-through updates waiting to be replayed.
    pub fn pending_len(&self) -> usize {
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    fn flusher(&self) -> Option<Flusher> {
        self.backend.as_ref().map(|backend| Flusher {
            store: Arc::clone(&self.store),
            backend: Arc::clone(backend),
            retry: self.retry.clone(),
            timeout: self.flush_timeout,
        })
    }

    fn write_through_backend(&self) -> Option<&Arc<dyn Persistence>> {
        match self.mode {
            FlushMode::WriteThrough => self.backend.as_ref(),
            FlushMode::Periodic(_) => None,
        }
    }

    /// Start the periodic snapshot task.
    ///
    /// Does nothing in write-through mode, without a backend, or when the
    /// task is already running. Must be called inside a Tokio runtime.
    pub fn start(&self) {
        let FlushMode::Periodic(interval) = self.mode else {
            return;
        };
        let Some(flusher) = self.flusher() else {
            return;
        };

        let mut task = self
            .flush_task
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if task.is_none() {
            *task = Some(FlushTask::spawn(flusher, interval));
        }
    }

    /// Load every backend record into the store.
    ///
    /// Returns the number of records loaded (zero without a backend).
    pub async fn restore(&self) -> Result<usize, StorageError> {
        let Some(backend) = &self.backend else {
            return Ok(0);
        };

        let records = backend.load_all().await?;
        let loaded = self.store.restore(records);
        tracing::info!(backend = backend.name(), count = loaded, "Metrics restored");
        Ok(loaded)
    }

    /// Apply one validated update and return the resulting record.
    ///
    /// In write-through mode the backend write runs after the store lock is
    /// released. A backend failure, once retries are exhausted, is logged,
    /// does not undo the in-memory change, and leaves the update pending.
    pub async fn apply(&self, update: MetricUpdate) -> DurableRecord {
        let record = self.store.apply(&update);

        if let Some(backend) = self.write_through_backend() {
            let result = match &update {
                MetricUpdate::Gauge { name, value } => {
                    self.retry
                        .run("upsert_gauge", || backend.upsert_gauge(name, *value))
                        .await
                }
                MetricUpdate::Counter { name, delta } => {
                    self.retry
                        .run("upsert_counter", || backend.upsert_counter(name, *delta))
                        .await
                }
            };

            if let Err(e) = result {
                tracing::error!(
                    backend = backend.name(),
                    metric = update.name(),
                    kind = %update.kind(),
                    error = %e,
                    "Failed to persist update, keeping it pending"
                );
                self.push_pending(std::slice::from_ref(&update));
            }
        }

        record
    }

    /// Apply a batch of validated updates.
    ///
    /// The store applies the batch under one lock. In write-through mode the
    /// batch is then committed to the backend as a single all-or-nothing
    /// unit; if that fails after retries the error is returned. The
    /// in-memory batch stays applied either way and a failed batch is kept
    /// pending.
    pub async fn apply_batch(&self, updates: &[MetricUpdate]) -> Result<(), StorageError> {
        self.store.apply_batch(updates);

        if let Some(backend) = self.write_through_backend() {
            let records: Vec<DurableRecord> =
                updates.iter().cloned().map(DurableRecord::from).collect();
            if let Err(e) = self
                .retry
                .run("commit_batch", || backend.commit_batch(&records))
                .await
            {
                self.push_pending(updates);
                return Err(e);
            }
            tracing::debug!(
                backend = backend.name(),
                count = records.len(),
                "Batch committed"
            );
        }

        Ok(())
    }

    /// Bring the backend up to date once, bounded by the flush timeout.
    ///
    /// Periodic mode writes a full snapshot. Write-through mode replays the
    /// pending updates as one batch.
    pub async fn flush(&self) -> Result<(), StorageError> {
        match self.mode {
            FlushMode::Periodic(_) => match self.flusher() {
                Some(flusher) => flusher.flush_once().await,
                None => Ok(()),
            },
            FlushMode::WriteThrough => self.replay_pending(None).await,
        }
    }

    fn push_pending(&self, updates: &[MetricUpdate]) {
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .extend_from_slice(updates);
    }

    /// Collapse pending updates into one record per key.
    ///
    /// Counter deltas are summed. Gauges carry the store's current value,
    /// since a newer write may have reached the backend after the failed one.
    fn replay_records(&self, updates: &[MetricUpdate]) -> Vec<DurableRecord> {
        let mut records: BTreeMap<(String, MetricKind), DurableRecord> = BTreeMap::new();
        for update in updates {
            match update {
                MetricUpdate::Gauge { name, value } => {
                    let current = self.store.gauge(name).unwrap_or(*value);
                    records.insert(
                        (name.clone(), MetricKind::Gauge),
                        DurableRecord::gauge(name.as_str(), current),
                    );
                }
                MetricUpdate::Counter { name, delta } => {
                    let record = records
                        .entry((name.clone(), MetricKind::Counter))
                        .or_insert_with(|| DurableRecord::counter(name.as_str(), 0));
                    record.delta = Some(record.delta.unwrap_or(0).saturating_add(*delta));
                }
            }
        }
        records.into_values().collect()
    }

    async fn commit_pending(
        &self,
        backend: &Arc<dyn Persistence>,
        records: &[DurableRecord],
    ) -> Result<(), StorageError> {
        tokio::time::timeout(self.flush_timeout, backend.commit_batch(records))
            .await
            .map_err(|_| StorageError::Timeout(self.flush_timeout))?
    }

    /// Replay pending write-through updates, once or through `retry`.
    ///
    /// On failure the updates go back to the front of the queue.
    async fn replay_pending(&self, retry: Option<&RetryPolicy>) -> Result<(), StorageError> {
        let Some(backend) = self.write_through_backend() else {
            return Ok(());
        };
        let updates = std::mem::take(
            &mut *self
                .pending
                .lock()
                .unwrap_or_else(PoisonError::into_inner),
        );
        if updates.is_empty() {
            return Ok(());
        }

        let records = self.replay_records(&updates);
        let result = match retry {
            Some(retry) => {
                retry
                    .run("replay_pending", || self.commit_pending(backend, &records))
                    .await
            }
            None => self.commit_pending(backend, &records).await,
        };

        match &result {
            Ok(()) => tracing::info!(
                backend = backend.name(),
                count = records.len(),
                "Pending updates replayed"
            ),
            Err(_) => {
                let mut pending = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
                let newer = std::mem::replace(&mut *pending, updates);
                pending.extend(newer);
            }
        }
        result
    }

    /// Check that the backend is reachable.
    pub async fn ping(&self) -> Result<(), StorageError> {
        match &self.backend {
            Some(backend) => backend.ping().await,
            None => Err(StorageError::NotConfigured),
        }
    }

    /// Stop the periodic task, run a final flush with retry, and close the
    /// backend.
    ///
    /// The final flush is a full snapshot in periodic mode and a replay of
    /// pending updates in write-through mode. A failure is logged and
    /// returned.
    pub async fn shutdown(&self) -> Result<(), StorageError> {
        let task = self
            .flush_task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(task) = task {
            task.stop().await;
        }

        let Some(flusher) = self.flusher() else {
            return Ok(());
        };

        let result = match self.mode {
            FlushMode::Periodic(_) => flusher.flush_with_retry("final_flush").await,
            FlushMode::WriteThrough => self.replay_pending(Some(&self.retry)).await,
        };
        match &result {
            Ok(()) => tracing::info!(
                backend = flusher.backend.name(),
                mode = ?self.mode,
                count = self.store.len(),
                "Final flush complete"
            ),
            Err(e) => tracing::error!(
                backend = flusher.backend.name(),
                pending = self.pending_len(),
                error = %e,
                "Final flush failed"
            ),
        }

        flusher.backend.close().await;
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Backend that records calls and fails the first `failures` writes.
    #[derive(Default)]
    struct FakeBackend {
        failures: AtomicUsize,
        write_delay: Option<Duration>,
        calls: Mutex<Vec<String>>,
        snapshots: Mutex<Vec<Vec<DurableRecord>>>,
        batches: Mutex<Vec<Vec<DurableRecord>>>,
        closed: AtomicUsize,
    }

    impl FakeBackend {
        fn failing(failures: usize) -> Self {
            Self {
                failures: AtomicUsize::new(failures),
                ..Default::default()
            }
        }

        fn record(&self, call: String) -> Result<(), StorageError> {
            self.calls.lock().unwrap().push(call);
            let remaining = self.failures.load(Ordering::SeqCst);
            if remaining > 0 {
                self.failures.store(remaining - 1, Ordering::SeqCst);
                return Err(StorageError::Internal("backend down".to_string()));
            }
            Ok(())
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Persistence for FakeBackend {
        fn name(&self) -> &'static str {
            "fake"
        }

        async fn upsert_gauge(&self, name: &str, value: f64) -> Result<(), StorageError> {
            self.record(format!("gauge {name}={value}"))
        }

        async fn upsert_counter(&self, name: &str, delta: i64) -> Result<(), StorageError> {
            self.record(format!("counter {name}+={delta}"))
        }

        async fn commit_batch(&self, records: &[DurableRecord]) -> Result<(), StorageError> {
            self.record(format!("batch {}", records.len()))?;
            self.batches.lock().unwrap().push(records.to_vec());
            Ok(())
        }

        async fn store_snapshot(&self, records: &[DurableRecord]) -> Result<(), StorageError> {
            if let Some(delay) = self.write_delay {
                tokio::time::sleep(delay).await;
            }
            self.record(format!("snapshot {}", records.len()))?;
            self.snapshots.lock().unwrap().push(records.to_vec());
            Ok(())
        }

        async fn load_all(&self) -> Result<Vec<DurableRecord>, StorageError> {
            Ok(vec![
                DurableRecord::counter("PollCount", 9),
                DurableRecord::gauge("Alloc", 4.0),
            ])
        }

        async fn ping(&self) -> Result<(), StorageError> {
            Ok(())
        }

        async fn close(&self) {
            self.closed.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn fast_retry() -> RetryPolicy {
        RetryPolicy::new(vec![Duration::from_millis(1), Duration::from_millis(1)])
    }

    fn counter(name: &str, delta: i64) -> MetricUpdate {
        MetricUpdate::Counter {
            name: name.to_string(),
            delta,
        }
    }

    fn repository(backend: &Arc<FakeBackend>, mode: FlushMode) -> Repository {
        let backend: Arc<dyn Persistence> = backend.clone();
        Repository::new(Arc::new(MetricStore::new()), Some(backend))
            .with_mode(mode)
            .with_retry(fast_retry())
    }

    #[tokio::test]
    async fn test_write_through_sends_deltas() {
        let backend = Arc::new(FakeBackend::default());
        let repo = repository(&backend, FlushMode::WriteThrough);

        repo.apply(counter("PollCount", 2)).await;
        let record = repo.apply(counter("PollCount", 3)).await;

        assert_eq!(record, DurableRecord::counter("PollCount", 5));
        assert_eq!(
            backend.calls(),
            vec!["counter PollCount+=2", "counter PollCount+=3"]
        );
    }

    #[tokio::test]
    async fn test_write_through_failure_keeps_memory_state() {
        let backend = Arc::new(FakeBackend::failing(usize::MAX));
        let repo = repository(&backend, FlushMode::WriteThrough);

        let record = repo
            .apply(MetricUpdate::Gauge {
                name: "Alloc".to_string(),
                value: 1.5,
            })
            .await;

        assert_eq!(record, DurableRecord::gauge("Alloc", 1.5));
        assert_eq!(repo.store().gauge("Alloc"), Some(1.5));
        assert_eq!(backend.calls().len(), fast_retry().max_attempts());
    }

    #[tokio::test]
    async fn test_batch_commit_failure_is_returned() {
        let backend = Arc::new(FakeBackend::failing(usize::MAX));
        let repo = repository(&backend, FlushMode::WriteThrough);

        let result = repo
            .apply_batch(&[counter("a", 1), counter("b", 2)])
            .await;

        assert!(matches!(result, Err(StorageError::Internal(_))));
        assert_eq!(backend.calls(), vec!["batch 2"; 3]);
    }

    #[tokio::test]
    async fn test_batch_commit_recovers_after_retry() {
        let backend = Arc::new(FakeBackend::failing(1));
        let repo = repository(&backend, FlushMode::WriteThrough);

        repo.apply_batch(&[counter("a", 1)]).await.unwrap();
        assert_eq!(backend.calls(), vec!["batch 1", "batch 1"]);
    }

    #[tokio::test]
    async fn test_periodic_mode_defers_writes_to_flush() {
        let backend = Arc::new(FakeBackend::default());
        let repo = repository(&backend, FlushMode::Periodic(Duration::from_secs(3600)));

        repo.apply(counter("PollCount", 2)).await;
        repo.apply(counter("PollCount", 3)).await;
        assert!(backend.calls().is_empty());

        repo.flush().await.unwrap();
        assert_eq!(
            backend.snapshots.lock().unwrap().last().unwrap(),
            &vec![DurableRecord::counter("PollCount", 5)]
        );
    }

    #[tokio::test]
    async fn test_flush_times_out() {
        let backend = Arc::new(FakeBackend {
            write_delay: Some(Duration::from_secs(5)),
            ..Default::default()
        });
        let repo = repository(&backend, FlushMode::Periodic(Duration::from_secs(3600)))
            .with_flush_timeout(Duration::from_millis(10));

        let result = repo.flush().await;
        assert!(matches!(result, Err(StorageError::Timeout(_))));
    }

    #[tokio::test]
    async fn test_periodic_task_flushes_and_shutdown_writes_final_snapshot() {
        let backend = Arc::new(FakeBackend::default());
        let repo = repository(&backend, FlushMode::Periodic(Duration::from_millis(20)));
        repo.start();

        repo.apply(counter("PollCount", 1)).await;
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(!backend.snapshots.lock().unwrap().is_empty());

        repo.apply(counter("PollCount", 1)).await;
        repo.shutdown().await.unwrap();

        assert_eq!(
            backend.snapshots.lock().unwrap().last().unwrap(),
            &vec![DurableRecord::counter("PollCount", 2)]
        );
        assert_eq!(backend.closed.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_shutdown_reports_final_flush_failure() {
        let backend = Arc::new(FakeBackend::failing(usize::MAX));
        let repo = repository(&backend, FlushMode::Periodic(Duration::from_secs(3600)));
        repo.start();

        assert!(repo.shutdown().await.is_err());
        assert_eq!(backend.calls().len(), fast_retry().max_attempts());
    }

    #[tokio::test]
    async fn test_write_through_shutdown_sends_no_snapshot() {
        let backend = Arc::new(FakeBackend::default());
        let repo = repository(&backend, FlushMode::WriteThrough);

        repo.apply(counter("PollCount", 1)).await;
        repo.flush().await.unwrap();
        repo.shutdown().await.unwrap();

        assert_eq!(backend.calls(), vec!["counter PollCount+=1"]);
        assert!(backend.snapshots.lock().unwrap().is_empty());
        assert_eq!(backend.closed.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_failed_write_through_is_replayed_as_deltas() {
        let attempts = fast_retry().max_attempts();
        let backend = Arc::new(FakeBackend::failing(attempts * 2));
        let repo = repository(&backend, FlushMode::WriteThrough);

        let gauge = |value| MetricUpdate::Gauge {
            name: "Alloc".to_string(),
            value,
        };
        repo.apply(gauge(1.0)).await;
        repo.apply(counter("PollCount", 4)).await;
        assert_eq!(repo.pending_len(), 2);

        // Reaches the backend directly; the replay must not roll it back.
        repo.apply(gauge(2.0)).await;
        repo.apply(counter("PollCount", 1)).await;

        repo.flush().await.unwrap();
        assert_eq!(repo.pending_len(), 0);
        assert_eq!(
            backend.batches.lock().unwrap().last().unwrap(),
            &vec![
                DurableRecord::gauge("Alloc", 2.0),
                DurableRecord::counter("PollCount", 4),
            ]
        );
        assert!(backend.snapshots.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_failed_batch_is_replayed_on_shutdown() {
        let backend = Arc::new(FakeBackend::failing(fast_retry().max_attempts()));
        let repo = repository(&backend, FlushMode::WriteThrough);

        assert!(repo.apply_batch(&[counter("a", 1), counter("a", 2)]).await.is_err());
        assert_eq!(repo.pending_len(), 2);

        repo.shutdown().await.unwrap();
        assert_eq!(
            backend.batches.lock().unwrap().last().unwrap(),
            &vec![DurableRecord::counter("a", 3)]
        );
        assert_eq!(repo.pending_len(), 0);
    }

    #[tokio::test]
    async fn test_failed_replay_keeps_updates_pending() {
        let backend = Arc::new(FakeBackend::failing(usize::MAX));
        let repo = repository(&backend, FlushMode::WriteThrough);

        repo.apply(counter("a", 1)).await;
        assert!(repo.flush().await.is_err());
        repo.apply(counter("a", 2)).await;
        assert_eq!(repo.pending_len(), 2);

        assert!(repo.shutdown().await.is_err());
        assert_eq!(repo.pending_len(), 2);
    }

    #[tokio::test]
    async fn test_restore_loads_backend_records() {
        let backend = Arc::new(FakeBackend::default());
        let repo = repository(&backend, FlushMode::WriteThrough);

        assert_eq!(repo.restore().await.unwrap(), 2);
        assert_eq!(repo.store().counter("PollCount"), Some(9));
        assert_eq!(
            repo.store().get(MetricKind::Gauge, "Alloc"),
            Some(DurableRecord::gauge("Alloc", 4.0))
        );
    }

    #[tokio::test]
    async fn test_memory_only_repository() {
        let repo = Repository::new(Arc::new(MetricStore::new()), None);

        repo.apply(counter("PollCount", 1)).await;
        repo.apply_batch(&[counter("PollCount", 1)]).await.unwrap();
        repo.flush().await.unwrap();

        assert_eq!(repo.store().counter("PollCount"), Some(2));
        assert!(matches!(repo.ping().await, Err(StorageError::NotConfigured)));
        assert_eq!(repo.backend_name(), None);
        repo.shutdown().await.unwrap();
    }
}
