//! File snapshot backend.
//!
//! The whole record set lives in one JSON file that is truncated and rewritten
//! on every write. There is no append log: a crash in the middle of a rewrite
//! can leave a corrupt file, which is reported on the next restore.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

use crate::storage::persistence::checked;
use crate::storage::{
    DurableRecord, MetricKind, MetricUpdate, Persistence, SnapshotCodec, StorageError,
};

type RecordKey = (String, MetricKind);

/// Snapshot-file persistence backend.
///
/// Keeps a mirror of the file contents. Writes are applied to a copy of the
/// mirror, the file is rewritten, and only then is the mirror replaced, so a
/// failed write leaves file and mirror untouched. The mutex also keeps at
/// most one rewrite in flight.
pub struct FileBackend {
    path: PathBuf,
    mirror: Mutex<BTreeMap<RecordKey, DurableRecord>>,
}

impl std::fmt::Debug for FileBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileBackend")
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

impl FileBackend {
    /// Open (creating if missing) the snapshot file at `path`.
    ///
    /// # Errors
    /// Returns `StorageError::Io` if the file or its parent directory cannot
    /// be created or opened. Undecodable content is not an error here: it is
    /// logged and the mirror starts empty.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, StorageError> {
        let path = path.as_ref().to_path_buf();

        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
            && !parent.exists()
        {
            tokio::fs::create_dir_all(parent).await?;
        }

        tokio::fs::OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)
            .await?;

        let records = match SnapshotCodec::decode(&tokio::fs::read(&path).await?) {
            Ok(records) => records,
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "Snapshot file is not decodable");
                Vec::new()
            }
        };

        let mirror = records
            .into_iter()
            .map(|r| ((r.id.clone(), r.kind), r))
            .collect();

        tracing::info!(path = %path.display(), "Snapshot file opened");
        Ok(Self {
            path,
            mirror: Mutex::new(mirror),
        })
    }

    /// Path of the snapshot file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn apply_updates(&self, updates: &[MetricUpdate]) -> Result<(), StorageError> {
        let mut mirror = self.mirror.lock().await;
        let mut next = mirror.clone();

        for update in updates {
            match update {
                MetricUpdate::Gauge { name, value } => {
                    next.insert(
                        (name.clone(), MetricKind::Gauge),
                        DurableRecord::gauge(name.as_str(), *value),
                    );
                }
                MetricUpdate::Counter { name, delta } => {
                    let record = next
                        .entry((name.clone(), MetricKind::Counter))
                        .or_insert_with(|| DurableRecord::counter(name.as_str(), 0));
                    record.delta = Some(record.delta.unwrap_or(0).saturating_add(*delta));
                }
            }
        }

        self.write_file(next.values()).await?;
        *mirror = next;
        Ok(())
    }

    async fn write_file<'a>(
        &self,
        records: impl Iterator<Item = &'a DurableRecord>,
    ) -> Result<(), StorageError> {
        let records: Vec<DurableRecord> = records.cloned().collect();
        let bytes = SnapshotCodec::encode(&records)?;

        let mut file = tokio::fs::OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&self.path)
            .await?;
        file.write_all(&bytes).await?;
        file.flush().await?;
        file.sync_all().await?;

        tracing::debug!(path = %self.path.display(), count = records.len(), "Snapshot written");
        Ok(())
    }
}

#[async_trait]
impl Persistence for FileBackend {
    fn name(&self) -> &'static str {
        "file"
    }

    async fn upsert_gauge(&self, name: &str, value: f64) -> Result<(), StorageError> {
        self.apply_updates(&[MetricUpdate::Gauge {
            name: name.to_string(),
            value,
        }])
        .await
    }

    async fn upsert_counter(&self, name: &str, delta: i64) -> Result<(), StorageError> {
        self.apply_updates(&[MetricUpdate::Counter {
            name: name.to_string(),
            delta,
        }])
        .await
    }

    async fn commit_batch(&self, records: &[DurableRecord]) -> Result<(), StorageError> {
        let updates = records.iter().map(checked).collect::<Result<Vec<_>, _>>()?;
        self.apply_updates(&updates).await
    }

    async fn store_snapshot(&self, records: &[DurableRecord]) -> Result<(), StorageError> {
        for record in records {
            checked(record)?;
        }

        let mut mirror = self.mirror.lock().await;
        let next: BTreeMap<_, _> = records
            .iter()
            .map(|r| ((r.id.clone(), r.kind), r.clone()))
            .collect();

        self.write_file(next.values()).await?;
        *mirror = next;
        Ok(())
    }

    async fn load_all(&self) -> Result<Vec<DurableRecord>, StorageError> {
        let bytes = match tokio::fs::read(&self.path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        Ok(SnapshotCodec::decode(&bytes)?)
    }

    async fn ping(&self) -> Result<(), StorageError> {
        tokio::fs::metadata(&self.path).await?;
        Ok(())
    }
}
