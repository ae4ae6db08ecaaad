//! Relational persistence backend.
//!
//! One row per metric in the `metrics` table (see [`schema`](crate::storage::schema)).
//! Counter increments are a single `INSERT .. ON CONFLICT DO UPDATE`, so
//! concurrent upserts for the same name never lose an increment. Batches and
//! snapshots run in one transaction.

use async_trait::async_trait;
use sqlx::{Executor, Sqlite};

use crate::storage::db::SqlitePool;
use crate::storage::persistence::checked;
use crate::storage::schema::{
    ACCUMULATE_COUNTER_SQL, REPLACE_COUNTER_SQL, SELECT_ALL_SQL, UPSERT_GAUGE_SQL, init_schema,
};
use crate::storage::{DurableRecord, MetricKind, MetricUpdate, Persistence, StorageError};

/// How a counter record is written.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CounterWrite {
    /// Add the delta to the stored total.
    Accumulate,
    /// Overwrite the stored total.
    Replace,
}

/// SQLite-backed persistence.
#[derive(Debug, Clone)]
pub struct SqlBackend {
    pool: SqlitePool,
}

impl SqlBackend {
    /// Connect to the database at `url` and make sure the schema exists.
    ///
    /// # Errors
    /// Returns `StorageError::Database` if the database is unreachable or the
    /// schema cannot be created.
    pub async fn connect(url: &str) -> Result<Self, StorageError> {
        let pool = SqlitePool::connect(url).await?;
        init_schema(&pool).await?;

        tracing::info!("Database backend connected");
        Ok(Self { pool })
    }

    /// Underlying connection pool.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    async fn write_all(
        &self,
        records: &[DurableRecord],
        counters: CounterWrite,
    ) -> Result<(), StorageError> {
        let mut tx = self.pool.inner().begin().await?;

        for record in records {
            // An early return drops `tx`, which rolls the transaction back.
            let update = checked(record)?;
            apply_update(&mut *tx, &update, counters).await?;
        }

        tx.commit().await?;
        Ok(())
    }
}

async fn apply_update<'e, E>(
    executor: E,
    update: &MetricUpdate,
    counters: CounterWrite,
) -> Result<(), StorageError>
where
    E: Executor<'e, Database = Sqlite>,
{
    let result = match update {
        MetricUpdate::Gauge { name, value } => {
            sqlx::query(UPSERT_GAUGE_SQL)
                .bind(name.as_str())
                .bind(*value)
                .execute(executor)
                .await?
        }
        MetricUpdate::Counter { name, delta } => {
            let sql = match counters {
                CounterWrite::Accumulate => ACCUMULATE_COUNTER_SQL,
                CounterWrite::Replace => REPLACE_COUNTER_SQL,
            };
            sqlx::query(sql)
                .bind(name.as_str())
                .bind(*delta)
                .execute(executor)
                .await?
        }
    };

    if result.rows_affected() == 0 {
        return Err(StorageError::InvalidData(format!(
            "upsert of {} '{}' affected no rows",
            update.kind(),
            update.name()
        )));
    }
    Ok(())
}

#[async_trait]
impl Persistence for SqlBackend {
    fn name(&self) -> &'static str {
        "sqlite"
    }

    async fn upsert_gauge(&self, name: &str, value: f64) -> Result<(), StorageError> {
        let update = MetricUpdate::Gauge {
            name: name.to_string(),
            value,
        };
        apply_update(self.pool.inner(), &update, CounterWrite::Accumulate).await
    }

    async fn upsert_counter(&self, name: &str, delta: i64) -> Result<(), StorageError> {
        let update = MetricUpdate::Counter {
            name: name.to_string(),
            delta,
        };
        apply_update(self.pool.inner(), &update, CounterWrite::Accumulate).await
    }

    async fn commit_batch(&self, records: &[DurableRecord]) -> Result<(), StorageError> {
        self.write_all(records, CounterWrite::Accumulate).await
    }

    async fn store_snapshot(&self, records: &[DurableRecord]) -> Result<(), StorageError> {
        self.write_all(records, CounterWrite::Replace).await
    }

    async fn load_all(&self) -> Result<Vec<DurableRecord>, StorageError> {
        let rows: Vec<(String, String, Option<f64>, Option<i64>)> =
            sqlx::query_as(SELECT_ALL_SQL)
                .fetch_all(self.pool.inner())
                .await?;

        rows.into_iter()
            .map(|(id, mtype, value, delta)| {
                let kind = MetricKind::parse(&mtype)
                    .map_err(|e| StorageError::InvalidData(e.to_string()))?;
                Ok(DurableRecord {
                    id,
                    kind,
                    delta,
                    value,
                })
            })
            .collect()
    }

    async fn ping(&self) -> Result<(), StorageError> {
        sqlx::query("SELECT 1").execute(self.pool.inner()).await?;
        Ok(())
    }

    async fn close(&self) {
        self.pool.close().await;
    }
}
