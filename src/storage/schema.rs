//! Database schema and statements.

use crate::storage::StorageError;
use crate::storage::db::SqlitePool;

/// SQL statement for creating the metrics table.
///
/// Keyed by `(id, mtype)` so gauges and counters with the same name are
/// separate rows. `value` is set for gauges, `delta` for counters.
pub const METRICS_TABLE_DDL: &str = r#"
CREATE TABLE IF NOT EXISTS metrics (
    id    TEXT NOT NULL CHECK (length(id) > 0),
    mtype TEXT NOT NULL CHECK (mtype IN ('gauge', 'counter')),
    value DOUBLE PRECISION,
    delta BIGINT,
    PRIMARY KEY (id, mtype)
);
"#;

/// Create or replace a gauge value.
pub const UPSERT_GAUGE_SQL: &str = r#"
INSERT INTO metrics (id, mtype, value) VALUES (?1, 'gauge', ?2)
ON CONFLICT (id, mtype) DO UPDATE SET value = excluded.value
"#;

/// Create a counter or add the delta to the stored total in one statement.
///
/// The sum saturates at the `i64` bounds like the in-memory store. A plain
/// overflowing `+` would turn the column into REAL.
pub const ACCUMULATE_COUNTER_SQL: &str = r#"
INSERT INTO metrics (id, mtype, delta) VALUES (?1, 'counter', ?2)
ON CONFLICT (id, mtype) DO UPDATE SET delta = CASE
    WHEN excluded.delta > 0
        AND COALESCE(metrics.delta, 0) > 9223372036854775807 - excluded.delta
        THEN 9223372036854775807
    WHEN excluded.delta < 0
        AND COALESCE(metrics.delta, 0) < (-9223372036854775807 - 1) - excluded.delta
        THEN (-9223372036854775807 - 1)
    ELSE COALESCE(metrics.delta, 0) + excluded.delta
END
"#;

/// Create a counter or overwrite its total (snapshot flush).
pub const REPLACE_COUNTER_SQL: &str = r#"
INSERT INTO metrics (id, mtype, delta) VALUES (?1, 'counter', ?2)
ON CONFLICT (id, mtype) DO UPDATE SET delta = excluded.delta
"#;

/// Read every stored record.
pub const SELECT_ALL_SQL: &str = "SELECT id, mtype, value, delta FROM metrics ORDER BY id, mtype";

/// Initialize the database schema.
///
/// Creates the metrics table if it doesn't exist.
pub async fn init_schema(pool: &SqlitePool) -> Result<(), StorageError> {
    sqlx::query(METRICS_TABLE_DDL).execute(pool.inner()).await?;

    tracing::info!("Database schema initialized");
    Ok(())
}
