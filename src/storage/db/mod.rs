//! Database abstraction layer.
//!
//! Currently supports SQLite through sqlx. The pool wrapper keeps backend
//! specifics (journal mode, pool sizing) out of the persistence code.
//!
//! # Example
//!
//! ```ignore
//! let pool = SqlitePool::connect("sqlite:data/metrics.db?mode=rwc").await?;
//! let row = sqlx::query("SELECT 1").fetch_one(pool.inner()).await?;
//! ```

mod sqlite;

pub use sqlite::SqlitePool;
