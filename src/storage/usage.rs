//! Append-only usage log backed by SQLite.

use std::path::Path;

use sqlx::SqlitePool;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use tracing::{debug, info};

/// Errors from the usage log.
#[derive(Debug, thiserror::Error)]
pub enum UsageError {
    #[error("Usage database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Records one row per generated session.
#[derive(Debug, Clone)]
pub struct UsageLog {
    pool: SqlitePool,
}

impl UsageLog {
    /// Opens (or creates) the database file and ensures the table exists.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, UsageError> {
        let path = path.as_ref();
        info!("Opening usage database: {}", path.display());

        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(options)
            .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS usage (
                id INTEGER PRIMARY KEY,
                user_id INTEGER NOT NULL,
                timestamp INTEGER NOT NULL
            )",
        )
        .execute(&pool)
        .await?;

        Ok(Self { pool })
    }

    /// Appends a usage event.
    pub async fn record(&self, user_id: i64, timestamp: i64) -> Result<(), UsageError> {
        sqlx::query("INSERT INTO usage (user_id, timestamp) VALUES (?, ?)")
            .bind(user_id)
            .bind(timestamp)
            .execute(&self.pool)
            .await?;
        debug!("Recorded usage event for user {}", user_id);
        Ok(())
    }

    /// Number of distinct users with at least one event.
    pub async fn count_distinct_users(&self) -> Result<i64, UsageError> {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(DISTINCT user_id) FROM usage")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    /// Total number of events.
    pub async fn count_total(&self) -> Result<i64, UsageError> {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM usage")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    /// Closes the pool, flushing pending writes.
    pub async fn close(&self) {
        self.pool.close().await;
    }
}
