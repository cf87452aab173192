//! Persistence layer: SQLite via sqlx.
//!
//! The in-memory job store is authoritative while the process runs; this
//! database is what survives a restart.

pub mod models;
pub mod repositories;

pub use repositories::{JobRepository, SqlxJobRepository};

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::{Pool, Sqlite};
use std::str::FromStr;
use std::time::Duration;

/// Database connection pool type alias.
pub type DbPool = Pool<Sqlite>;

const DEFAULT_POOL_SIZE: u32 = 5;

const DEFAULT_BUSY_TIMEOUT_MS: u64 = 30_000;

/// Initialize the connection pool with WAL journaling.
///
/// # Arguments
/// * `database_url` - SQLite database URL (e.g., "sqlite:data/demix.db?mode=rwc")
pub async fn init_pool(database_url: &str) -> Result<DbPool, sqlx::Error> {
    let connect_options = SqliteConnectOptions::from_str(database_url)?
        .journal_mode(SqliteJournalMode::Wal)
        .synchronous(SqliteSynchronous::Normal)
        .busy_timeout(Duration::from_millis(DEFAULT_BUSY_TIMEOUT_MS))
        .create_if_missing(true);

    let pool = SqlitePoolOptions::new()
        .max_connections(DEFAULT_POOL_SIZE)
        .acquire_timeout(Duration::from_secs(30))
        .connect_with(connect_options)
        .await?;

    tracing::info!(
        "Database pool initialized with WAL mode, {} max connections",
        DEFAULT_POOL_SIZE
    );

    Ok(pool)
}

pub async fn run_migrations(pool: &DbPool) -> crate::Result<()> {
    tracing::info!("Running database migrations...");
    sqlx::migrate!("./migrations").run(pool).await?;
    tracing::info!("Database migrations completed");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_init_pool_creates_file_database() {
        let dir = tempfile::tempdir().unwrap();
        let url = format!("sqlite:{}", dir.path().join("demix.db").display());
        let pool = init_pool(&url).await.unwrap();
        run_migrations(&pool).await.unwrap();

        let result: (String,) = sqlx::query_as("PRAGMA journal_mode")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(result.0, "wal");

        let tables: Vec<(String,)> =
            sqlx::query_as("SELECT name FROM sqlite_master WHERE type = 'table' AND name LIKE 'job%'")
                .fetch_all(&pool)
                .await
                .unwrap();
        assert_eq!(tables.len(), 2);
    }
}
