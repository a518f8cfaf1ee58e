//! Optional SQLite log of every download attempt.
//!
//! The JSON metadata document only keeps the latest outcome per identifier;
//! this log keeps all of them, which makes it possible to see how often a
//! publisher fails or when a challenge first appeared.
//!
//! # Example
//!
//! ```no_run
//! use pdf_fetcher::Database;
//! use std::path::Path;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let db = Database::new(Path::new("attempts.db")).await?;
//! for (status, count) in db.status_counts().await? {
//!     println!("{status}: {count}");
//! }
//! # Ok(())
//! # }
//! ```

use std::path::Path;

use sqlx::FromRow;
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions};
use thiserror::Error;
use tracing::instrument;

use crate::fetcher::{DownloadResult, DownloadStatus};

/// Kept low for SQLite since it uses file-level locking.
const DEFAULT_MAX_CONNECTIONS: u32 = 5;

/// Connections wait this long before returning `SQLITE_BUSY`.
const BUSY_TIMEOUT_MS: u32 = 5000;

/// Database-related errors.
#[derive(Error, Debug)]
pub enum DbError {
    /// Failed to connect or query.
    #[error("database error: {0}")]
    Connection(#[from] sqlx::Error),

    /// Failed to run migrations.
    #[error("failed to run migrations: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// A stored status string is not a known status.
    #[error("corrupt attempt row: {0}")]
    Corrupt(String),
}

/// One row of `download_attempts`.
#[derive(Debug, Clone, FromRow)]
pub struct AttemptRow {
    pub id: i64,
    pub identifier: String,
    pub status: String,
    pub publisher: Option<String>,
    pub landing_url: Option<String>,
    pub pdf_url: Option<String>,
    pub error_reason: Option<String>,
    pub attempted_at: String,
}

impl AttemptRow {
    /// Parsed status.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::Corrupt`] for unknown status strings.
    pub fn status(&self) -> Result<DownloadStatus, DbError> {
        self.status.parse().map_err(DbError::Corrupt)
    }
}

/// Attempt history backed by a SQLite pool.
#[derive(Debug, Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Opens (creating if needed) the database at `db_path` in WAL mode and
    /// runs pending migrations.
    ///
    /// # Errors
    ///
    /// Returns `DbError::Connection` if the connection fails,
    /// or `DbError::Migration` if migrations fail.
    #[instrument(skip(db_path), fields(path = %db_path.display()))]
    pub async fn new(db_path: &Path) -> Result<Self, DbError> {
        let db_url = format!("sqlite:{}?mode=rwc", db_path.display());

        let pool = SqlitePoolOptions::new()
            .max_connections(DEFAULT_MAX_CONNECTIONS)
            .connect(&db_url)
            .await?;

        sqlx::query("PRAGMA journal_mode=WAL")
            .execute(&pool)
            .await?;
        sqlx::query(&format!("PRAGMA busy_timeout={BUSY_TIMEOUT_MS}"))
            .execute(&pool)
            .await?;

        sqlx::migrate!("./migrations").run(&pool).await?;

        Ok(Self { pool })
    }

    /// Creates an in-memory database for testing.
    ///
    /// # Errors
    ///
    /// Same as [`Database::new`].
    #[instrument]
    pub async fn new_in_memory() -> Result<Self, DbError> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await?;

        sqlx::migrate!("./migrations").run(&pool).await?;

        Ok(Self { pool })
    }

    #[must_use]
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Appends one attempt.
    ///
    /// # Errors
    ///
    /// Returns `DbError::Connection` if the insert fails.
    #[instrument(skip(self, result), fields(identifier = %result.identifier, status = %result.status))]
    pub async fn record_attempt(&self, result: &DownloadResult) -> Result<i64, DbError> {
        let id = sqlx::query(
            "INSERT INTO download_attempts
                (identifier, status, publisher, landing_url, pdf_url, error_reason, attempted_at)
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&result.identifier)
        .bind(result.status.as_str())
        .bind(&result.publisher)
        .bind(&result.landing_url)
        .bind(&result.pdf_url)
        .bind(&result.error_reason)
        .bind(result.last_attempted.to_rfc3339())
        .execute(&self.pool)
        .await?
        .last_insert_rowid();
        Ok(id)
    }

    /// All attempts for `identifier`, oldest first.
    ///
    /// # Errors
    ///
    /// Returns `DbError::Connection` if the query fails.
    #[instrument(skip(self))]
    pub async fn attempts_for(&self, identifier: &str) -> Result<Vec<AttemptRow>, DbError> {
        let rows = sqlx::query_as::<_, AttemptRow>(
            "SELECT id, identifier, status, publisher, landing_url, pdf_url, error_reason, attempted_at
             FROM download_attempts WHERE identifier = ? ORDER BY id",
        )
        .bind(identifier)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    /// Number of attempts per status, most frequent first.
    ///
    /// # Errors
    ///
    /// Returns `DbError::Connection` if the query fails, or `DbError::Corrupt`
    /// for an unknown status string.
    #[instrument(skip(self))]
    pub async fn status_counts(&self) -> Result<Vec<(DownloadStatus, i64)>, DbError> {
        let rows: Vec<(String, i64)> = sqlx::query_as(
            "SELECT status, COUNT(*) FROM download_attempts GROUP BY status ORDER BY COUNT(*) DESC, status",
        )
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter()
            .map(|(status, count)| Ok((status.parse().map_err(DbError::Corrupt)?, count)))
            .collect()
    }

    /// Gracefully closes all connections in the pool.
    #[instrument(skip(self))]
    pub async fn close(self) {
        self.pool.close().await;
    }
}
