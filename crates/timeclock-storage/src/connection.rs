use crate::error::{StorageError, StorageResult};
use sqlx::ConnectOptions;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use tracing::info;

/// Schema, applied idempotently on startup.
const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS employees (
        subject_id TEXT PRIMARY KEY,
        name       TEXT NOT NULL,
        active     INTEGER NOT NULL DEFAULT 1
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS attendance_records (
        id          INTEGER PRIMARY KEY AUTOINCREMENT,
        subject_id  TEXT NOT NULL,
        device_id   INTEGER NOT NULL,
        timestamp   TEXT NOT NULL,
        kind        TEXT NOT NULL,
        method      TEXT NOT NULL,
        recorded_at TEXT NOT NULL,
        UNIQUE (subject_id, device_id, timestamp)
    )
    "#,
    r#"
    CREATE INDEX IF NOT EXISTS idx_attendance_timestamp
        ON attendance_records (timestamp)
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS devices (
        device_id INTEGER PRIMARY KEY,
        state     TEXT NOT NULL,
        last_seen TEXT
    )
    "#,
];

/// Database connection configuration for SQLite
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    /// Path to the SQLite database file.
    pub database_path: String,

    /// Maximum number of connections in the pool.
    pub max_connections: u32,

    /// Timeout for acquiring a connection from the pool.
    pub acquire_timeout: Duration,

    /// Whether to create the database file if it doesn't exist.
    pub create_if_missing: bool,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            database_path: "timeclock.db".to_string(),
            max_connections: 10,
            acquire_timeout: Duration::from_secs(30),
            create_if_missing: true,
        }
    }
}

impl DatabaseConfig {
    /// Create a configuration with the given path.
    pub fn new(database_path: impl Into<String>) -> Self {
        Self {
            database_path: database_path.into(),
            ..Default::default()
        }
    }
}

/// Database connection pool wrapper
#[derive(Debug, Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Open a pool and apply the schema.
    ///
    /// WAL journaling is enabled for concurrent reader/writer access,
    /// and a busy timeout prevents writer contention from surfacing as
    /// immediate errors.
    pub async fn new(config: DatabaseConfig) -> StorageResult<Self> {
        if let Some(parent) = Path::new(&config.database_path).parent()
            && !parent.as_os_str().is_empty()
            && !parent.exists()
        {
            std::fs::create_dir_all(parent).map_err(|e| {
                StorageError::Configuration(format!("Failed to create database directory: {}", e))
            })?;
        }

        let options = SqliteConnectOptions::from_str(&format!("sqlite://{}", config.database_path))
            .map_err(|e| StorageError::Configuration(format!("Invalid database path: {}", e)))?
            .create_if_missing(config.create_if_missing)
            .foreign_keys(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .synchronous(sqlx::sqlite::SqliteSynchronous::Normal)
            .busy_timeout(Duration::from_secs(10))
            .disable_statement_logging();

        let pool = SqlitePoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(config.acquire_timeout)
            .connect_with(options)
            .await?;

        let db = Self { pool };
        db.migrate().await?;

        info!("Database ready at {}", config.database_path);
        Ok(db)
    }

    /// Create an in-memory database (primarily for testing).
    pub async fn in_memory() -> StorageResult<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")
            .map_err(|e| StorageError::Configuration(e.to_string()))?
            .foreign_keys(true);

        // A single connection: every pool handle must see the same
        // in-memory database.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await?;

        let db = Self { pool };
        db.migrate().await?;
        Ok(db)
    }

    /// Apply the schema. Idempotent.
    pub async fn migrate(&self) -> StorageResult<()> {
        for statement in SCHEMA {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        Ok(())
    }

    /// Access the underlying pool.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Close the pool, waiting for in-flight queries.
    pub async fn close(&self) {
        self.pool.close().await;
    }
}
