//! Storage layer: SQLite state database for resumable runs.
//!
//! Holds pool setup, the migration runner, an integrity check, and the row-level
//! queries used by the resume state store.

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::SqlitePool;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

pub mod models;
pub mod runs;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("migration failed: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),
    #[error("integrity check failed: {0}")]
    Integrity(String),
    #[error("could not prepare database directory: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, StorageError>;

/// Opens (creating if needed) the state database.
///
/// Accepts either a `sqlite:` URL or a plain filesystem path. Connections use
/// WAL journaling with `synchronous=FULL`, so a committed transaction is on disk
/// before the commit returns.
pub async fn connect(database_url: &str) -> Result<SqlitePool> {
    let opts = if database_url.starts_with("sqlite:") {
        SqliteConnectOptions::from_str(database_url)?
    } else {
        let path = PathBuf::from(database_url);
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        SqliteConnectOptions::new().filename(path)
    };
    let in_memory = database_url.contains("memory");
    let mut opts = opts
        .create_if_missing(true)
        .synchronous(SqliteSynchronous::Full)
        .busy_timeout(Duration::from_secs(5))
        .foreign_keys(true);
    if !in_memory {
        opts = opts.journal_mode(SqliteJournalMode::Wal);
    }

    let pool_opts = if in_memory {
        SqlitePoolOptions::new().max_connections(1)
    } else {
        SqlitePoolOptions::new().max_connections(4)
    };
    let pool = pool_opts.connect_with(opts).await?;
    debug!(database = database_url, in_memory, "state database connected");
    Ok(pool)
}

/// Applies the bundled migrations and returns how many were new. Already
/// applied versions are skipped.
pub async fn migrate(pool: &SqlitePool) -> Result<usize> {
    let migrator = sqlx::migrate!("./migrations");
    let applied: Vec<i64> =
        sqlx::query_scalar("SELECT version FROM _sqlx_migrations WHERE success = 1")
            .fetch_all(pool)
            .await
            .unwrap_or_default();
    migrator.run(pool).await?;
    let fresh = migrator
        .iter()
        .filter(|m| !applied.contains(&m.version))
        .count();
    if fresh > 0 {
        info!(applied = fresh, "state database migrated");
    } else {
        debug!("state database schema up to date");
    }
    Ok(fresh)
}

/// Runs `PRAGMA quick_check` and fails unless SQLite reports `ok`.
pub async fn quick_check(pool: &SqlitePool) -> Result<()> {
    let rows: Vec<String> = sqlx::query_scalar("PRAGMA quick_check")
        .fetch_all(pool)
        .await?;
    match rows.first().map(String::as_str) {
        Some("ok") => Ok(()),
        Some(other) => {
            warn!(result = other, "state database failed quick_check");
            Err(StorageError::Integrity(other.to_string()))
        }
        None => Err(StorageError::Integrity("no result from quick_check".into())),
    }
}
