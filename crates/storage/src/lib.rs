//! Storage layer: SQLite schema and pool helpers for the tag store.
//!
//! Holds DB pool setup, the migration runner, and the row types read back
//! from the `images`, `tags` and `rounds` tables.

pub mod models;

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::str::FromStr;
use std::time::Duration;
use tracing::debug;

pub async fn connect(database_url: &str) -> Result<SqlitePool, sqlx::Error> {
    let in_memory = database_url.contains("memory");
    let opts = if database_url.starts_with("sqlite:") {
        SqliteConnectOptions::from_str(database_url)?
    } else {
        let path = std::path::PathBuf::from(database_url);
        if let Some(parent) = path.parent() {
            let _ = std::fs::create_dir_all(parent);
        }
        SqliteConnectOptions::new().filename(&path)
    };
    let mut opts = opts
        .create_if_missing(true)
        .foreign_keys(true)
        .busy_timeout(Duration::from_secs(5));
    if !in_memory {
        opts = opts.journal_mode(SqliteJournalMode::Wal);
    }

    // Batch writes come from a single worker; one connection keeps in-memory
    // databases alive and avoids lock contention on files.
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect_with(opts)
        .await?;
    debug!(url = database_url, "opened tag store pool");
    Ok(pool)
}

pub async fn migrate(pool: &SqlitePool) -> Result<(), sqlx::migrate::MigrateError> {
    // Applies SQLx migrations located in crates/storage/migrations.
    // Safe to run multiple times (idempotent).
    sqlx::migrate!("./migrations").run(pool).await
}
