//! Storage backend selection and the SQLite connection pool.

use std::str::FromStr;
use std::sync::Arc;

use anyhow::{Context, Result};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use storewatch_core::store::memory::InMemoryStore;
use storewatch_core::store::Store;
use tracing::info;

use crate::config::Config;
use crate::migrate;
use crate::sqlite_store::SqliteStore;

/// Open a SQLite pool on `config.db.path` in WAL mode with foreign keys on.
///
/// The database file and its parent directory are created if missing.
///
/// # Arguments
///
/// * `config`: loaded configuration; only `[db]` is read.
///
/// # Errors
///
/// Returns an error if the parent directory cannot be created or the
/// database cannot be opened.
pub async fn connect(config: &Config) -> Result<SqlitePool> {
    let db_path = &config.db.path;

    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }

    let options = SqliteConnectOptions::from_str(&format!("sqlite:{}", db_path.display()))?
        .create_if_missing(true)
        .foreign_keys(true)
        .journal_mode(SqliteJournalMode::Wal);

    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(options)
        .await?;

    Ok(pool)
}

/// Open the backend named by `db.backend`, running migrations for SQLite.
///
/// # Errors
///
/// Fails if the SQLite database cannot be opened or migrated. The memory
/// backend never fails.
pub async fn open_store(config: &Config) -> Result<Arc<dyn Store>> {
    if config.db.is_memory() {
        info!("using in-memory store; nothing will be persisted");
        return Ok(Arc::new(InMemoryStore::new()));
    }

    let pool = connect(config).await?;
    migrate::apply(&pool).await?;
    info!(path = %config.db.path.display(), "opened sqlite store");
    Ok(Arc::new(SqliteStore::new(pool)))
}
