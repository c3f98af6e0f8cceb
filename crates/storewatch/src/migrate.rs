//! Idempotent schema migrations. Timestamps are stored as Unix milliseconds.

use anyhow::Result;
use sqlx::SqlitePool;

use crate::config::Config;
use crate::db;

/// Create the schema in the database named by `config.db.path`.
///
/// Opens a short-lived pool, applies every migration, and closes it again.
/// Used by `storewatch init`.
///
/// # Arguments
///
/// * `config`: loaded configuration; only `[db]` is read.
///
/// # Errors
///
/// Returns an error if the database file cannot be created or opened, or
/// if any statement fails.
pub async fn run_migrations(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    apply(&pool).await?;
    pool.close().await;
    Ok(())
}

/// Apply all migrations to an open pool. Safe to run on every startup.
///
/// # Errors
///
/// Returns the first failing statement's error.
pub async fn apply(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS sources (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL,
            url TEXT NOT NULL UNIQUE,
            kind TEXT NOT NULL CHECK (kind IN ('playstore', 'appstore')),
            interval_value INTEGER NOT NULL CHECK (interval_value > 0),
            interval_unit TEXT NOT NULL
                CHECK (interval_unit IN ('seconds', 'minutes', 'hours', 'days')),
            last_checked INTEGER,
            created_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS items (
            source_id INTEGER NOT NULL,
            item_id TEXT NOT NULL,
            name TEXT NOT NULL,
            link TEXT NOT NULL,
            discovered_at INTEGER NOT NULL,
            PRIMARY KEY (source_id, item_id),
            FOREIGN KEY (source_id) REFERENCES sources(id) ON DELETE CASCADE
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS check_sessions (
            id TEXT PRIMARY KEY,
            source_id INTEGER NOT NULL,
            started_at INTEGER NOT NULL,
            completed_at INTEGER,
            status TEXT NOT NULL DEFAULT 'running',
            items_found INTEGER NOT NULL DEFAULT 0,
            new_items_found INTEGER NOT NULL DEFAULT 0,
            FOREIGN KEY (source_id) REFERENCES sources(id) ON DELETE CASCADE
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_sessions_source_started ON check_sessions(source_id, started_at DESC)",
    )
    .execute(pool)
    .await?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_items_discovered_at ON items(source_id, discovered_at DESC)",
    )
    .execute(pool)
    .await?;

    // single row, id = 1
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS scheduler_lock (
            id INTEGER PRIMARY KEY CHECK (id = 1),
            holder TEXT,
            acquired_at INTEGER,
            last_run INTEGER
        )
        "#,
    )
    .execute(pool)
    .await?;
    sqlx::query("INSERT OR IGNORE INTO scheduler_lock (id) VALUES (1)")
        .execute(pool)
        .await?;

    Ok(())
}
