//! SQLite-backed [`Store`] implementation.
//!
//! Uniqueness and cascade invariants are enforced by the schema in
//! [`migrate`](crate::migrate): `sources.url` is `UNIQUE`, items are keyed by
//! `(source_id, item_id)`, and both child tables reference `sources` with
//! `ON DELETE CASCADE`.
//!
//! The scheduler lock is the single `scheduler_lock` row. Acquisition is one
//! conditional `UPDATE`, so concurrent processes on the same file cannot both
//! take it.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteRow, SqlitePool};
use sqlx::Row;
use uuid::Uuid;

use storewatch_core::error::{Result, WatchError};
use storewatch_core::interval::{CheckInterval, IntervalUnit};
use storewatch_core::models::{
    CheckSession, FetchedItem, Item, LockAttempt, LockRecord, NewSource, SessionStatus, Source,
    StoreKind, StoreStats,
};
use storewatch_core::store::Store;

/// SQLite implementation of the [`Store`] trait.
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

fn db_err(err: sqlx::Error) -> WatchError {
    WatchError::persistence(err)
}

fn from_millis(ms: i64) -> Result<DateTime<Utc>> {
    DateTime::from_timestamp_millis(ms)
        .ok_or_else(|| WatchError::persistence(format!("invalid timestamp {}", ms)))
}

fn source_from_row(row: &SqliteRow) -> Result<Source> {
    let kind: String = row.try_get("kind").map_err(db_err)?;
    let unit: String = row.try_get("interval_unit").map_err(db_err)?;
    let value: i64 = row.try_get("interval_value").map_err(db_err)?;
    let last_checked: Option<i64> = row.try_get("last_checked").map_err(db_err)?;
    let created_at: i64 = row.try_get("created_at").map_err(db_err)?;

    let kind: StoreKind = kind.parse().map_err(WatchError::persistence)?;
    let unit: IntervalUnit = unit.parse().map_err(WatchError::persistence)?;
    let interval = CheckInterval::new(value, unit).map_err(WatchError::persistence)?;

    Ok(Source {
        id: row.try_get("id").map_err(db_err)?,
        name: row.try_get("name").map_err(db_err)?,
        url: row.try_get("url").map_err(db_err)?,
        kind,
        interval,
        last_checked: last_checked.map(from_millis).transpose()?,
        created_at: from_millis(created_at)?,
    })
}

fn session_from_row(row: &SqliteRow) -> Result<CheckSession> {
    let status: String = row.try_get("status").map_err(db_err)?;
    let started_at: i64 = row.try_get("started_at").map_err(db_err)?;
    let completed_at: Option<i64> = row.try_get("completed_at").map_err(db_err)?;
    let items_found: i64 = row.try_get("items_found").map_err(db_err)?;
    let new_items_found: i64 = row.try_get("new_items_found").map_err(db_err)?;

    Ok(CheckSession {
        id: row.try_get("id").map_err(db_err)?,
        source_id: row.try_get("source_id").map_err(db_err)?,
        started_at: from_millis(started_at)?,
        completed_at: completed_at.map(from_millis).transpose()?,
        status: status.parse()?,
        items_found: u32::try_from(items_found).unwrap_or(u32::MAX),
        new_items_found: u32::try_from(new_items_found).unwrap_or(u32::MAX),
    })
}

const SOURCE_COLUMNS: &str =
    "id, name, url, kind, interval_value, interval_unit, last_checked, created_at";

#[async_trait]
impl Store for SqliteStore {
    async fn create_source(&self, source: &NewSource) -> Result<Source> {
        let result = sqlx::query(
            r#"
            INSERT INTO sources (name, url, kind, interval_value, interval_unit, created_at)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&source.name)
        .bind(&source.url)
        .bind(source.kind.as_str())
        .bind(i64::from(source.interval.value()))
        .bind(source.interval.unit().as_str())
        .bind(source.created_at.timestamp_millis())
        .execute(&self.pool)
        .await
        .map_err(|e| match e {
            sqlx::Error::Database(ref db) if db.is_unique_violation() => {
                WatchError::DuplicateSource {
                    url: source.url.clone(),
                }
            }
            other => db_err(other),
        })?;

        let id = result.last_insert_rowid();
        self.get_source(id)
            .await?
            .ok_or_else(|| WatchError::persistence(format!("source {} vanished after insert", id)))
    }

    async fn get_source(&self, id: i64) -> Result<Option<Source>> {
        let row = sqlx::query(&format!("SELECT {} FROM sources WHERE id = ?", SOURCE_COLUMNS))
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;
        row.as_ref().map(source_from_row).transpose()
    }

    async fn list_sources(&self) -> Result<Vec<Source>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM sources ORDER BY created_at DESC, id DESC",
            SOURCE_COLUMNS
        ))
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;
        rows.iter().map(source_from_row).collect()
    }

    async fn delete_source(&self, id: i64) -> Result<bool> {
        let mut tx = self.pool.begin().await.map_err(db_err)?;

        // Explicit child deletes keep the cascade intact even on databases
        // opened without foreign-key enforcement.
        sqlx::query("DELETE FROM items WHERE source_id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await
            .map_err(db_err)?;
        sqlx::query("DELETE FROM check_sessions WHERE source_id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await
            .map_err(db_err)?;
        let deleted = sqlx::query("DELETE FROM sources WHERE id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await
            .map_err(db_err)?
            .rows_affected();

        tx.commit().await.map_err(db_err)?;
        Ok(deleted > 0)
    }

    async fn update_interval(&self, id: i64, interval: CheckInterval) -> Result<bool> {
        let affected = sqlx::query(
            "UPDATE sources SET interval_value = ?, interval_unit = ? WHERE id = ?",
        )
        .bind(i64::from(interval.value()))
        .bind(interval.unit().as_str())
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(db_err)?
        .rows_affected();
        Ok(affected > 0)
    }

    async fn mark_checked(&self, id: i64, at: DateTime<Utc>) -> Result<bool> {
        let affected = sqlx::query("UPDATE sources SET last_checked = ? WHERE id = ?")
            .bind(at.timestamp_millis())
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(db_err)?
            .rows_affected();
        Ok(affected > 0)
    }

    async fn create_session(
        &self,
        source_id: i64,
        started_at: DateTime<Utc>,
    ) -> Result<CheckSession> {
        let id = Uuid::new_v4().to_string();
        sqlx::query(
            "INSERT INTO check_sessions (id, source_id, started_at, status) VALUES (?, ?, ?, 'running')",
        )
        .bind(&id)
        .bind(source_id)
        .bind(started_at.timestamp_millis())
        .execute(&self.pool)
        .await
        .map_err(|e| match e {
            sqlx::Error::Database(ref db) if db.is_foreign_key_violation() => {
                WatchError::SourceNotFound(source_id)
            }
            other => db_err(other),
        })?;

        Ok(CheckSession {
            id,
            source_id,
            started_at,
            completed_at: None,
            status: SessionStatus::Running,
            items_found: 0,
            new_items_found: 0,
        })
    }

    async fn finish_session(
        &self,
        session_id: &str,
        status: SessionStatus,
        items_found: u32,
        new_items_found: u32,
        completed_at: DateTime<Utc>,
    ) -> Result<()> {
        let affected = sqlx::query(
            r#"
            UPDATE check_sessions
            SET status = ?, items_found = ?, new_items_found = ?, completed_at = ?
            WHERE id = ?
            "#,
        )
        .bind(status.as_str())
        .bind(i64::from(items_found))
        .bind(i64::from(new_items_found))
        .bind(completed_at.timestamp_millis())
        .bind(session_id)
        .execute(&self.pool)
        .await
        .map_err(db_err)?
        .rows_affected();

        if affected == 0 {
            return Err(WatchError::persistence(format!(
                "session {} not found",
                session_id
            )));
        }
        Ok(())
    }

    async fn insert_item(
        &self,
        source_id: i64,
        item: &FetchedItem,
        discovered_at: DateTime<Utc>,
    ) -> Result<bool> {
        let affected = sqlx::query(
            r#"
            INSERT INTO items (source_id, item_id, name, link, discovered_at)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(source_id, item_id) DO NOTHING
            "#,
        )
        .bind(source_id)
        .bind(&item.id)
        .bind(&item.name)
        .bind(&item.link)
        .bind(discovered_at.timestamp_millis())
        .execute(&self.pool)
        .await
        .map_err(|e| match e {
            sqlx::Error::Database(ref db) if db.is_foreign_key_violation() => {
                WatchError::SourceNotFound(source_id)
            }
            other => db_err(other),
        })?
        .rows_affected();
        Ok(affected == 1)
    }

    async fn items_for_source(&self, source_id: i64) -> Result<Vec<Item>> {
        let rows = sqlx::query(
            r#"
            SELECT source_id, item_id, name, link, discovered_at
            FROM items
            WHERE source_id = ?
            ORDER BY discovered_at DESC, rowid DESC
            "#,
        )
        .bind(source_id)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;

        rows.iter()
            .map(|row| {
                let discovered_at: i64 = row.try_get("discovered_at").map_err(db_err)?;
                Ok(Item {
                    source_id: row.try_get("source_id").map_err(db_err)?,
                    item_id: row.try_get("item_id").map_err(db_err)?,
                    name: row.try_get("name").map_err(db_err)?,
                    link: row.try_get("link").map_err(db_err)?,
                    discovered_at: from_millis(discovered_at)?,
                })
            })
            .collect()
    }

    async fn list_sessions(
        &self,
        source_id: Option<i64>,
        limit: usize,
    ) -> Result<Vec<CheckSession>> {
        let rows = sqlx::query(
            r#"
            SELECT id, source_id, started_at, completed_at, status, items_found, new_items_found
            FROM check_sessions
            WHERE (? IS NULL OR source_id = ?)
            ORDER BY started_at DESC, rowid DESC
            LIMIT ?
            "#,
        )
        .bind(source_id)
        .bind(source_id)
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;
        rows.iter().map(session_from_row).collect()
    }

    async fn stats(&self, since: DateTime<Utc>) -> Result<StoreStats> {
        let row = sqlx::query(
            r#"
            SELECT
                (SELECT COUNT(*) FROM sources) AS total_sources,
                (SELECT COUNT(*) FROM items) AS total_items,
                (SELECT COUNT(*) FROM check_sessions) AS total_sessions,
                (SELECT COALESCE(SUM(new_items_found), 0)
                   FROM check_sessions WHERE started_at > ?) AS new_items_since
            "#,
        )
        .bind(since.timestamp_millis())
        .fetch_one(&self.pool)
        .await
        .map_err(db_err)?;

        let count = |col: &str| -> Result<u64> {
            let v: i64 = row.try_get(col).map_err(db_err)?;
            Ok(v.max(0) as u64)
        };

        Ok(StoreStats {
            total_sources: count("total_sources")?,
            total_items: count("total_items")?,
            total_sessions: count("total_sessions")?,
            new_items_since: count("new_items_since")?,
        })
    }

    async fn try_lock(
        &self,
        holder: &str,
        now: DateTime<Utc>,
        stale_before: DateTime<Utc>,
        last_run_before: Option<DateTime<Utc>>,
    ) -> Result<LockAttempt> {
        let spacing_cutoff = last_run_before.map(|t| t.timestamp_millis());
        let result = sqlx::query(
            r#"
            UPDATE scheduler_lock
            SET holder = ?, acquired_at = ?
            WHERE id = 1
              AND (holder IS NULL OR acquired_at IS NULL OR acquired_at <= ?)
              AND (? IS NULL OR last_run IS NULL OR last_run <= ?)
            "#,
        )
        .bind(holder)
        .bind(now.timestamp_millis())
        .bind(stale_before.timestamp_millis())
        .bind(spacing_cutoff)
        .bind(spacing_cutoff)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        if result.rows_affected() == 1 {
            Ok(LockAttempt::Acquired)
        } else {
            Ok(LockAttempt::Refused(self.lock_record().await?))
        }
    }

    async fn release_lock(&self, holder: &str, at: DateTime<Utc>) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE scheduler_lock
            SET holder = NULL, acquired_at = NULL, last_run = ?
            WHERE id = 1 AND holder = ?
            "#,
        )
        .bind(at.timestamp_millis())
        .bind(holder)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(result.rows_affected() == 1)
    }

    async fn lock_record(&self) -> Result<LockRecord> {
        let row = sqlx::query(
            "SELECT holder, acquired_at, last_run FROM scheduler_lock WHERE id = 1",
        )
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;

        let Some(row) = row else {
            return Ok(LockRecord::default());
        };
        let acquired_at: Option<i64> = row.try_get("acquired_at").map_err(db_err)?;
        let last_run: Option<i64> = row.try_get("last_run").map_err(db_err)?;
        Ok(LockRecord {
            holder: row.try_get("holder").map_err(db_err)?,
            acquired_at: acquired_at.map(from_millis).transpose()?,
            last_run: last_run.map(from_millis).transpose()?,
        })
    }
}
