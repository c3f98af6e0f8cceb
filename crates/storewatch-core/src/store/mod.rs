//! Storage abstraction for storewatch.
//!
//! The [`Store`] trait defines every persistence operation the registry and
//! check pipeline need, so backends (SQLite, in-memory) are interchangeable
//! and selected once at startup.
//!
//! Implementations must be `Send + Sync` to work with async runtimes, and
//! must uphold two uniqueness invariants: no two sources share a URL, and
//! `(source_id, item_id)` is unique among items. Deleting a source removes
//! its items and sessions.
//!
//! The store also owns the scheduler lock row, so every process sharing a
//! database sees the same holder and last-run time.

pub mod memory;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::Result;
use crate::interval::CheckInterval;
use crate::models::{
    CheckSession, FetchedItem, Item, LockAttempt, LockRecord, NewSource, SessionStatus, Source,
    StoreStats,
};

/// Abstract storage backend for storewatch.
///
/// # Operations
///
/// | Method | Purpose |
/// |--------|---------|
/// | [`create_source`](Store::create_source) | Insert a source; `DuplicateSource` on URL clash |
/// | [`get_source`](Store::get_source) | Fetch one source by id |
/// | [`list_sources`](Store::list_sources) | All sources, newest first |
/// | [`delete_source`](Store::delete_source) | Delete a source with its items and sessions |
/// | [`update_interval`](Store::update_interval) | Change a source's check interval |
/// | [`mark_checked`](Store::mark_checked) | Set a source's last-checked time |
/// | [`create_session`](Store::create_session) | Open a `running` check session |
/// | [`finish_session`](Store::finish_session) | Close a session with counts |
/// | [`insert_item`](Store::insert_item) | Insert an item unless already known |
/// | [`items_for_source`](Store::items_for_source) | The known set for a source |
/// | [`list_sessions`](Store::list_sessions) | Session log, newest first |
/// | [`stats`](Store::stats) | Aggregate counters |
/// | [`try_lock`](Store::try_lock) | Conditionally take the scheduler lock |
/// | [`release_lock`](Store::release_lock) | Release the lock and stamp the last run |
/// | [`lock_record`](Store::lock_record) | Current lock row |
#[async_trait]
pub trait Store: Send + Sync {
    async fn create_source(&self, source: &NewSource) -> Result<Source>;

    async fn get_source(&self, id: i64) -> Result<Option<Source>>;

    /// All sources ordered by creation time, newest first.
    async fn list_sources(&self) -> Result<Vec<Source>>;

    /// Returns `false` if no such source existed.
    async fn delete_source(&self, id: i64) -> Result<bool>;

    /// Returns `false` if no such source existed.
    async fn update_interval(&self, id: i64, interval: CheckInterval) -> Result<bool>;

    /// Returns `false` if no such source existed.
    async fn mark_checked(&self, id: i64, at: DateTime<Utc>) -> Result<bool>;

    async fn create_session(
        &self,
        source_id: i64,
        started_at: DateTime<Utc>,
    ) -> Result<CheckSession>;

    async fn finish_session(
        &self,
        session_id: &str,
        status: SessionStatus,
        items_found: u32,
        new_items_found: u32,
        completed_at: DateTime<Utc>,
    ) -> Result<()>;

    /// Insert an item for a source. Returns `true` if it was new, `false`
    /// if `(source_id, item.id)` already existed.
    async fn insert_item(
        &self,
        source_id: i64,
        item: &FetchedItem,
        discovered_at: DateTime<Utc>,
    ) -> Result<bool>;

    /// Items for a source, most recently discovered first.
    async fn items_for_source(&self, source_id: i64) -> Result<Vec<Item>>;

    /// Sessions, optionally for one source, most recently started first.
    async fn list_sessions(&self, source_id: Option<i64>, limit: usize)
        -> Result<Vec<CheckSession>>;

    async fn stats(&self, since: DateTime<Utc>) -> Result<StoreStats>;

    /// Take the scheduler lock for `holder` in a single atomic step.
    ///
    /// Succeeds only when the lock is free (no holder, or a holder that
    /// acquired at or before `stale_before`) and, if `last_run_before` is
    /// given, the last release happened at or before it. Otherwise the row
    /// is untouched and its current state is returned.
    async fn try_lock(
        &self,
        holder: &str,
        now: DateTime<Utc>,
        stale_before: DateTime<Utc>,
        last_run_before: Option<DateTime<Utc>>,
    ) -> Result<LockAttempt>;

    /// Clear the holder and set `last_run` to `at`. Returns `false` if
    /// `holder` no longer owns the lock.
    async fn release_lock(&self, holder: &str, at: DateTime<Utc>) -> Result<bool>;

    async fn lock_record(&self) -> Result<LockRecord>;
}
