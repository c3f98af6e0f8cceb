//! In-memory [`Store`] implementation for tests and ephemeral deployments.
//!
//! Uses `BTreeMap`, `HashMap` and `Vec` behind a single `std::sync::RwLock`,
//! so a cascading delete is atomic with respect to readers. Nothing survives
//! the process.

use std::collections::{BTreeMap, HashMap};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::{Result, WatchError};
use crate::interval::CheckInterval;
use crate::models::{
    CheckSession, FetchedItem, Item, LockAttempt, LockRecord, NewSource, SessionStatus, Source,
    StoreStats,
};

use super::Store;

#[derive(Default)]
struct State {
    next_source_id: i64,
    sources: BTreeMap<i64, Source>,
    items: HashMap<i64, Vec<Item>>,
    sessions: Vec<CheckSession>,
    lock: LockRecord,
}

/// In-memory store for testing and single-process runs.
pub struct InMemoryStore {
    state: RwLock<State>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            state: RwLock::new(State {
                next_source_id: 1,
                ..State::default()
            }),
        }
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, State>> {
        self.state
            .read()
            .map_err(|_| WatchError::persistence("in-memory store lock poisoned"))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, State>> {
        self.state
            .write()
            .map_err(|_| WatchError::persistence("in-memory store lock poisoned"))
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Store for InMemoryStore {
    async fn create_source(&self, source: &NewSource) -> Result<Source> {
        let mut state = self.write()?;
        if state.sources.values().any(|s| s.url == source.url) {
            return Err(WatchError::DuplicateSource {
                url: source.url.clone(),
            });
        }
        let id = state.next_source_id;
        state.next_source_id += 1;
        let created = Source {
            id,
            name: source.name.clone(),
            url: source.url.clone(),
            kind: source.kind,
            interval: source.interval,
            last_checked: None,
            created_at: source.created_at,
        };
        state.sources.insert(id, created.clone());
        Ok(created)
    }

    async fn get_source(&self, id: i64) -> Result<Option<Source>> {
        Ok(self.read()?.sources.get(&id).cloned())
    }

    async fn list_sources(&self) -> Result<Vec<Source>> {
        let mut sources: Vec<Source> = self.read()?.sources.values().cloned().collect();
        sources.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        Ok(sources)
    }

    async fn delete_source(&self, id: i64) -> Result<bool> {
        let mut state = self.write()?;
        if state.sources.remove(&id).is_none() {
            return Ok(false);
        }
        state.items.remove(&id);
        state.sessions.retain(|s| s.source_id != id);
        Ok(true)
    }

    async fn update_interval(&self, id: i64, interval: CheckInterval) -> Result<bool> {
        let mut state = self.write()?;
        match state.sources.get_mut(&id) {
            Some(source) => {
                source.interval = interval;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn mark_checked(&self, id: i64, at: DateTime<Utc>) -> Result<bool> {
        let mut state = self.write()?;
        match state.sources.get_mut(&id) {
            Some(source) => {
                source.last_checked = Some(at);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn create_session(
        &self,
        source_id: i64,
        started_at: DateTime<Utc>,
    ) -> Result<CheckSession> {
        let mut state = self.write()?;
        if !state.sources.contains_key(&source_id) {
            return Err(WatchError::SourceNotFound(source_id));
        }
        let session = CheckSession {
            id: Uuid::new_v4().to_string(),
            source_id,
            started_at,
            completed_at: None,
            status: SessionStatus::Running,
            items_found: 0,
            new_items_found: 0,
        };
        state.sessions.push(session.clone());
        Ok(session)
    }

    async fn finish_session(
        &self,
        session_id: &str,
        status: SessionStatus,
        items_found: u32,
        new_items_found: u32,
        completed_at: DateTime<Utc>,
    ) -> Result<()> {
        let mut state = self.write()?;
        let session = state
            .sessions
            .iter_mut()
            .find(|s| s.id == session_id)
            .ok_or_else(|| WatchError::persistence(format!("session {} not found", session_id)))?;
        session.status = status;
        session.items_found = items_found;
        session.new_items_found = new_items_found;
        session.completed_at = Some(completed_at);
        Ok(())
    }

    async fn insert_item(
        &self,
        source_id: i64,
        item: &FetchedItem,
        discovered_at: DateTime<Utc>,
    ) -> Result<bool> {
        let mut state = self.write()?;
        if !state.sources.contains_key(&source_id) {
            return Err(WatchError::SourceNotFound(source_id));
        }
        let items = state.items.entry(source_id).or_default();
        if items.iter().any(|existing| existing.item_id == item.id) {
            return Ok(false);
        }
        items.push(Item {
            source_id,
            item_id: item.id.clone(),
            name: item.name.clone(),
            link: item.link.clone(),
            discovered_at,
        });
        Ok(true)
    }

    async fn items_for_source(&self, source_id: i64) -> Result<Vec<Item>> {
        let mut items = self
            .read()?
            .items
            .get(&source_id)
            .cloned()
            .unwrap_or_default();
        items.reverse();
        items.sort_by(|a, b| b.discovered_at.cmp(&a.discovered_at));
        Ok(items)
    }

    async fn list_sessions(
        &self,
        source_id: Option<i64>,
        limit: usize,
    ) -> Result<Vec<CheckSession>> {
        let state = self.read()?;
        let mut sessions: Vec<CheckSession> = state
            .sessions
            .iter()
            .rev()
            .filter(|s| source_id.map_or(true, |id| s.source_id == id))
            .cloned()
            .collect();
        sessions.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        sessions.truncate(limit);
        Ok(sessions)
    }

    async fn stats(&self, since: DateTime<Utc>) -> Result<StoreStats> {
        let state = self.read()?;
        Ok(StoreStats {
            total_sources: state.sources.len() as u64,
            total_items: state.items.values().map(|v| v.len() as u64).sum(),
            total_sessions: state.sessions.len() as u64,
            new_items_since: state
                .sessions
                .iter()
                .filter(|s| s.started_at > since)
                .map(|s| u64::from(s.new_items_found))
                .sum(),
        })
    }

    async fn try_lock(
        &self,
        holder: &str,
        now: DateTime<Utc>,
        stale_before: DateTime<Utc>,
        last_run_before: Option<DateTime<Utc>>,
    ) -> Result<LockAttempt> {
        let mut state = self.write()?;
        let free = match (&state.lock.holder, state.lock.acquired_at) {
            (None, _) => true,
            (Some(_), Some(acquired_at)) => acquired_at <= stale_before,
            (Some(_), None) => true,
        };
        let spaced = match (last_run_before, state.lock.last_run) {
            (Some(cutoff), Some(last_run)) => last_run <= cutoff,
            _ => true,
        };
        if !(free && spaced) {
            return Ok(LockAttempt::Refused(state.lock.clone()));
        }
        state.lock.holder = Some(holder.to_string());
        state.lock.acquired_at = Some(now);
        Ok(LockAttempt::Acquired)
    }

    async fn release_lock(&self, holder: &str, at: DateTime<Utc>) -> Result<bool> {
        let mut state = self.write()?;
        if state.lock.holder.as_deref() != Some(holder) {
            return Ok(false);
        }
        state.lock = LockRecord {
            holder: None,
            acquired_at: None,
            last_run: Some(at),
        };
        Ok(true)
    }

    async fn lock_record(&self) -> Result<LockRecord> {
        Ok(self.read()?.lock.clone())
    }
}
