//! Single-flight lock shared by scheduled cycles and external triggers.
//!
//! The lock state (holder, acquire time, last completed run) lives in the
//! [`Store`], so a `storewatch check-all` started from a shell sees a cycle
//! running inside `storewatch serve` and the spacing window left by it.
//!
//! Acquisition is non-blocking: a caller either gets a [`LockGuard`] or is
//! told why not. A holder that has kept the lock longer than the stale
//! timeout is treated as gone (crashed process) and replaced.
//!
//! Release is explicit through [`LockGuard::release`]. A guard dropped
//! without it (a panic unwinding through a cycle) schedules the release on
//! the current runtime.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use storewatch_core::models::{LockAttempt, LockRecord};
use storewatch_core::store::Store;
use tracing::{debug, warn};

/// Snapshot of the lock for status reporting.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LockStatus {
    pub held: bool,
    pub holder: Option<String>,
    pub acquired_at: Option<DateTime<Utc>>,
    pub last_run: Option<DateTime<Utc>>,
}

/// Why an acquisition attempt was refused.
#[derive(Debug, Clone, PartialEq)]
pub enum Refusal {
    Busy {
        holder: String,
    },
    TooSoon {
        last_run: DateTime<Utc>,
        next_allowed: DateTime<Utc>,
    },
    /// The lock row could not be read or written.
    Unavailable(String),
}

#[derive(Clone)]
pub struct SchedulerLock {
    store: Arc<dyn Store>,
    stale_after: Duration,
}

impl fmt::Debug for SchedulerLock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SchedulerLock")
            .field("stale_after", &self.stale_after)
            .finish_non_exhaustive()
    }
}

impl SchedulerLock {
    /// # Arguments
    ///
    /// * `store`: backend holding the lock row; share it between every
    ///   process that must be mutually exclusive.
    /// * `stale_after`: how long a holder may keep the lock before another
    ///   caller may take it over.
    pub fn new(store: Arc<dyn Store>, stale_after: Duration) -> Self {
        Self { store, stale_after }
    }

    /// Take the lock for `holder` unless a live holder has it.
    pub async fn try_acquire(&self, holder: &str) -> Result<LockGuard, Refusal> {
        self.acquire_inner(holder, None, Utc::now()).await
    }

    /// Like [`try_acquire`](Self::try_acquire), but also refuses when the
    /// previous run finished less than `min_spacing` before `now`.
    pub async fn try_acquire_spaced(
        &self,
        holder: &str,
        min_spacing: Duration,
        now: DateTime<Utc>,
    ) -> Result<LockGuard, Refusal> {
        self.acquire_inner(holder, Some(min_spacing), now).await
    }

    async fn acquire_inner(
        &self,
        holder: &str,
        min_spacing: Option<Duration>,
        now: DateTime<Utc>,
    ) -> Result<LockGuard, Refusal> {
        let stale_before = now - self.stale_after;
        let attempt = self
            .store
            .try_lock(holder, now, stale_before, min_spacing.map(|s| now - s))
            .await
            .map_err(|e| {
                warn!(holder, error = %e, "lock row unavailable");
                Refusal::Unavailable(e.to_string())
            })?;

        let record = match attempt {
            LockAttempt::Acquired => {
                debug!(holder, "lock acquired");
                return Ok(LockGuard {
                    store: Arc::clone(&self.store),
                    holder: holder.to_string(),
                    released: false,
                });
            }
            LockAttempt::Refused(record) => record,
        };

        if let Some(current) = live_holder(&record, stale_before) {
            debug!(holder, current, "lock busy");
            return Err(Refusal::Busy {
                holder: current.to_string(),
            });
        }
        match (min_spacing, record.last_run) {
            (Some(min_spacing), Some(last_run)) => {
                let next_allowed = last_run + min_spacing;
                debug!(holder, %last_run, %next_allowed, "trigger too frequent");
                Err(Refusal::TooSoon {
                    last_run,
                    next_allowed,
                })
            }
            // Released and re-taken between the update and the read.
            _ => Err(Refusal::Busy {
                holder: record.holder.unwrap_or_else(|| "unknown".to_string()),
            }),
        }
    }

    /// Current lock row, with a stale holder reported as not held.
    pub async fn status(&self) -> storewatch_core::Result<LockStatus> {
        let record = self.store.lock_record().await?;
        let held = live_holder(&record, Utc::now() - self.stale_after).is_some();
        Ok(LockStatus {
            held,
            holder: record.holder,
            acquired_at: record.acquired_at,
            last_run: record.last_run,
        })
    }
}

fn live_holder(record: &LockRecord, stale_before: DateTime<Utc>) -> Option<&str> {
    match (record.holder.as_deref(), record.acquired_at) {
        (Some(holder), Some(acquired_at)) if acquired_at > stale_before => Some(holder),
        _ => None,
    }
}

/// Held for the duration of one cycle or trigger.
pub struct LockGuard {
    store: Arc<dyn Store>,
    holder: String,
    released: bool,
}

impl fmt::Debug for LockGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LockGuard")
            .field("holder", &self.holder)
            .field("released", &self.released)
            .finish_non_exhaustive()
    }
}

impl LockGuard {
    pub fn holder(&self) -> &str {
        &self.holder
    }

    /// Release the lock and stamp the completion time.
    pub async fn release(mut self) {
        self.released = true;
        release_in(&*self.store, &self.holder).await;
    }
}

async fn release_in(store: &dyn Store, holder: &str) {
    match store.release_lock(holder, Utc::now()).await {
        Ok(true) => debug!(holder, "lock released"),
        Ok(false) => warn!(holder, "attempted to release a lock owned by someone else"),
        Err(e) => warn!(holder, error = %e, "failed to release lock"),
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        let store = Arc::clone(&self.store);
        let holder = std::mem::take(&mut self.holder);
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                warn!(holder = %holder, "lock guard dropped without release");
                handle.spawn(async move { release_in(&*store, &holder).await });
            }
            Err(_) => warn!(
                holder = %holder,
                "lock guard dropped outside a runtime; it will expire as stale"
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use storewatch_core::store::memory::InMemoryStore;

    fn lock() -> SchedulerLock {
        SchedulerLock::new(Arc::new(InMemoryStore::new()), Duration::minutes(10))
    }

    #[tokio::test]
    async fn test_second_acquire_is_refused_until_release() {
        let lock = lock();
        let guard = lock.try_acquire("run-1").await.unwrap();
        assert_eq!(guard.holder(), "run-1");

        match lock.try_acquire("run-2").await {
            Err(Refusal::Busy { holder }) => assert_eq!(holder, "run-1"),
            other => panic!("expected Busy, got {:?}", other),
        }
        assert!(lock.status().await.unwrap().held);

        guard.release().await;
        let status = lock.status().await.unwrap();
        assert!(!status.held);
        assert!(status.holder.is_none());
        assert!(status.last_run.is_some());
        assert!(lock.try_acquire("run-2").await.is_ok());
    }

    #[tokio::test]
    async fn test_spacing_guard() {
        let lock = lock();
        let spacing = Duration::seconds(30);

        // No previous run: spacing does not apply.
        lock.try_acquire_spaced("a", spacing, Utc::now())
            .await
            .unwrap()
            .release()
            .await;
        let last_run = lock.status().await.unwrap().last_run.unwrap();

        match lock
            .try_acquire_spaced("b", spacing, last_run + Duration::seconds(10))
            .await
        {
            Err(Refusal::TooSoon { next_allowed, .. }) => {
                assert_eq!(next_allowed, last_run + spacing)
            }
            other => panic!("expected TooSoon, got {:?}", other),
        }
        assert!(!lock.status().await.unwrap().held);

        assert!(lock
            .try_acquire_spaced("c", spacing, last_run + spacing)
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn test_stale_holder_is_taken_over() {
        let store: Arc<dyn Store> = Arc::new(InMemoryStore::new());
        let lock = SchedulerLock::new(Arc::clone(&store), Duration::zero());

        // A process that died mid-cycle never releases.
        std::mem::forget(lock.try_acquire("crashed").await.unwrap());
        assert!(!lock.status().await.unwrap().held);

        let guard = lock.try_acquire("fresh").await.unwrap();
        assert_eq!(
            store.lock_record().await.unwrap().holder.as_deref(),
            Some("fresh")
        );
        guard.release().await;
    }

    #[tokio::test]
    async fn test_release_on_panic() {
        let lock = lock();
        let cloned = lock.clone();
        let result = tokio::spawn(async move {
            let _guard = cloned.try_acquire("panicky").await.unwrap();
            panic!("cycle blew up");
        })
        .await;
        assert!(result.is_err());

        for _ in 0..50 {
            if !lock.status().await.unwrap().held {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        let status = lock.status().await.unwrap();
        assert!(!status.held);
        assert!(status.last_run.is_some());
    }
}
