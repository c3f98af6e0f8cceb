//! Read-only views over the store: scheduling status, aggregate stats, and
//! the check session log. Used by `storewatch status|stats|sessions`.

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use storewatch_core::error::Result;
use storewatch_core::models::{CheckSession, StoreKind, StoreStats};

use crate::context::AppContext;
use crate::lock::LockStatus;

/// Window for [`StoreStats::new_items_since`] in the stats report.
pub const RECENT_WINDOW_HOURS: i64 = 24;

#[derive(Debug, Clone, Serialize)]
pub struct SourceStatus {
    pub id: i64,
    pub name: String,
    pub kind: StoreKind,
    pub interval: String,
    pub last_checked: Option<DateTime<Utc>>,
    /// `None` when the source has never been checked.
    pub next_check_at: Option<DateTime<Utc>>,
    /// Zero once the source is due.
    pub seconds_until_next: i64,
    pub due: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct StatusReport {
    pub generated_at: DateTime<Utc>,
    pub lock: LockStatus,
    pub sources: Vec<SourceStatus>,
}

impl StatusReport {
    pub fn due_count(&self) -> usize {
        self.sources.iter().filter(|s| s.due).count()
    }
}

/// Next check time and due flag for every source, plus the lock state.
///
/// # Errors
///
/// Fails if the source list or the lock row cannot be read.
pub async fn status(ctx: &AppContext, now: DateTime<Utc>) -> Result<StatusReport> {
    let sources = ctx
        .registry
        .list()
        .await?
        .into_iter()
        .map(|source| {
            let next_check_at = ctx.registry.next_check_at(&source);
            let seconds_until_next = next_check_at
                .map(|next| (next - now).num_seconds().max(0))
                .unwrap_or(0);
            SourceStatus {
                due: next_check_at.map_or(true, |next| now >= next),
                id: source.id,
                interval: source.interval.to_string(),
                name: source.name,
                kind: source.kind,
                last_checked: source.last_checked,
                next_check_at,
                seconds_until_next,
            }
        })
        .collect();

    Ok(StatusReport {
        generated_at: now,
        lock: ctx.lock.status().await?,
        sources,
    })
}

/// Store-wide counters, with new items counted over the last
/// [`RECENT_WINDOW_HOURS`].
pub async fn stats(ctx: &AppContext, now: DateTime<Utc>) -> Result<StoreStats> {
    ctx.registry
        .store()
        .stats(now - Duration::hours(RECENT_WINDOW_HOURS))
        .await
}

/// Up to `limit` sessions, newest first, optionally for one source.
///
/// # Errors
///
/// [`WatchError::SourceNotFound`](storewatch_core::error::WatchError::SourceNotFound)
/// when `source_id` names an untracked source.
pub async fn sessions(
    ctx: &AppContext,
    source_id: Option<i64>,
    limit: usize,
) -> Result<Vec<CheckSession>> {
    if let Some(id) = source_id {
        ctx.registry.get(id).await?;
    }
    ctx.registry.store().list_sessions(source_id, limit).await
}

/// Render a non-negative number of seconds as e.g. `2h 5m` or `40s`.
pub fn format_wait(seconds: i64) -> String {
    let seconds = seconds.max(0);
    let (d, h, m, s) = (
        seconds / 86_400,
        (seconds % 86_400) / 3_600,
        (seconds % 3_600) / 60,
        seconds % 60,
    );
    if d > 0 {
        format!("{}d {}h", d, h)
    } else if h > 0 {
        format!("{}h {}m", h, m)
    } else if m > 0 {
        format!("{}m {}s", m, s)
    } else {
        format!("{}s", s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::fetcher::FetcherRegistry;
    use crate::notifier::LogNotifier;
    use crate::registry::SourceRequest;
    use std::sync::Arc;
    use storewatch_core::interval::CheckInterval;
    use storewatch_core::store::memory::InMemoryStore;

    fn context() -> AppContext {
        AppContext::with_parts(
            Config::minimal(),
            Arc::new(InMemoryStore::new()),
            FetcherRegistry::new(),
            Arc::new(LogNotifier),
        )
    }

    async fn add(ctx: &AppContext, url: &str) -> i64 {
        ctx.registry
            .register(SourceRequest {
                name: None,
                url: url.to_string(),
                kind: None,
                interval: CheckInterval::parse(1, "hours").unwrap(),
            })
            .await
            .unwrap()
            .id
    }

    #[tokio::test]
    async fn test_status_due_and_waiting() {
        let ctx = context();
        let fresh = add(&ctx, "https://play.google.com/store/apps/dev?id=1").await;
        let checked = add(&ctx, "https://play.google.com/store/apps/dev?id=2").await;

        let now = Utc::now();
        ctx.registry
            .mark_checked(checked, now - Duration::minutes(20))
            .await
            .unwrap();

        let report = status(&ctx, now).await.unwrap();
        assert_eq!(report.sources.len(), 2);
        assert_eq!(report.due_count(), 1);
        assert!(!report.lock.held);

        let fresh = report.sources.iter().find(|s| s.id == fresh).unwrap();
        assert!(fresh.due);
        assert!(fresh.next_check_at.is_none());

        let checked = report.sources.iter().find(|s| s.id == checked).unwrap();
        assert!(!checked.due);
        assert_eq!(checked.seconds_until_next, 40 * 60);
    }

    #[tokio::test]
    async fn test_status_reports_lock_holder() {
        let ctx = context();
        let guard = ctx.lock.try_acquire("run-held").await.unwrap();

        let report = status(&ctx, Utc::now()).await.unwrap();
        assert!(report.lock.held);
        assert_eq!(report.lock.holder.as_deref(), Some("run-held"));
        assert!(report.lock.acquired_at.is_some());

        guard.release().await;
        let report = status(&ctx, Utc::now()).await.unwrap();
        assert!(!report.lock.held);
        assert!(report.lock.last_run.is_some());
    }

    #[tokio::test]
    async fn test_sessions_for_unknown_source() {
        let ctx = context();
        assert!(sessions(&ctx, Some(99), 10).await.is_err());
        assert!(sessions(&ctx, None, 10).await.unwrap().is_empty());
    }

    #[test]
    fn test_format_wait() {
        assert_eq!(format_wait(-5), "0s");
        assert_eq!(format_wait(40), "40s");
        assert_eq!(format_wait(125), "2m 5s");
        assert_eq!(format_wait(2 * 3600 + 300), "2h 5m");
        assert_eq!(format_wait(3 * 86_400 + 3600), "3d 1h");
    }
}
