//! Per-source check pipeline.
//!
//! ```text
//! STARTED ──▶ FETCHED ──▶ DIFFED ──▶ PERSISTED ──▶ NOTIFIED ──▶ COMPLETED
//!    │           │           │            │
//!    └───────────┴───────────┴────────────┴──────▶ FAILED
//! ```
//!
//! 1. Open a `running` session (on failure, log and use a local id).
//! 2. Fetch the listing through the kind's strategy, under a timeout.
//! 3. Diff fetched ids against the stored known set.
//! 4. Insert each new item (insert-if-absent, so re-runs are harmless).
//! 5. Advance `last_checked` to the pipeline start time.
//! 6. Complete the session with counts.
//! 7. Notify once per new item; failures are collected, not propagated.
//!
//! A fetch failure marks the session `failed` and leaves `last_checked`
//! untouched so the source is retried on the next due check. Items and
//! `last_checked` are committed before any notification is attempted.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use storewatch_core::error::{Result, WatchError};
use storewatch_core::models::{FetchedItem, Item, SessionStatus, Source};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::fetcher::FetcherRegistry;
use crate::notifier::{self, NotificationOutcome, Notifier};
use crate::registry::SourceRegistry;

/// What one successful pipeline run produced.
#[derive(Debug, Clone, Serialize)]
pub struct CheckOutcome {
    pub source_id: i64,
    pub source_name: String,
    pub total_items: usize,
    pub new_items_count: usize,
    pub session_id: String,
    /// `false` when the session could not be recorded and `session_id` is a
    /// local placeholder.
    pub session_tracked: bool,
    pub new_items: Vec<Item>,
    pub notifications: Vec<NotificationOutcome>,
}

impl CheckOutcome {
    pub fn failed_notifications(&self) -> usize {
        self.notifications.iter().filter(|n| !n.delivered).count()
    }
}

struct SessionHandle {
    id: String,
    tracked: bool,
}

#[derive(Clone)]
pub struct CheckPipeline {
    registry: SourceRegistry,
    fetchers: FetcherRegistry,
    notifier: Arc<dyn Notifier>,
    fetch_timeout: Duration,
    notify_timeout: Duration,
}

impl CheckPipeline {
    /// # Arguments
    ///
    /// * `registry`: source lookups, `last_checked` updates and the store.
    /// * `fetchers`: fetch strategy per store kind.
    /// * `notifier`: receives one notification per new item.
    /// * `fetch_timeout`: upper bound on one listing fetch.
    /// * `notify_timeout`: upper bound on one notification send.
    pub fn new(
        registry: SourceRegistry,
        fetchers: FetcherRegistry,
        notifier: Arc<dyn Notifier>,
        fetch_timeout: Duration,
        notify_timeout: Duration,
    ) -> Self {
        Self {
            registry,
            fetchers,
            notifier,
            fetch_timeout,
            notify_timeout,
        }
    }

    /// Look the source up by id, then run [`check`](Self::check).
    pub async fn check_by_id(&self, source_id: i64) -> Result<CheckOutcome> {
        let source = self.registry.get(source_id).await?;
        self.check(&source).await
    }

    /// Run one check of `source`: fetch, diff against the known set, store
    /// and notify about the new items.
    ///
    /// Notification failures are reported in the outcome, not as errors.
    /// Failing to open or close the session record is logged and the check
    /// carries on untracked.
    ///
    /// # Errors
    ///
    /// - [`WatchError::Fetch`] if the fetch fails, times out, or no strategy
    ///   is registered for the source's kind. Nothing is stored and
    ///   `last_checked` is left alone, so the source stays due.
    /// - [`WatchError::Persistence`] or [`WatchError::SourceNotFound`] if
    ///   storing items or advancing `last_checked` fails.
    ///
    /// Either way the session, when tracked, is marked `failed`.
    pub async fn check(&self, source: &Source) -> Result<CheckOutcome> {
        let started_at = Utc::now();
        info!(source_id = source.id, name = %source.name, kind = %source.kind, "checking source");

        let session = self.open_session(source, started_at).await;

        let fetched = match self.fetch(source).await {
            Ok(items) => items,
            Err(e) => {
                warn!(source_id = source.id, session_id = %session.id, error = %e, "fetch failed");
                self.close_session(&session, SessionStatus::Failed, 0, 0).await;
                return Err(e);
            }
        };
        debug!(source_id = source.id, fetched = fetched.len(), "fetched listing");

        let new_items = match self.persist(source, &fetched, started_at).await {
            Ok(items) => items,
            Err(e) => {
                warn!(source_id = source.id, session_id = %session.id, error = %e, "check aborted");
                self.close_session(&session, SessionStatus::Failed, 0, 0).await;
                return Err(e);
            }
        };

        self.close_session(
            &session,
            SessionStatus::Completed,
            count(fetched.len()),
            count(new_items.len()),
        )
        .await;

        let notifications = if new_items.is_empty() {
            Vec::new()
        } else {
            notifier::dispatch(
                self.notifier.as_ref(),
                source,
                &new_items,
                self.notify_timeout,
            )
            .await
        };

        let outcome = CheckOutcome {
            source_id: source.id,
            source_name: source.name.clone(),
            total_items: fetched.len(),
            new_items_count: new_items.len(),
            session_id: session.id,
            session_tracked: session.tracked,
            new_items,
            notifications,
        };

        info!(
            source_id = source.id,
            session_id = %outcome.session_id,
            total = outcome.total_items,
            new = outcome.new_items_count,
            failed_notifications = outcome.failed_notifications(),
            "check completed"
        );
        Ok(outcome)
    }

    async fn open_session(&self, source: &Source, started_at: DateTime<Utc>) -> SessionHandle {
        match self
            .registry
            .store()
            .create_session(source.id, started_at)
            .await
        {
            Ok(session) => SessionHandle {
                id: session.id,
                tracked: true,
            },
            Err(e) => {
                let id = Uuid::new_v4().to_string();
                warn!(
                    source_id = source.id,
                    error = %e,
                    fallback_session_id = %id,
                    "could not create check session, continuing untracked"
                );
                SessionHandle { id, tracked: false }
            }
        }
    }

    async fn close_session(
        &self,
        session: &SessionHandle,
        status: SessionStatus,
        items_found: u32,
        new_items_found: u32,
    ) {
        if !session.tracked {
            return;
        }
        if let Err(e) = self
            .registry
            .store()
            .finish_session(&session.id, status, items_found, new_items_found, Utc::now())
            .await
        {
            warn!(session_id = %session.id, status = %status, error = %e, "could not update check session");
        }
    }

    async fn fetch(&self, source: &Source) -> Result<Vec<FetchedItem>> {
        let fetcher = self.fetchers.get(source.kind).ok_or_else(|| WatchError::Fetch {
            source_id: source.id,
            message: format!("no fetch strategy registered for {}", source.kind),
        })?;

        match tokio::time::timeout(self.fetch_timeout, fetcher.fetch(&source.url, source.kind))
            .await
        {
            Ok(Ok(items)) => Ok(items),
            Ok(Err(e)) => Err(WatchError::Fetch {
                source_id: source.id,
                message: format!("{:#}", e),
            }),
            Err(_) => Err(WatchError::Fetch {
                source_id: source.id,
                message: format!(
                    "{} timed out after {}s",
                    fetcher.name(),
                    self.fetch_timeout.as_secs()
                ),
            }),
        }
    }

    /// Diff against the known set, insert what is new, and advance
    /// `last_checked`. Returns the items that were actually inserted.
    async fn persist(
        &self,
        source: &Source,
        fetched: &[FetchedItem],
        started_at: DateTime<Utc>,
    ) -> Result<Vec<Item>> {
        let store = self.registry.store();
        let known: HashSet<String> = store
            .items_for_source(source.id)
            .await?
            .into_iter()
            .map(|item| item.item_id)
            .collect();

        let discovered_at = Utc::now();
        let mut queued = HashSet::new();
        let mut new_items = Vec::new();
        for item in fetched {
            if known.contains(&item.id) || !queued.insert(item.id.as_str()) {
                continue;
            }
            if store.insert_item(source.id, item, discovered_at).await? {
                new_items.push(Item {
                    source_id: source.id,
                    item_id: item.id.clone(),
                    name: item.name.clone(),
                    link: item.link.clone(),
                    discovered_at,
                });
            }
        }

        self.registry.mark_checked(source.id, started_at).await?;
        Ok(new_items)
    }
}

fn count(n: usize) -> u32 {
    u32::try_from(n).unwrap_or(u32::MAX)
}
