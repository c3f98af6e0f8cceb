//! Cycle driver: the background tick loop and the manual trigger entrypoints.
//!
//! Every entrypoint goes through the same [`SchedulerLock`](crate::lock::SchedulerLock),
//! whose state is kept in the store, so at most one cycle (scheduled or
//! triggered, from this process or another) runs at a time. Sources in a
//! cycle are checked one after another; a failing source is recorded in the
//! report and the cycle moves on.
//!
//! | Entrypoint | Sources | Spacing guard |
//! |------------|---------|---------------|
//! | [`tick`](Scheduler::tick) | due | no |
//! | [`run_due_now`](Scheduler::run_due_now) | due | yes |
//! | [`check_all`](Scheduler::check_all) | all | yes |
//! | [`check_one`](Scheduler::check_one) | one by id | no |

use std::future::Future;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use storewatch_core::error::WatchError;
use storewatch_core::models::Source;
use tokio::time::MissedTickBehavior;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::context::AppContext;
use crate::lock::{LockGuard, Refusal};
use crate::pipeline::CheckOutcome;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Trigger {
    Scheduled,
    RunDue,
    CheckAll,
    CheckOne,
}

/// Outcome of one pipeline run inside a cycle.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum SourceResult {
    Checked {
        source_id: i64,
        source_name: String,
        total_items: usize,
        new_items: usize,
        session_id: String,
        failed_notifications: usize,
    },
    Failed {
        source_id: i64,
        source_name: Option<String>,
        error_kind: &'static str,
        error: String,
    },
}

impl SourceResult {
    fn checked(outcome: &CheckOutcome) -> Self {
        SourceResult::Checked {
            source_id: outcome.source_id,
            source_name: outcome.source_name.clone(),
            total_items: outcome.total_items,
            new_items: outcome.new_items_count,
            session_id: outcome.session_id.clone(),
            failed_notifications: outcome.failed_notifications(),
        }
    }

    fn failed(source_id: i64, source_name: Option<String>, err: &WatchError) -> Self {
        SourceResult::Failed {
            source_id,
            source_name,
            error_kind: err.kind(),
            error: err.to_string(),
        }
    }

    pub fn is_ok(&self) -> bool {
        matches!(self, SourceResult::Checked { .. })
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CycleSummary {
    pub run_id: String,
    pub trigger: Trigger,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub sources_checked: usize,
    pub sources_failed: usize,
    pub total_new_items: usize,
    pub results: Vec<SourceResult>,
}

/// Structured result of a cycle or trigger. Never an error: refusals and
/// per-source failures are reported here.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum CycleReport {
    AlreadyRunning {
        holder: String,
    },
    TooFrequent {
        last_run: DateTime<Utc>,
        next_allowed: DateTime<Utc>,
    },
    NoSourcesDue {
        total_sources: usize,
    },
    /// The source list or the lock row could not be read.
    Aborted {
        error: String,
    },
    Completed(CycleSummary),
}

impl CycleReport {
    fn refused(refusal: Refusal) -> Self {
        match refusal {
            Refusal::Busy { holder } => CycleReport::AlreadyRunning { holder },
            Refusal::TooSoon {
                last_run,
                next_allowed,
            } => CycleReport::TooFrequent {
                last_run,
                next_allowed,
            },
            Refusal::Unavailable(error) => CycleReport::Aborted { error },
        }
    }
}

enum Selection {
    Due,
    All,
}

#[derive(Clone)]
pub struct Scheduler {
    ctx: Arc<AppContext>,
}

impl Scheduler {
    /// # Arguments
    ///
    /// * `ctx`: shared application context; its lock, pipeline and
    ///   registry are used by every entrypoint.
    pub fn new(ctx: Arc<AppContext>) -> Self {
        Self { ctx }
    }

    pub fn context(&self) -> &Arc<AppContext> {
        &self.ctx
    }

    fn min_spacing(&self) -> Duration {
        Duration::seconds(
            i64::try_from(self.ctx.config.scheduler.min_trigger_spacing_secs).unwrap_or(i64::MAX),
        )
    }

    /// One scheduled cycle: check every due source. Skips if a cycle is
    /// already in progress.
    pub async fn tick(&self) -> CycleReport {
        let run_id = new_run_id();
        match self.ctx.lock.try_acquire(&run_id).await {
            Ok(guard) => self.run_cycle(guard, Trigger::Scheduled, Selection::Due).await,
            Err(refusal) => {
                info!(run_id = %run_id, refusal = ?refusal, "skipping tick");
                CycleReport::refused(refusal)
            }
        }
    }

    /// Externally triggered due-set run. Refused with
    /// [`CycleReport::TooFrequent`] within `min_trigger_spacing_secs` of the
    /// last completed cycle.
    pub async fn run_due_now(&self) -> CycleReport {
        self.spaced_trigger(Trigger::RunDue, Selection::Due).await
    }

    /// Externally triggered check of every source, due or not.
    pub async fn check_all(&self) -> CycleReport {
        self.spaced_trigger(Trigger::CheckAll, Selection::All).await
    }

    /// Externally triggered check of a single source, due or not.
    pub async fn check_one(&self, source_id: i64) -> CycleReport {
        let run_id = new_run_id();
        let guard = match self.ctx.lock.try_acquire(&run_id).await {
            Ok(guard) => guard,
            Err(refusal) => return CycleReport::refused(refusal),
        };

        let started_at = Utc::now();
        let result = match self.ctx.pipeline.check_by_id(source_id).await {
            Ok(outcome) => SourceResult::checked(&outcome),
            Err(e) => {
                warn!(run_id = %run_id, source_id, error = %e, "manual check failed");
                SourceResult::failed(source_id, None, &e)
            }
        };
        let report = summarize(&run_id, Trigger::CheckOne, started_at, vec![result]);
        guard.release().await;
        report
    }

    async fn spaced_trigger(&self, trigger: Trigger, selection: Selection) -> CycleReport {
        let run_id = new_run_id();
        match self
            .ctx
            .lock
            .try_acquire_spaced(&run_id, self.min_spacing(), Utc::now())
            .await
        {
            Ok(guard) => self.run_cycle(guard, trigger, selection).await,
            Err(refusal) => {
                info!(run_id = %run_id, trigger = ?trigger, refusal = ?refusal, "trigger refused");
                CycleReport::refused(refusal)
            }
        }
    }

    async fn run_cycle(
        &self,
        guard: LockGuard,
        trigger: Trigger,
        selection: Selection,
    ) -> CycleReport {
        let run_id = guard.holder().to_string();
        let report = self.cycle(&run_id, trigger, selection).await;
        guard.release().await;
        report
    }

    async fn cycle(&self, run_id: &str, trigger: Trigger, selection: Selection) -> CycleReport {
        let started_at = Utc::now();

        let sources = match self.select(&selection, started_at).await {
            Ok(sources) => sources,
            Err(e) => {
                error!(run_id = %run_id, error = %e, "could not load sources");
                return CycleReport::Aborted {
                    error: e.to_string(),
                };
            }
        };

        if sources.is_empty() {
            let total_sources = match selection {
                Selection::All => 0,
                Selection::Due => self
                    .ctx
                    .registry
                    .list()
                    .await
                    .map(|all| all.len())
                    .unwrap_or_default(),
            };
            info!(run_id = %run_id, total_sources, "no sources due");
            return CycleReport::NoSourcesDue { total_sources };
        }

        info!(run_id = %run_id, trigger = ?trigger, sources = sources.len(), "cycle started");
        let mut results = Vec::with_capacity(sources.len());
        for source in &sources {
            let result = match self.ctx.pipeline.check(source).await {
                Ok(outcome) => SourceResult::checked(&outcome),
                Err(e) => {
                    warn!(run_id = %run_id, source_id = source.id, error = %e, "source check failed");
                    SourceResult::failed(source.id, Some(source.name.clone()), &e)
                }
            };
            results.push(result);
        }

        let report = summarize(run_id, trigger, started_at, results);
        if let CycleReport::Completed(summary) = &report {
            info!(
                run_id = %run_id,
                checked = summary.sources_checked,
                failed = summary.sources_failed,
                new_items = summary.total_new_items,
                "cycle finished"
            );
        }
        report
    }

    async fn select(
        &self,
        selection: &Selection,
        now: DateTime<Utc>,
    ) -> storewatch_core::Result<Vec<Source>> {
        match selection {
            Selection::Due => self.ctx.registry.due_sources(now).await,
            Selection::All => self.ctx.registry.list().await,
        }
    }

    /// Run a cycle immediately, then every `scheduler.tick_secs`, until
    /// `shutdown` resolves.
    ///
    /// Each cycle runs in its own task so that a panic inside one check is
    /// contained; the dropped lock guard schedules its release while the
    /// task unwinds.
    pub async fn run(&self, shutdown: impl Future<Output = ()>) {
        let period = std::time::Duration::from_secs(self.ctx.config.scheduler.tick_secs);
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        tokio::pin!(shutdown);

        info!(tick_secs = period.as_secs(), "scheduler started");
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let scheduler = self.clone();
                    if let Err(e) = tokio::spawn(async move { scheduler.tick().await }).await {
                        error!(error = %e, "scheduler cycle panicked");
                    }
                }
                _ = &mut shutdown => {
                    info!("scheduler stopping");
                    break;
                }
            }
        }
    }
}

fn new_run_id() -> String {
    let id = Uuid::new_v4().simple().to_string();
    format!("run-{}", &id[..8])
}

fn summarize(
    run_id: &str,
    trigger: Trigger,
    started_at: DateTime<Utc>,
    results: Vec<SourceResult>,
) -> CycleReport {
    let sources_checked = results.iter().filter(|r| r.is_ok()).count();
    let total_new_items = results
        .iter()
        .map(|r| match r {
            SourceResult::Checked { new_items, .. } => *new_items,
            SourceResult::Failed { .. } => 0,
        })
        .sum();
    CycleReport::Completed(CycleSummary {
        run_id: run_id.to_string(),
        trigger,
        started_at,
        finished_at: Utc::now(),
        sources_checked,
        sources_failed: results.len() - sources_checked,
        total_new_items,
        results,
    })
}
