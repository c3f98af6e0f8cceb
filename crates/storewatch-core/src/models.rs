//! Core data models used throughout storewatch.
//!
//! These types represent the tracked sources, the items discovered on them,
//! and the audit trail of check sessions that flow through the check pipeline.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::WatchError;
use crate::interval::CheckInterval;

/// The kind of store a listing page belongs to.
///
/// Selects the fetch strategy and drives the category and naming heuristics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreKind {
    Playstore,
    Appstore,
}

impl StoreKind {
    pub const ALL: [StoreKind; 2] = [StoreKind::Playstore, StoreKind::Appstore];

    pub fn as_str(&self) -> &'static str {
        match self {
            StoreKind::Playstore => "playstore",
            StoreKind::Appstore => "appstore",
        }
    }

    /// Human-readable store name, e.g. `"Play Store"`.
    pub fn label(&self) -> &'static str {
        match self {
            StoreKind::Playstore => "Play Store",
            StoreKind::Appstore => "App Store",
        }
    }
}

impl fmt::Display for StoreKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StoreKind {
    type Err = WatchError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "playstore" => Ok(StoreKind::Playstore),
            "appstore" => Ok(StoreKind::Appstore),
            other => Err(WatchError::validation(format!(
                "unknown store kind '{}': must be playstore or appstore",
                other
            ))),
        }
    }
}

/// A tracked store listing page.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Source {
    pub id: i64,
    pub name: String,
    pub url: String,
    pub kind: StoreKind,
    pub interval: CheckInterval,
    /// `None` means never checked, which is always due.
    pub last_checked: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// A validated source ready to be stored.
#[derive(Debug, Clone)]
pub struct NewSource {
    pub name: String,
    pub url: String,
    pub kind: StoreKind,
    pub interval: CheckInterval,
    pub created_at: DateTime<Utc>,
}

/// Raw listing produced by a fetcher before diffing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FetchedItem {
    pub id: String,
    pub name: String,
    pub link: String,
}

/// A listing discovered on a source and persisted in the known set.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Item {
    pub source_id: i64,
    pub item_id: String,
    pub name: String,
    pub link: String,
    pub discovered_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Running,
    Completed,
    Failed,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Running => "running",
            SessionStatus::Completed => "completed",
            SessionStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SessionStatus {
    type Err = WatchError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "running" => Ok(SessionStatus::Running),
            "completed" => Ok(SessionStatus::Completed),
            "failed" => Ok(SessionStatus::Failed),
            other => Err(WatchError::persistence(format!(
                "unknown session status '{}'",
                other
            ))),
        }
    }
}

/// Audit record of one check pipeline run against one source.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CheckSession {
    pub id: String,
    pub source_id: i64,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub status: SessionStatus,
    pub items_found: u32,
    pub new_items_found: u32,
}

/// Aggregate counters across the whole store.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StoreStats {
    pub total_sources: u64,
    pub total_items: u64,
    pub total_sessions: u64,
    /// Sum of `new_items_found` over sessions started after the `since` cutoff.
    pub new_items_since: u64,
}

/// Persisted state of the scheduler lock row.
///
/// `holder` is set while a cycle runs; `last_run` is stamped on every
/// release and drives the spacing guard for manual triggers.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct LockRecord {
    pub holder: Option<String>,
    pub acquired_at: Option<DateTime<Utc>>,
    pub last_run: Option<DateTime<Utc>>,
}

/// Result of a conditional lock acquisition against the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LockAttempt {
    Acquired,
    /// The row was left untouched; carries its state at the time of the attempt.
    Refused(LockRecord),
}
