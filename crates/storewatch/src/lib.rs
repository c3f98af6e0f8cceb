//! # storewatch
//!
//! **Watches Google Play and App Store listing pages for newly published apps.**
//!
//! Users register listing pages (a developer page, a category, a search
//! result) as *sources*, each with its own check interval. A background
//! scheduler fetches every due source, diffs the listed apps against what it
//! has seen before, stores the new ones, and posts one webhook message per
//! newly discovered app.
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────┐   ┌────────────┐   ┌───────────────┐   ┌──────────┐
//! │ Scheduler │──▶│  Pipeline  │──▶│ Store (trait) │   │ Notifier │
//! │ tick/lock │   │ fetch+diff │   │ SQLite / mem  │   │ webhook  │
//! └─────┬─────┘   └─────┬──────┘   └───────────────┘   └────▲─────┘
//!       │               └────────────────────────────────────┘
//!       ▼
//!   ┌──────┐
//!   │ CLI  │  add / list / check / run-due / serve / status ...
//!   └──────┘
//! ```
//!
//! ## Modules
//!
//! | Module | Role |
//! |--------|------|
//! | [`config`] | TOML configuration and defaults |
//! | [`db`], [`migrate`], [`sqlite_store`] | SQLite backend |
//! | [`registry`] | Validated source management and due-set selection |
//! | [`fetcher`] | Per-store listing fetch strategies |
//! | [`notifier`] | Webhook and log notification channels |
//! | [`pipeline`] | One check of one source |
//! | [`lock`] | Single-flight lock with trigger spacing |
//! | [`scheduler`] | Tick loop and manual triggers |
//! | [`context`] | Wiring of the above, built once at startup |
//! | [`report`] | Status, stats, and session views |
//!
//! Runtime-free logic (models, interval maths, URL heuristics, the
//! in-memory store) lives in the `storewatch-core` crate.

pub mod config;
pub mod context;
pub mod db;
pub mod fetcher;
pub mod lock;
pub mod migrate;
pub mod notifier;
pub mod pipeline;
pub mod registry;
pub mod report;
pub mod scheduler;
pub mod sqlite_store;
