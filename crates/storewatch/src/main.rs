//! # storewatch CLI
//!
//! ```bash
//! storewatch --config ./config/storewatch.toml <command>
//! ```
//!
//! | Command | Description |
//! |---------|-------------|
//! | `storewatch init` | Create the SQLite database and run migrations |
//! | `storewatch add <url>` | Register a listing page |
//! | `storewatch preview <url>` | Detected kind and name, without registering |
//! | `storewatch list` | List sources, newest first |
//! | `storewatch remove <id>` | Delete a source with its items and sessions |
//! | `storewatch interval <id> <value> <unit>` | Change one source's interval |
//! | `storewatch bulk-interval --ids 1,2 <value> <unit>` | Change several at once |
//! | `storewatch items <id>` | Apps discovered on a source |
//! | `storewatch check <id>` | Check one source now |
//! | `storewatch check-all` | Check every source now |
//! | `storewatch run-due` | Check every due source now |
//! | `storewatch serve` | Run the scheduler until Ctrl-C |
//! | `storewatch status` | Next check times and lock state |
//! | `storewatch stats` | Store-wide counters |
//! | `storewatch sessions` | Check session log |
//! | `storewatch webhook-test` | Send a test notification |

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use serde::Serialize;
use storewatch::config::{self, Config};
use storewatch::context::AppContext;
use storewatch::migrate;
use storewatch::registry::SourceRequest;
use storewatch::report::{self, format_wait};
use storewatch::scheduler::{CycleReport, Scheduler, SourceResult};
use storewatch_core::interval::CheckInterval;
use storewatch_core::models::StoreKind;
use tracing_subscriber::EnvFilter;

/// storewatch: get notified when new apps appear on store listing pages.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/storewatch.example.toml`.
#[derive(Parser)]
#[command(name = "storewatch", version, about)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/storewatch.toml")]
    config: PathBuf,

    /// Print machine-readable JSON instead of text.
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the database schema. Safe to run repeatedly.
    Init,

    /// Register a listing page to watch.
    Add {
        url: String,

        /// Display name. Taken from the page title, then the URL, when omitted.
        #[arg(long)]
        name: Option<String>,

        /// `playstore` or `appstore`. Detected from the URL host when omitted.
        #[arg(long)]
        kind: Option<StoreKind>,

        /// Interval value.
        #[arg(long, default_value_t = 24)]
        every: i64,

        /// Interval unit: seconds, minutes, hours or days.
        #[arg(long, default_value = "hours")]
        unit: String,
    },

    /// Show the detected store kind and name for a URL without adding it.
    Preview { url: String },

    /// List tracked sources, newest first.
    List,

    /// Delete a source together with its discovered apps and sessions.
    Remove { id: i64 },

    /// Change the check interval of one source.
    Interval { id: i64, value: i64, unit: String },

    /// Apply one check interval to several sources.
    BulkInterval {
        /// Comma-separated source ids.
        #[arg(long, value_delimiter = ',', required = true)]
        ids: Vec<i64>,
        value: i64,
        unit: String,
    },

    /// Show apps discovered on a source.
    Items { id: i64 },

    /// Check one source now, whether or not it is due.
    Check { id: i64 },

    /// Check every source now, whether or not it is due.
    CheckAll,

    /// Check every due source now.
    RunDue,

    /// Run the scheduler in the foreground until Ctrl-C.
    Serve,

    /// Show when each source is next checked and whether a cycle is running.
    Status,

    /// Show store-wide counters.
    Stats,

    /// Show the check session log, newest first.
    Sessions {
        /// Only sessions for this source.
        #[arg(long)]
        source: Option<i64>,

        #[arg(long, default_value_t = 20)]
        limit: usize,
    },

    /// Send a test payload through the configured notifier.
    WebhookTest,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("storewatch=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;
    let json = cli.json;

    match cli.command {
        Commands::Init => init(&cfg).await?,
        Commands::Preview { url } => {
            let ctx = open(&cfg).await?;
            let preview = ctx.registry.preview(&url).await?;
            if json {
                print_json(&preview)?;
            } else {
                println!("Kind: {}", preview.kind.label());
                println!(
                    "Name: {} ({})",
                    preview.name,
                    if preview.name_from_page {
                        "from page"
                    } else {
                        "from URL"
                    }
                );
            }
        }
        Commands::Add {
            url,
            name,
            kind,
            every,
            unit,
        } => {
            let ctx = open(&cfg).await?;
            let interval = CheckInterval::parse(every, &unit)?;
            let source = ctx
                .registry
                .register(SourceRequest {
                    name,
                    url,
                    kind,
                    interval,
                })
                .await?;
            if json {
                print_json(&source)?;
            } else {
                println!(
                    "Added source {} \"{}\" ({}, every {})",
                    source.id, source.name, source.kind, source.interval
                );
            }
        }
        Commands::List => {
            let ctx = open(&cfg).await?;
            let sources = ctx.registry.list().await?;
            if json {
                print_json(&sources)?;
            } else if sources.is_empty() {
                println!("No sources. Add one with `storewatch add <url>`.");
            } else {
                for s in &sources {
                    let last = s
                        .last_checked
                        .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
                        .unwrap_or_else(|| "never".to_string());
                    println!(
                        "{:>4}  {:<9}  {:<12}  last: {:<19}  {}",
                        s.id,
                        s.kind.as_str(),
                        s.interval.to_string(),
                        last,
                        s.name
                    );
                    println!("      {}", s.url);
                }
            }
        }
        Commands::Remove { id } => {
            let ctx = open(&cfg).await?;
            ctx.registry.remove(id).await?;
            println!("Removed source {}.", id);
        }
        Commands::Interval { id, value, unit } => {
            let ctx = open(&cfg).await?;
            let interval = ctx.registry.set_interval(id, value, &unit).await?;
            println!("Source {} now checked every {}.", id, interval);
        }
        Commands::BulkInterval { ids, value, unit } => {
            let ctx = open(&cfg).await?;
            let updated = ctx.registry.set_interval_many(&ids, value, &unit).await?;
            println!("Updated {} of {} sources.", updated, ids.len());
        }
        Commands::Items { id } => {
            let ctx = open(&cfg).await?;
            let items = ctx.registry.items(id).await?;
            if json {
                print_json(&items)?;
            } else {
                println!("{} apps discovered", items.len());
                for item in &items {
                    println!(
                        "  {}  {}  {}",
                        item.discovered_at.format("%Y-%m-%d %H:%M"),
                        item.name,
                        item.link
                    );
                }
            }
        }
        Commands::Check { id } => {
            let ctx = open(&cfg).await?;
            let report = Scheduler::new(ctx.clone()).check_one(id).await;
            print_cycle(&report, json)?;
        }
        Commands::CheckAll => {
            let ctx = open(&cfg).await?;
            let report = Scheduler::new(ctx.clone()).check_all().await;
            print_cycle(&report, json)?;
        }
        Commands::RunDue => {
            let ctx = open(&cfg).await?;
            let report = Scheduler::new(ctx.clone()).run_due_now().await;
            print_cycle(&report, json)?;
        }
        Commands::Serve => {
            let ctx = open(&cfg).await?;
            let scheduler = Scheduler::new(ctx.clone());
            scheduler
                .run(async {
                    if let Err(e) = tokio::signal::ctrl_c().await {
                        tracing::error!(error = %e, "failed to listen for Ctrl-C");
                        std::future::pending::<()>().await;
                    }
                })
                .await;
        }
        Commands::Status => {
            let ctx = open(&cfg).await?;
            let status = report::status(&ctx, Utc::now()).await?;
            if json {
                print_json(&status)?;
            } else {
                match (&status.lock.holder, status.lock.last_run) {
                    (Some(holder), _) if status.lock.held => {
                        println!("Cycle in progress ({})", holder)
                    }
                    (_, Some(last)) => println!("Idle, last cycle finished {}", last),
                    (_, None) => println!("Idle, no cycle run yet"),
                }
                println!(
                    "{} sources, {} due",
                    status.sources.len(),
                    status.due_count()
                );
                for s in &status.sources {
                    let when = if s.due {
                        "due now".to_string()
                    } else {
                        format!("in {}", format_wait(s.seconds_until_next))
                    };
                    println!("{:>4}  {:<12}  {:<14}  {}", s.id, s.interval, when, s.name);
                }
            }
        }
        Commands::Stats => {
            let ctx = open(&cfg).await?;
            let stats = report::stats(&ctx, Utc::now()).await?;
            if json {
                print_json(&stats)?;
            } else {
                println!("Sources:        {}", stats.total_sources);
                println!("Apps tracked:   {}", stats.total_items);
                println!("Check sessions: {}", stats.total_sessions);
                println!(
                    "New apps (last {}h): {}",
                    report::RECENT_WINDOW_HOURS,
                    stats.new_items_since
                );
            }
        }
        Commands::Sessions { source, limit } => {
            let ctx = open(&cfg).await?;
            let sessions = report::sessions(&ctx, source, limit).await?;
            if json {
                print_json(&sessions)?;
            } else {
                for s in &sessions {
                    println!(
                        "{}  source {:>4}  {:<9}  found {:>4}  new {:>3}  {}",
                        s.started_at.format("%Y-%m-%d %H:%M:%S"),
                        s.source_id,
                        s.status.as_str(),
                        s.items_found,
                        s.new_items_found,
                        s.id
                    );
                }
            }
        }
        Commands::WebhookTest => {
            let ctx = open(&cfg).await?;
            ctx.notifier
                .test()
                .await
                .with_context(|| format!("{} test failed", ctx.notifier.channel_name()))?;
            println!("Test notification sent via {}.", ctx.notifier.channel_name());
        }
    }

    Ok(())
}

async fn open(cfg: &Config) -> Result<Arc<AppContext>> {
    Ok(Arc::new(AppContext::from_config(cfg.clone()).await?))
}

async fn init(cfg: &Config) -> Result<()> {
    if cfg.db.is_memory() {
        bail!("db.backend is \"memory\"; there is no database to initialize");
    }
    migrate::run_migrations(cfg).await?;
    println!("Database initialized at {}.", cfg.db.path.display());
    Ok(())
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn print_cycle(report: &CycleReport, json: bool) -> Result<()> {
    if json {
        return print_json(report);
    }
    match report {
        CycleReport::AlreadyRunning { holder } => {
            println!("A check cycle is already running ({}); try again later.", holder)
        }
        CycleReport::TooFrequent { next_allowed, .. } => {
            let wait = (*next_allowed - Utc::now()).num_seconds();
            println!(
                "Last cycle finished too recently; try again in {}.",
                format_wait(wait)
            )
        }
        CycleReport::NoSourcesDue { total_sources } => {
            println!("No sources due ({} tracked).", total_sources)
        }
        CycleReport::Aborted { error } => bail!("cycle aborted: {}", error),
        CycleReport::Completed(summary) => {
            for result in &summary.results {
                match result {
                    SourceResult::Checked {
                        source_id,
                        source_name,
                        total_items,
                        new_items,
                        failed_notifications,
                        ..
                    } => {
                        print!(
                            "{:>4}  {}: {} apps, {} new",
                            source_id, source_name, total_items, new_items
                        );
                        if *failed_notifications > 0 {
                            print!(" ({} notifications failed)", failed_notifications);
                        }
                        println!();
                    }
                    SourceResult::Failed {
                        source_id,
                        source_name,
                        error,
                        ..
                    } => println!(
                        "{:>4}  {}: FAILED {}",
                        source_id,
                        source_name.as_deref().unwrap_or("?"),
                        error
                    ),
                }
            }
            println!(
                "{} checked, {} failed, {} new apps",
                summary.sources_checked, summary.sources_failed, summary.total_new_items
            );
        }
    }
    Ok(())
}
