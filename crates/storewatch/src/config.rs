//! TOML configuration parsing and validation.
//!
//! Every section except `[db]` is optional; missing keys take the defaults
//! below. [`load_config`] rejects values the scheduler cannot run with.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub fetcher: FetcherConfig,
    #[serde(default)]
    pub notifier: NotifierConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    /// `sqlite` or `memory`.
    #[serde(default = "default_backend")]
    pub backend: String,
    #[serde(default = "default_db_path")]
    pub path: PathBuf,
}

fn default_backend() -> String {
    "sqlite".to_string()
}
fn default_db_path() -> PathBuf {
    PathBuf::from("./data/storewatch.sqlite")
}

#[derive(Debug, Deserialize, Clone)]
pub struct SchedulerConfig {
    #[serde(default = "default_tick_secs")]
    pub tick_secs: u64,
    /// Window after a run during which external cycle triggers are refused.
    #[serde(default = "default_min_trigger_spacing_secs")]
    pub min_trigger_spacing_secs: u64,
    /// Floor applied to `seconds`/`minutes` check intervals.
    #[serde(default = "default_min_interval_secs")]
    pub min_interval_secs: u64,
    /// A lock holder older than this is assumed dead and may be replaced.
    #[serde(default = "default_lock_stale_secs")]
    pub lock_stale_secs: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick_secs: default_tick_secs(),
            min_trigger_spacing_secs: default_min_trigger_spacing_secs(),
            min_interval_secs: default_min_interval_secs(),
            lock_stale_secs: default_lock_stale_secs(),
        }
    }
}

fn default_tick_secs() -> u64 {
    60
}
fn default_min_trigger_spacing_secs() -> u64 {
    30
}
fn default_min_interval_secs() -> u64 {
    1
}
fn default_lock_stale_secs() -> u64 {
    600
}

#[derive(Debug, Deserialize, Clone)]
pub struct FetcherConfig {
    #[serde(default = "default_fetch_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

impl Default for FetcherConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_fetch_timeout_secs(),
            user_agent: default_user_agent(),
        }
    }
}

fn default_fetch_timeout_secs() -> u64 {
    15
}
fn default_user_agent() -> String {
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct NotifierConfig {
    /// Webhook endpoint. Falls back to `SLACK_WEBHOOK_URL` when unset.
    #[serde(default)]
    pub webhook_url: Option<String>,
    #[serde(default = "default_notify_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for NotifierConfig {
    fn default() -> Self {
        Self {
            webhook_url: None,
            timeout_secs: default_notify_timeout_secs(),
        }
    }
}

fn default_notify_timeout_secs() -> u64 {
    10
}

impl DbConfig {
    pub fn is_memory(&self) -> bool {
        self.backend == "memory"
    }
}

impl NotifierConfig {
    /// The configured webhook URL, or the `SLACK_WEBHOOK_URL` environment
    /// variable when the config leaves it unset.
    pub fn resolved_webhook_url(&self) -> Option<String> {
        self.webhook_url
            .clone()
            .or_else(|| std::env::var("SLACK_WEBHOOK_URL").ok())
            .filter(|u| !u.trim().is_empty())
    }
}

impl Config {
    /// An in-memory configuration with defaults everywhere, for tests and
    /// ad-hoc runs without a config file.
    pub fn minimal() -> Self {
        Self {
            db: DbConfig {
                backend: "memory".to_string(),
                path: default_db_path(),
            },
            scheduler: SchedulerConfig::default(),
            fetcher: FetcherConfig::default(),
            notifier: NotifierConfig::default(),
        }
    }
}

/// Read and validate a TOML config file.
///
/// # Arguments
///
/// * `path`: the file to read, usually `--config` from the CLI.
///
/// # Errors
///
/// Returns an error if the file cannot be read or parsed, names an unknown
/// db backend, sets a zero tick, interval floor, lock timeout or send
/// timeout, or carries an invalid webhook URL.
pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

fn validate(config: &Config) -> Result<()> {
    match config.db.backend.as_str() {
        "sqlite" | "memory" => {}
        other => anyhow::bail!(
            "Unknown db backend: '{}'. Must be sqlite or memory.",
            other
        ),
    }

    if config.scheduler.tick_secs == 0 {
        anyhow::bail!("scheduler.tick_secs must be > 0");
    }
    if config.scheduler.min_interval_secs == 0 {
        anyhow::bail!("scheduler.min_interval_secs must be > 0");
    }
    if config.scheduler.lock_stale_secs == 0 {
        anyhow::bail!("scheduler.lock_stale_secs must be > 0");
    }

    if config.fetcher.timeout_secs == 0 {
        anyhow::bail!("fetcher.timeout_secs must be > 0");
    }
    if config.notifier.timeout_secs == 0 {
        anyhow::bail!("notifier.timeout_secs must be > 0");
    }

    if let Some(url) = &config.notifier.webhook_url {
        url::Url::parse(url)
            .with_context(|| format!("notifier.webhook_url is not a valid URL: {}", url))?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(toml_src: &str) -> Result<Config> {
        let config: Config = toml::from_str(toml_src)?;
        validate(&config)?;
        Ok(config)
    }

    #[test]
    fn test_defaults() {
        let cfg = parse("[db]\npath = \"/tmp/sw.sqlite\"\n").unwrap();
        assert_eq!(cfg.db.backend, "sqlite");
        assert_eq!(cfg.scheduler.tick_secs, 60);
        assert_eq!(cfg.scheduler.min_trigger_spacing_secs, 30);
        assert_eq!(cfg.scheduler.min_interval_secs, 1);
        assert_eq!(cfg.scheduler.lock_stale_secs, 600);
        assert_eq!(cfg.fetcher.timeout_secs, 15);
        assert_eq!(cfg.notifier.timeout_secs, 10);
        assert!(cfg.notifier.webhook_url.is_none());
    }

    #[test]
    fn test_rejects_unknown_backend() {
        assert!(parse("[db]\nbackend = \"postgres\"\n").is_err());
    }

    #[test]
    fn test_rejects_zero_tick() {
        assert!(parse("[db]\n[scheduler]\ntick_secs = 0\n").is_err());
    }

    #[test]
    fn test_rejects_zero_lock_timeout() {
        assert!(parse("[db]\n[scheduler]\nlock_stale_secs = 0\n").is_err());
    }

    #[test]
    fn test_rejects_bad_webhook_url() {
        assert!(parse("[db]\n[notifier]\nwebhook_url = \"not a url\"\n").is_err());
    }

    #[test]
    fn test_explicit_webhook_wins() {
        let cfg = parse("[db]\n[notifier]\nwebhook_url = \"https://hooks.example.com/x\"\n").unwrap();
        assert_eq!(
            cfg.notifier.resolved_webhook_url().as_deref(),
            Some("https://hooks.example.com/x")
        );
    }
}
