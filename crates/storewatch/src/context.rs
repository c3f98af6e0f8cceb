//! Application context: everything a cycle needs, built once at startup.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use storewatch_core::store::Store;
use tracing::info;

use crate::config::Config;
use crate::db;
use crate::fetcher::FetcherRegistry;
use crate::lock::SchedulerLock;
use crate::notifier::{LogNotifier, Notifier, WebhookNotifier};
use crate::pipeline::CheckPipeline;
use crate::registry::SourceRegistry;

pub struct AppContext {
    pub config: Config,
    pub registry: SourceRegistry,
    pub pipeline: CheckPipeline,
    pub notifier: Arc<dyn Notifier>,
    pub lock: SchedulerLock,
}

impl AppContext {
    /// Open the configured store and build the HTTP fetchers and notifier.
    ///
    /// # Errors
    ///
    /// Fails if the store cannot be opened, the HTTP client cannot be built,
    /// or the webhook URL is invalid.
    pub async fn from_config(config: Config) -> Result<Self> {
        let store = db::open_store(&config).await?;
        let fetchers = FetcherRegistry::http(&config.fetcher)?;
        let notifier = build_notifier(&config)?;
        Ok(Self::with_parts(config, store, fetchers, notifier))
    }

    /// Assemble a context from explicit parts. Tests use this to inject
    /// fake fetchers and notifiers.
    pub fn with_parts(
        config: Config,
        store: Arc<dyn Store>,
        fetchers: FetcherRegistry,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        let floor = chrono::Duration::seconds(
            i64::try_from(config.scheduler.min_interval_secs).unwrap_or(i64::MAX),
        );
        let fetch_timeout = Duration::from_secs(config.fetcher.timeout_secs);
        let registry = SourceRegistry::new(Arc::clone(&store), floor)
            .with_page_titles(fetchers.clone(), fetch_timeout);
        let pipeline = CheckPipeline::new(
            registry.clone(),
            fetchers,
            notifier.clone(),
            fetch_timeout,
            Duration::from_secs(config.notifier.timeout_secs),
        );
        let stale_after = chrono::Duration::seconds(
            i64::try_from(config.scheduler.lock_stale_secs).unwrap_or(i64::MAX),
        );
        Self {
            config,
            registry,
            pipeline,
            notifier,
            lock: SchedulerLock::new(store, stale_after),
        }
    }
}

fn build_notifier(config: &Config) -> Result<Arc<dyn Notifier>> {
    match config.notifier.resolved_webhook_url() {
        Some(url) => {
            info!("new apps will be posted to the configured webhook");
            Ok(Arc::new(WebhookNotifier::new(
                url,
                Duration::from_secs(config.notifier.timeout_secs),
            )?))
        }
        None => {
            info!("no webhook configured; new apps will only be logged");
            Ok(Arc::new(LogNotifier))
        }
    }
}
