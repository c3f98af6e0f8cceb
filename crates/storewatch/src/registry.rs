//! Source registry: validated management of tracked listing pages.
//!
//! Wraps a [`Store`] with the rules the raw backend does not know about:
//! URL and interval validation, store-kind detection, display-name
//! derivation, and due-set selection against the configured interval floor.
//!
//! A source registered without a name is named from its page title, fetched
//! through the [`FetcherRegistry`] under the fetch timeout. When that fails
//! or yields nothing, the name comes from the URL, and failing that from the
//! store label and today's date.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use storewatch_core::error::{Result, WatchError};
use storewatch_core::interval::{self, CheckInterval};
use storewatch_core::models::{Item, NewSource, Source, StoreKind};
use storewatch_core::naming::{derive_name, detect_kind};
use storewatch_core::store::Store;
use tracing::{debug, info, warn};
use url::Url;

use crate::fetcher::FetcherRegistry;

/// Input for [`SourceRegistry::register`].
#[derive(Debug, Clone)]
pub struct SourceRequest {
    /// Derived from the page title, then the URL, when `None` or blank.
    pub name: Option<String>,
    pub url: String,
    /// Detected from the URL host when `None`.
    pub kind: Option<StoreKind>,
    pub interval: CheckInterval,
}

/// What [`SourceRegistry::register`] would store for a URL.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SourcePreview {
    pub url: String,
    pub kind: StoreKind,
    pub name: String,
    /// `false` when the name came from the URL or the dated fallback.
    pub name_from_page: bool,
}

#[derive(Clone)]
struct PageTitles {
    fetchers: FetcherRegistry,
    timeout: std::time::Duration,
}

#[derive(Clone)]
pub struct SourceRegistry {
    store: Arc<dyn Store>,
    interval_floor: Duration,
    titles: Option<PageTitles>,
}

impl SourceRegistry {
    /// A registry that names unnamed sources from their URL only.
    ///
    /// # Arguments
    ///
    /// * `store`: backend holding sources, items and sessions.
    /// * `interval_floor`: lower bound applied to seconds and minutes
    ///   intervals when selecting due sources.
    pub fn new(store: Arc<dyn Store>, interval_floor: Duration) -> Self {
        Self {
            store,
            interval_floor,
            titles: None,
        }
    }

    /// Look up page titles through `fetchers` when naming new sources, each
    /// lookup bounded by `timeout`.
    pub fn with_page_titles(
        mut self,
        fetchers: FetcherRegistry,
        timeout: std::time::Duration,
    ) -> Self {
        self.titles = Some(PageTitles { fetchers, timeout });
        self
    }

    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    pub fn interval_floor(&self) -> Duration {
        self.interval_floor
    }

    /// Validate and store a new source.
    ///
    /// # Errors
    ///
    /// - [`WatchError::Validation`] for a malformed or non-http(s) URL, or
    ///   when no kind is given and none can be detected from the host.
    /// - [`WatchError::DuplicateSource`] if the URL is already tracked.
    /// - [`WatchError::Persistence`] if the store write fails.
    ///
    /// A failed page-title lookup is not an error; the name falls back to
    /// URL heuristics.
    pub async fn register(&self, request: SourceRequest) -> Result<Source> {
        let url = validate_url(&request.url)?;
        let kind = resolve_kind(&url, request.kind)?;

        let now = Utc::now();
        let name = match request
            .name
            .map(|n| n.trim().to_string())
            .filter(|n| !n.is_empty())
        {
            Some(name) => name,
            None => self.resolve_name(&url, kind, now).await.0,
        };

        let source = self
            .store
            .create_source(&NewSource {
                name,
                url,
                kind,
                interval: request.interval,
                created_at: now,
            })
            .await?;

        info!(
            source_id = source.id,
            name = %source.name,
            kind = %source.kind,
            interval = %source.interval,
            "registered source"
        );
        Ok(source)
    }

    /// Detect the kind and name a URL would be registered with, without
    /// storing anything.
    ///
    /// # Errors
    ///
    /// [`WatchError::Validation`] under the same rules as
    /// [`register`](Self::register).
    pub async fn preview(&self, raw_url: &str) -> Result<SourcePreview> {
        let url = validate_url(raw_url)?;
        let kind = resolve_kind(&url, None)?;
        let (name, name_from_page) = self.resolve_name(&url, kind, Utc::now()).await;
        Ok(SourcePreview {
            url,
            kind,
            name,
            name_from_page,
        })
    }

    async fn resolve_name(
        &self,
        url: &str,
        kind: StoreKind,
        now: DateTime<Utc>,
    ) -> (String, bool) {
        match self.page_title(url, kind).await {
            Some(title) => (title, true),
            None => (derive_name(url, kind, now.date_naive()), false),
        }
    }

    async fn page_title(&self, url: &str, kind: StoreKind) -> Option<String> {
        let titles = self.titles.as_ref()?;
        let fetcher = titles.fetchers.get(kind)?;
        let title = match tokio::time::timeout(titles.timeout, fetcher.page_title(url)).await {
            Ok(Ok(title)) => title,
            Ok(Err(e)) => {
                warn!(url, fetcher = fetcher.name(), error = %e, "page title lookup failed");
                None
            }
            Err(_) => {
                warn!(
                    url,
                    fetcher = fetcher.name(),
                    timeout_secs = titles.timeout.as_secs(),
                    "page title lookup timed out"
                );
                None
            }
        };
        if title.is_none() {
            debug!(url, "no usable page title; naming from URL");
        }
        title
    }

    /// Delete a source together with its items and sessions.
    pub async fn remove(&self, id: i64) -> Result<()> {
        if !self.store.delete_source(id).await? {
            return Err(WatchError::SourceNotFound(id));
        }
        info!(source_id = id, "removed source");
        Ok(())
    }

    /// # Errors
    ///
    /// [`WatchError::Validation`] for a non-positive value or unknown unit,
    /// [`WatchError::SourceNotFound`] if `id` is not tracked.
    pub async fn set_interval(&self, id: i64, value: i64, unit: &str) -> Result<CheckInterval> {
        let interval = CheckInterval::parse(value, unit)?;
        if !self.store.update_interval(id, interval).await? {
            return Err(WatchError::SourceNotFound(id));
        }
        info!(source_id = id, interval = %interval, "updated check interval");
        Ok(interval)
    }

    /// Apply one interval to several sources. Validation happens once, up
    /// front; unknown ids are skipped. Returns how many sources were updated.
    pub async fn set_interval_many(&self, ids: &[i64], value: i64, unit: &str) -> Result<usize> {
        if ids.is_empty() {
            return Err(WatchError::validation("at least one source id is required"));
        }
        let interval = CheckInterval::parse(value, unit)?;

        let mut updated = 0;
        for &id in ids {
            if self.store.update_interval(id, interval).await? {
                updated += 1;
            } else {
                warn!(source_id = id, "skipping interval update for unknown source");
            }
        }
        info!(updated, requested = ids.len(), interval = %interval, "bulk interval update");
        Ok(updated)
    }

    /// All sources, newest first.
    pub async fn list(&self) -> Result<Vec<Source>> {
        self.store.list_sources().await
    }

    /// [`WatchError::SourceNotFound`] when `id` is not tracked.
    pub async fn get(&self, id: i64) -> Result<Source> {
        self.store
            .get_source(id)
            .await?
            .ok_or(WatchError::SourceNotFound(id))
    }

    /// Items discovered on a source, newest first.
    pub async fn items(&self, id: i64) -> Result<Vec<Item>> {
        self.get(id).await?;
        self.store.items_for_source(id).await
    }

    pub async fn mark_checked(&self, id: i64, at: DateTime<Utc>) -> Result<()> {
        if !self.store.mark_checked(id, at).await? {
            return Err(WatchError::SourceNotFound(id));
        }
        Ok(())
    }

    /// Sources due at `now`, read fresh from the store, in listing order.
    pub async fn due_sources(&self, now: DateTime<Utc>) -> Result<Vec<Source>> {
        let sources = self.store.list_sources().await?;
        Ok(interval::due_sources(sources, now, self.interval_floor))
    }

    pub fn next_check_at(&self, source: &Source) -> Option<DateTime<Utc>> {
        interval::next_check_at(source, self.interval_floor)
    }
}

fn resolve_kind(url: &str, requested: Option<StoreKind>) -> Result<StoreKind> {
    match requested {
        Some(kind) => Ok(kind),
        None => detect_kind(url).ok_or_else(|| {
            WatchError::validation(format!(
                "cannot detect store kind from {}; specify playstore or appstore",
                url
            ))
        }),
    }
}

fn validate_url(raw: &str) -> Result<String> {
    let trimmed = raw.trim();
    let parsed = Url::parse(trimmed)
        .map_err(|e| WatchError::validation(format!("invalid URL '{}': {}", trimmed, e)))?;
    match parsed.scheme() {
        "http" | "https" => Ok(trimmed.to_string()),
        other => Err(WatchError::validation(format!(
            "URL scheme must be http or https (got '{}')",
            other
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetcher::Fetcher;
    use async_trait::async_trait;
    use storewatch_core::models::FetchedItem;
    use storewatch_core::store::memory::InMemoryStore;

    enum Title {
        Found(&'static str),
        Missing,
        Broken,
        Hangs,
    }

    #[async_trait]
    impl Fetcher for Title {
        fn name(&self) -> &str {
            "title"
        }

        async fn fetch(&self, _url: &str, _kind: StoreKind) -> anyhow::Result<Vec<FetchedItem>> {
            Ok(vec![])
        }

        async fn page_title(&self, _url: &str) -> anyhow::Result<Option<String>> {
            match self {
                Title::Found(title) => Ok(Some(title.to_string())),
                Title::Missing => Ok(None),
                Title::Broken => Err(anyhow::anyhow!("connection reset")),
                Title::Hangs => {
                    tokio::time::sleep(std::time::Duration::from_secs(30)).await;
                    Ok(Some("too late".to_string()))
                }
            }
        }
    }

    fn titled_registry(title: Title) -> SourceRegistry {
        registry().with_page_titles(
            FetcherRegistry::uniform(Arc::new(title)),
            std::time::Duration::from_millis(50),
        )
    }

    fn registry() -> SourceRegistry {
        SourceRegistry::new(Arc::new(InMemoryStore::new()), Duration::seconds(1))
    }

    fn request(url: &str) -> SourceRequest {
        SourceRequest {
            name: None,
            url: url.to_string(),
            kind: None,
            interval: CheckInterval::parse(1, "hours").unwrap(),
        }
    }

    #[tokio::test]
    async fn test_register_detects_kind_and_name() {
        let reg = registry();
        let source = reg
            .register(request(
                "https://play.google.com/store/apps/category/GAME_PUZZLE",
            ))
            .await
            .unwrap();
        assert_eq!(source.kind, StoreKind::Playstore);
        assert_eq!(source.name, "Play Store Game Puzzle Category");
        assert!(source.last_checked.is_none());
    }

    #[tokio::test]
    async fn test_register_keeps_explicit_name() {
        let reg = registry();
        let mut req = request("https://apps.apple.com/us/developer/acme/id1");
        req.name = Some("  Acme  ".to_string());
        let source = reg.register(req).await.unwrap();
        assert_eq!(source.name, "Acme");
        assert_eq!(source.kind, StoreKind::Appstore);
    }

    #[tokio::test]
    async fn test_register_rejects_bad_input() {
        let reg = registry();
        assert!(matches!(
            reg.register(request("ftp://play.google.com/x")).await,
            Err(WatchError::Validation(_))
        ));
        assert!(matches!(
            reg.register(request("https://example.com/apps")).await,
            Err(WatchError::Validation(_))
        ));
        assert!(matches!(
            reg.register(request("definitely not a url")).await,
            Err(WatchError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn test_duplicate_url() {
        let reg = registry();
        let url = "https://play.google.com/store/apps/dev?id=42";
        reg.register(request(url)).await.unwrap();
        assert!(matches!(
            reg.register(request(url)).await,
            Err(WatchError::DuplicateSource { .. })
        ));
    }

    #[tokio::test]
    async fn test_set_interval_validation_and_missing() {
        let reg = registry();
        let s = reg
            .register(request("https://play.google.com/store/apps/dev?id=1"))
            .await
            .unwrap();

        assert!(matches!(
            reg.set_interval(s.id, 0, "minutes").await,
            Err(WatchError::Validation(_))
        ));
        assert!(matches!(
            reg.set_interval(s.id, 5, "fortnights").await,
            Err(WatchError::Validation(_))
        ));
        assert!(matches!(
            reg.set_interval(999, 5, "minutes").await,
            Err(WatchError::SourceNotFound(999))
        ));

        let updated = reg.set_interval(s.id, 5, "minutes").await.unwrap();
        assert_eq!(reg.get(s.id).await.unwrap().interval, updated);
    }

    #[tokio::test]
    async fn test_set_interval_many_skips_unknown() {
        let reg = registry();
        let a = reg
            .register(request("https://play.google.com/store/apps/dev?id=1"))
            .await
            .unwrap();
        let b = reg
            .register(request("https://play.google.com/store/apps/dev?id=2"))
            .await
            .unwrap();
        let updated = reg
            .set_interval_many(&[a.id, b.id, 404], 2, "days")
            .await
            .unwrap();
        assert_eq!(updated, 2);
        assert!(reg.set_interval_many(&[], 2, "days").await.is_err());
    }

    #[tokio::test]
    async fn test_due_sources_reads_fresh_state() {
        let reg = registry();
        let s = reg
            .register(request("https://play.google.com/store/apps/dev?id=1"))
            .await
            .unwrap();
        let now = Utc::now();
        assert_eq!(reg.due_sources(now).await.unwrap().len(), 1);

        reg.mark_checked(s.id, now).await.unwrap();
        assert!(reg.due_sources(now).await.unwrap().is_empty());

        // Shrinking the interval is honoured on the very next selection.
        reg.set_interval(s.id, 1, "seconds").await.unwrap();
        assert_eq!(
            reg.due_sources(now + Duration::seconds(1)).await.unwrap().len(),
            1
        );
    }

    #[tokio::test]
    async fn test_remove_missing_source() {
        let reg = registry();
        assert!(matches!(
            reg.remove(7).await,
            Err(WatchError::SourceNotFound(7))
        ));
    }

    #[tokio::test]
    async fn test_register_names_from_page_title() {
        let reg = titled_registry(Title::Found("Acme Studios"));
        let source = reg
            .register(request("https://play.google.com/store/apps/dev?id=77"))
            .await
            .unwrap();
        assert_eq!(source.name, "Acme Studios");

        // an explicit name is never replaced
        let mut req = request("https://play.google.com/store/apps/dev?id=78");
        req.name = Some("Mine".to_string());
        assert_eq!(reg.register(req).await.unwrap().name, "Mine");
    }

    #[tokio::test]
    async fn test_title_lookup_failures_fall_back_to_url() {
        for title in [Title::Missing, Title::Broken, Title::Hangs] {
            let reg = titled_registry(title);
            let source = reg
                .register(request("https://play.google.com/store/apps/dev?id=79"))
                .await
                .unwrap();
            assert_eq!(source.name, "Play Store Developer Page");
        }
    }

    #[tokio::test]
    async fn test_preview_does_not_register() {
        let reg = titled_registry(Title::Found("Acme Studios"));
        let preview = reg
            .preview("https://apps.apple.com/us/developer/acme/id9")
            .await
            .unwrap();
        assert_eq!(preview.kind, StoreKind::Appstore);
        assert_eq!(preview.name, "Acme Studios");
        assert!(preview.name_from_page);
        assert!(reg.list().await.unwrap().is_empty());

        let plain = registry()
            .preview("https://apps.apple.com/us/genre/ios-games/id6014")
            .await
            .unwrap();
        assert_eq!(plain.name, "App Store Ios Games Genre");
        assert!(!plain.name_from_page);

        assert!(matches!(
            registry().preview("https://example.com/x").await,
            Err(WatchError::Validation(_))
        ));
    }
}
