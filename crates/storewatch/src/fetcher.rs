//! Listing fetchers and the store-kind → fetch-strategy table.
//!
//! A [`Fetcher`] turns a listing page URL into the items currently shown on
//! it. The check pipeline never branches on [`StoreKind`] itself; it asks the
//! [`FetcherRegistry`] for the strategy registered for the source's kind, so
//! adding a store kind is one `register` call.
//!
//! The built-in HTTP strategies extract app links from the page markup. They
//! are deliberately shallow: store pages change often, and an empty result is
//! a valid answer rather than an error.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use scraper::{ElementRef, Html, Selector};
use storewatch_core::models::{FetchedItem, StoreKind};
use storewatch_core::naming::clean_page_title;

use crate::config::FetcherConfig;

/// Retrieves the items currently listed on a store page.
///
/// Implementations may perform network I/O and are called on the tokio
/// runtime. The pipeline wraps every call in its own timeout, so
/// implementations need not enforce one.
#[async_trait]
pub trait Fetcher: Send + Sync {
    /// Short identifier used in logs (e.g. `"playstore-http"`).
    fn name(&self) -> &str;

    async fn fetch(&self, url: &str, kind: StoreKind) -> Result<Vec<FetchedItem>>;

    /// A display name for the page, taken from its title markup.
    ///
    /// Used when a source is registered without a name. `Ok(None)` means
    /// the page has no usable title; callers fall back to URL heuristics.
    async fn page_title(&self, _url: &str) -> Result<Option<String>> {
        Ok(None)
    }
}

/// Maps each [`StoreKind`] to the [`Fetcher`] that handles it.
#[derive(Default, Clone)]
pub struct FetcherRegistry {
    strategies: HashMap<StoreKind, Arc<dyn Fetcher>>,
}

impl FetcherRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// The built-in HTTP strategies for every store kind.
    pub fn http(config: &FetcherConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(config.user_agent.clone())
            .timeout(Duration::from_secs(config.timeout_secs))
            .redirect(reqwest::redirect::Policy::limited(5))
            .build()
            .context("Failed to build HTTP client")?;

        let mut registry = Self::new();
        registry.register(
            StoreKind::Playstore,
            Arc::new(PlayStoreFetcher::new(client.clone())),
        );
        registry.register(StoreKind::Appstore, Arc::new(AppStoreFetcher::new(client)));
        Ok(registry)
    }

    /// One fetcher for every kind. Handy for tests and custom deployments.
    pub fn uniform(fetcher: Arc<dyn Fetcher>) -> Self {
        let mut registry = Self::new();
        for kind in StoreKind::ALL {
            registry.register(kind, fetcher.clone());
        }
        registry
    }

    /// Register (or replace) the strategy for `kind`.
    pub fn register(&mut self, kind: StoreKind, fetcher: Arc<dyn Fetcher>) {
        self.strategies.insert(kind, fetcher);
    }

    pub fn get(&self, kind: StoreKind) -> Option<Arc<dyn Fetcher>> {
        self.strategies.get(&kind).cloned()
    }
}

async fn get_html(client: &reqwest::Client, url: &str) -> Result<String> {
    let response = client
        .get(url)
        .send()
        .await
        .with_context(|| format!("GET {} failed", url))?
        .error_for_status()
        .with_context(|| format!("GET {} returned an error status", url))?;
    response
        .text()
        .await
        .with_context(|| format!("Failed to read body of {}", url))
}

/// Google Play developer, category and collection pages.
pub struct PlayStoreFetcher {
    client: reqwest::Client,
}

impl PlayStoreFetcher {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Fetcher for PlayStoreFetcher {
    fn name(&self) -> &str {
        "playstore-http"
    }

    async fn fetch(&self, url: &str, _kind: StoreKind) -> Result<Vec<FetchedItem>> {
        let html = get_html(&self.client, url).await?;
        parse_play_listing(&html)
    }

    async fn page_title(&self, url: &str) -> Result<Option<String>> {
        let html = get_html(&self.client, url).await?;
        extract_page_title(&html)
    }
}

/// Apple App Store developer and genre pages.
pub struct AppStoreFetcher {
    client: reqwest::Client,
}

impl AppStoreFetcher {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Fetcher for AppStoreFetcher {
    fn name(&self) -> &str {
        "appstore-http"
    }

    async fn fetch(&self, url: &str, _kind: StoreKind) -> Result<Vec<FetchedItem>> {
        let html = get_html(&self.client, url).await?;
        parse_app_store_listing(&html)
    }

    async fn page_title(&self, url: &str) -> Result<Option<String>> {
        let html = get_html(&self.client, url).await?;
        extract_page_title(&html)
    }
}

fn selector(css: &str) -> Result<Selector> {
    Selector::parse(css).map_err(|e| anyhow!("invalid selector {}: {}", css, e))
}

fn collapsed_text(el: &ElementRef<'_>) -> String {
    el.text()
        .flat_map(str::split_whitespace)
        .collect::<Vec<_>>()
        .join(" ")
}

fn push_unique(items: &mut Vec<FetchedItem>, item: FetchedItem) {
    if !items.iter().any(|existing| existing.id == item.id) {
        items.push(item);
    }
}

/// Extract Play Store apps from listing markup.
///
/// Detail links (`/store/apps/details?id=`) are tried first, then elements
/// carrying `data-docid`. The first selector that yields anything wins.
pub fn parse_play_listing(html: &str) -> Result<Vec<FetchedItem>> {
    let document = Html::parse_document(html);
    let titled = selector("[title]")?;
    let anchor = selector("a[href]")?;
    let candidates = [
        selector(r#"a[href*="/store/apps/details?id="]"#)?,
        selector("[data-docid]")?,
    ];

    for candidate in &candidates {
        let mut items = Vec::new();
        for el in document.select(candidate) {
            let href = el
                .value()
                .attr("href")
                .or_else(|| el.select(&anchor).next().and_then(|a| a.value().attr("href")));

            let id = href
                .and_then(|h| h.split_once("id="))
                .map(|(_, rest)| rest.split('&').next().unwrap_or(rest).to_string())
                .or_else(|| el.value().attr("data-docid").map(str::to_string))
                .filter(|id| !id.is_empty());

            let name = el
                .select(&titled)
                .next()
                .and_then(|t| t.value().attr("title"))
                .or_else(|| el.value().attr("title"))
                .map(|t| t.trim().to_string())
                .filter(|t| !t.is_empty())
                .unwrap_or_else(|| collapsed_text(&el));

            if let Some(id) = id {
                if !name.is_empty() {
                    let link = format!("https://play.google.com/store/apps/details?id={}", id);
                    push_unique(&mut items, FetchedItem { id, name, link });
                }
            }
        }
        if !items.is_empty() {
            return Ok(items);
        }
    }

    Ok(Vec::new())
}

/// Extract App Store apps from listing markup (`/app/<slug>/id<number>` links).
pub fn parse_app_store_listing(html: &str) -> Result<Vec<FetchedItem>> {
    let document = Html::parse_document(html);
    let app_link = selector(r#"a[href*="/app/"]"#)?;
    let image = selector("img[alt]")?;

    let mut items = Vec::new();
    for el in document.select(&app_link) {
        let Some(href) = el.value().attr("href") else {
            continue;
        };

        let id = href
            .trim_end_matches('/')
            .rsplit('/')
            .next()
            .map(|last| last.split('?').next().unwrap_or(last).to_string())
            .filter(|id| !id.is_empty());

        let text = collapsed_text(&el);
        let name = if text.is_empty() {
            el.select(&image)
                .next()
                .and_then(|img| img.value().attr("alt"))
                .map(|alt| alt.trim().to_string())
                .unwrap_or_default()
        } else {
            text
        };

        if let Some(id) = id {
            if !name.is_empty() {
                let link = if href.starts_with("http") {
                    href.to_string()
                } else {
                    format!("https://apps.apple.com{}", href)
                };
                push_unique(&mut items, FetchedItem { id, name, link });
            }
        }
    }

    Ok(items)
}

/// Pick a display name from page markup.
///
/// Tries `og:title`, `twitter:title`, `<meta name="title">`, the first `<h1>`
/// and finally `<title>`. Candidates polluted with inline style text (App
/// Store pages sometimes leak Ember CSS into titles) are skipped. The first
/// candidate that survives [`clean_page_title`] wins.
pub fn extract_page_title(html: &str) -> Result<Option<String>> {
    let document = Html::parse_document(html);
    let meta = [
        selector(r#"meta[property="og:title"]"#)?,
        selector(r#"meta[name="twitter:title"]"#)?,
        selector(r#"meta[name="title"]"#)?,
    ];
    let text = [selector("h1")?, selector("title")?];

    let from_meta = meta.iter().filter_map(|sel| {
        document
            .select(sel)
            .next()
            .and_then(|el| el.value().attr("content"))
            .map(str::to_string)
    });
    let from_text = text
        .iter()
        .filter_map(|sel| document.select(sel).next().map(|el| collapsed_text(&el)));

    Ok(from_meta
        .chain(from_text)
        .filter(|raw| !raw.contains("ember") && !raw.contains('{'))
        .find_map(|raw| clean_page_title(&raw)))
}
