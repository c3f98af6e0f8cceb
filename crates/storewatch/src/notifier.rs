//! New-item notifications.
//!
//! One [`Notification`] is sent per newly discovered item. Delivery is
//! best-effort: [`dispatch`] gives every send its own timeout, keeps going
//! after failures, and returns one [`NotificationOutcome`] per item so the
//! caller can surface what failed.

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Serialize;
use storewatch_core::category::category_hint;
use storewatch_core::error::WatchError;
use storewatch_core::models::{Item, Source};
use tracing::{info, warn};

/// Payload for one newly discovered item.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Notification {
    #[serde(rename = "appName")]
    pub name: String,
    #[serde(rename = "appCategory")]
    pub category: String,
    #[serde(rename = "appUrl")]
    pub link: String,
}

impl Notification {
    pub fn for_item(item: &Item, source: &Source) -> Self {
        Self {
            name: item.name.clone(),
            category: category_hint(&item.link, source.kind),
            link: item.link.clone(),
        }
    }

    fn test_payload() -> Self {
        Self {
            name: "Test App".to_string(),
            category: "Testing".to_string(),
            link: "https://example.com".to_string(),
        }
    }
}

/// Delivery channel for new-item alerts.
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Human-readable name for this channel (e.g. `"webhook"`).
    fn channel_name(&self) -> &str;

    async fn notify(&self, notification: &Notification) -> Result<(), WatchError>;

    /// Send a fixed test payload to check connectivity.
    async fn test(&self) -> Result<(), WatchError> {
        self.notify(&Notification::test_payload()).await
    }
}

/// Posts each notification as JSON to a webhook URL.
pub struct WebhookNotifier {
    url: String,
    client: reqwest::Client,
}

impl WebhookNotifier {
    /// # Arguments
    ///
    /// * `url`: endpoint that receives `{"appName", "appCategory", "appUrl"}`.
    /// * `timeout`: HTTP client timeout per request.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(url: String, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build webhook HTTP client")?;
        Ok(Self { url, client })
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    fn channel_name(&self) -> &str {
        "webhook"
    }

    async fn notify(&self, notification: &Notification) -> Result<(), WatchError> {
        let response = self
            .client
            .post(&self.url)
            .json(notification)
            .send()
            .await
            .map_err(|e| WatchError::Notification(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(WatchError::Notification(format!(
                "webhook returned HTTP {}: {}",
                status,
                body.chars().take(200).collect::<String>()
            )));
        }
        Ok(())
    }
}

/// Used when no webhook is configured: records the alert in the log only.
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    fn channel_name(&self) -> &str {
        "log"
    }

    async fn notify(&self, notification: &Notification) -> Result<(), WatchError> {
        info!(
            app = %notification.name,
            category = %notification.category,
            link = %notification.link,
            "new app discovered"
        );
        Ok(())
    }
}

/// Result of notifying about one item.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NotificationOutcome {
    pub item_id: String,
    pub delivered: bool,
    pub error: Option<String>,
}

/// Notify about each item in turn. A failed or timed-out send is logged and
/// recorded; it never stops the remaining sends.
pub async fn dispatch(
    notifier: &dyn Notifier,
    source: &Source,
    items: &[Item],
    timeout: Duration,
) -> Vec<NotificationOutcome> {
    let mut outcomes = Vec::with_capacity(items.len());

    for item in items {
        let notification = Notification::for_item(item, source);
        let result = match tokio::time::timeout(timeout, notifier.notify(&notification)).await {
            Ok(result) => result,
            Err(_) => Err(WatchError::Notification(format!(
                "timed out after {}s",
                timeout.as_secs()
            ))),
        };

        match result {
            Ok(()) => outcomes.push(NotificationOutcome {
                item_id: item.item_id.clone(),
                delivered: true,
                error: None,
            }),
            Err(e) => {
                warn!(
                    source_id = source.id,
                    item_id = %item.item_id,
                    channel = notifier.channel_name(),
                    error = %e,
                    "notification failed"
                );
                outcomes.push(NotificationOutcome {
                    item_id: item.item_id.clone(),
                    delivered: false,
                    error: Some(e.to_string()),
                });
            }
        }
    }

    outcomes
}
