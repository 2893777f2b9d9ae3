//! Desktop notifications for severe-weather warnings.
//!
//! Notifications are a side channel: a failed notification is logged and
//! never changes what the fetch returns.

use std::sync::Arc;

use async_trait::async_trait;
use notify_rust::Notification;

use crate::cache::Fetcher;
use crate::types::{BadWeatherReport, FetchError, FetchParams};

const APP_NAME: &str = "tunecast";

/// Something that can show a short message to the user.
pub trait Notifier: Send + Sync {
    fn notify(&self, title: &str, body: &str) -> anyhow::Result<()>;
}

/// Native desktop notifications (libnotify / Notification Center).
#[derive(Debug, Clone, Default)]
pub struct DesktopNotifier;

impl Notifier for DesktopNotifier {
    fn notify(&self, title: &str, body: &str) -> anyhow::Result<()> {
        Notification::new()
            .summary(title)
            .body(body)
            .icon("dialog-warning")
            .appname(APP_NAME)
            .timeout(5000)
            .show()?;
        Ok(())
    }
}

/// Wraps a warnings fetcher and announces the first warning of each fetch.
pub struct WarningNotifyingFetcher<F> {
    inner: F,
    notifier: Arc<dyn Notifier>,
}

impl<F> WarningNotifyingFetcher<F> {
    pub fn new(inner: F, notifier: Arc<dyn Notifier>) -> Self {
        Self { inner, notifier }
    }
}

#[async_trait]
impl<F> Fetcher<BadWeatherReport> for WarningNotifyingFetcher<F>
where
    F: Fetcher<BadWeatherReport>,
{
    async fn fetch(&self, params: &FetchParams) -> Result<BadWeatherReport, FetchError> {
        let report = self.inner.fetch(params).await?;

        if let Some(first) = report.warnings.first() {
            let title = match &report.place_name {
                Some(place) => format!("Weather warning: {}", place),
                None => "Weather warning".to_string(),
            };
            let body = first.clone();
            let notifier = Arc::clone(&self.notifier);

            // Fire and forget; the fetch result does not wait on the desktop.
            tokio::task::spawn_blocking(move || {
                if let Err(e) = notifier.notify(&title, &body) {
                    tracing::warn!("Failed to show weather warning: {}", e);
                }
            });
        }

        Ok(report)
    }
}
