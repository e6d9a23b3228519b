//! Outbound user notifications (password reset links, welcome messages).
//!
//! Delivery is fire-and-forget: [`dispatch`] hands the notification to a
//! background task so the HTTP response never waits on, or reveals, the
//! outcome.

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use std::{fmt, sync::Arc, time::Duration};
use tokio::task::JoinHandle;
use tracing::{error, info};
use url::Url;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Template {
    PasswordReset,
    Welcome,
}

impl Template {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::PasswordReset => "password_reset",
            Self::Welcome => "welcome",
        }
    }
}

#[derive(Clone, Serialize)]
pub struct Notification {
    pub email: String,
    pub template: Template,
    pub data: Value,
}

// `data` may carry a reset link, which is a live credential.
impl fmt::Debug for Notification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Notification")
            .field("email", &self.email)
            .field("template", &self.template)
            .field("data", &"[REDACTED]")
            .finish()
    }
}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, notification: &Notification) -> Result<()>;
}

/// Spawn delivery in the background and log failures.
pub fn dispatch(notifier: Arc<dyn Notifier>, notification: Notification) -> JoinHandle<()> {
    tokio::spawn(async move {
        if let Err(err) = notifier.send(&notification).await {
            error!(
                template = notification.template.as_str(),
                "Failed to deliver notification: {err:#}"
            );
        }
    })
}

/// Logs the recipient and template only. Used when no webhook is configured.
#[derive(Clone, Copy, Debug, Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn send(&self, notification: &Notification) -> Result<()> {
        info!(
            email = %notification.email,
            template = notification.template.as_str(),
            "Notification queued (no delivery backend configured)"
        );
        Ok(())
    }
}

/// POSTs each notification as JSON to a delivery service.
#[derive(Clone, Debug)]
pub struct WebhookNotifier {
    client: reqwest::Client,
    url: Url,
}

impl WebhookNotifier {
    /// # Errors
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(url: Url) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(crate::APP_USER_AGENT)
            .timeout(Duration::from_secs(10))
            .build()
            .context("failed to build notification client")?;
        Ok(Self { client, url })
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn send(&self, notification: &Notification) -> Result<()> {
        self.client
            .post(self.url.clone())
            .json(notification)
            .send()
            .await
            .context("notification webhook request failed")?
            .error_for_status()
            .context("notification webhook rejected payload")?;
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    pub(crate) struct RecordingNotifier {
        sent: Mutex<Vec<Notification>>,
    }

    impl RecordingNotifier {
        pub(crate) fn sent(&self) -> Vec<Notification> {
            self.sent
                .lock()
                .map(|sent| sent.clone())
                .unwrap_or_default()
        }
    }

    #[async_trait]
    impl Notifier for RecordingNotifier {
        async fn send(&self, notification: &Notification) -> Result<()> {
            if let Ok(mut sent) = self.sent.lock() {
                sent.push(notification.clone());
            }
            Ok(())
        }
    }
}
