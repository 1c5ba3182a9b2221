use crate::config::Settings;
use crate::record::{ChatId, Gid};
use async_trait::async_trait;
use serde::Serialize;
use std::sync::Arc;
use tracing::{info, warn};

/// Sent to external listeners whenever a job finishes, successfully or not.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct JobNotice {
    pub successful: bool,
    pub gid: Gid,
    pub chat_id: ChatId,
    pub url: Option<String>,
}

#[async_trait]
pub trait ExternalNotifier: Send + Sync {
    /// Failures are logged, never returned: notification is best effort.
    async fn notify(&self, notice: JobNotice);
}

pub struct NoopNotifier;

#[async_trait]
impl ExternalNotifier for NoopNotifier {
    async fn notify(&self, _notice: JobNotice) {}
}

/// POSTs each notice as JSON to every configured URL.
pub struct WebhookNotifier {
    client: reqwest::Client,
    targets: Vec<String>,
}

impl WebhookNotifier {
    pub fn new(targets: Vec<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            targets,
        }
    }
}

#[async_trait]
impl ExternalNotifier for WebhookNotifier {
    async fn notify(&self, notice: JobNotice) {
        for target in &self.targets {
            match self.client.post(target).json(&notice).send().await {
                Ok(resp) if resp.status().is_success() => {
                    info!("Notified {} about {}", target, notice.gid);
                }
                Ok(resp) => warn!("Failed to notify {}: status {}", target, resp.status()),
                Err(e) => warn!("Failed to notify {}: {}", target, e),
            }
        }
    }
}

/// Webhooks for the configured `notify_urls`, or nothing when none are set.
pub fn from_settings(settings: &Settings) -> Arc<dyn ExternalNotifier> {
    if settings.notify_urls.is_empty() {
        Arc::new(NoopNotifier)
    } else {
        Arc::new(WebhookNotifier::new(settings.notify_urls.clone()))
    }
}
