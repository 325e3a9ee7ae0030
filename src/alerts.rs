//! Alert persistence and notification
//!
//! An alert row is written first and unconditionally; the webhook post that
//! follows is best effort. A failed post is logged and reported, but the row
//! stays.

use std::sync::Arc;

use tracing::{debug, instrument, warn};

use crate::storage::{MonitorStore, StorageResult};
use crate::webhook::{DeliveryReport, Message, Notifier};

/// `system_config` key holding the webhook URL
pub const WEBHOOK_CONFIG_KEY: &str = "wechat_webhook";

/// First line of every notification
pub const HEADER: &str = "[Monitor Alert]";

/// Result of one dispatch: the persisted alert and what happened to the
/// notification
#[derive(Debug, Clone, PartialEq)]
pub struct Dispatch {
    pub alert_id: i64,
    pub delivery: DeliveryReport,
}

pub struct AlertDispatcher {
    store: Arc<dyn MonitorStore>,
    notifier: Arc<dyn Notifier>,
    /// Used when the store has no webhook configured
    fallback_url: Option<String>,
}

impl AlertDispatcher {
    pub fn new(
        store: Arc<dyn MonitorStore>,
        notifier: Arc<dyn Notifier>,
        fallback_url: Option<String>,
    ) -> Self {
        Self {
            store,
            notifier,
            fallback_url,
        }
    }

    /// Persist a `pending` alert, then post it to the webhook.
    ///
    /// Only the alert insert can fail this call.
    #[instrument(skip(self, target_name, message))]
    pub async fn dispatch(
        &self,
        target_id: i64,
        target_name: &str,
        kind: &str,
        message: &str,
    ) -> StorageResult<Dispatch> {
        let alert_id = self.store.insert_alert(target_id, kind, message).await?;
        debug!("stored alert {alert_id}");

        let delivery = match self.webhook_url().await {
            Some(url) => {
                let content = format!("{HEADER}\n{target_name}\n{message}");
                self.notifier.send(&url, &Message::text(content)).await
            }
            None => {
                warn!("no notification webhook configured");
                DeliveryReport::Skipped
            }
        };

        Ok(Dispatch { alert_id, delivery })
    }

    async fn webhook_url(&self) -> Option<String> {
        let stored = match self.store.get_config(WEBHOOK_CONFIG_KEY).await {
            Ok(value) => value,
            Err(e) => {
                warn!("cannot read webhook url from store: {e}");
                None
            }
        };

        stored
            .filter(|url| !url.trim().is_empty())
            .or_else(|| self.fallback_url.clone())
            .filter(|url| !url.trim().is_empty())
    }
}
