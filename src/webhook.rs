//! Outbound notification webhook (WeCom group robot format)

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Serialize;
use tracing::{error, info, instrument};

use crate::config::WebhookTimeouts;

/// Body of a text notification: `{"msgtype":"text","text":{"content":...}}`
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Message {
    pub msgtype: &'static str,
    pub text: Text,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Text {
    pub content: String,
}

impl Message {
    pub fn text(content: impl ToString) -> Self {
        Self {
            msgtype: "text",
            text: Text {
                content: content.to_string(),
            },
        }
    }
}

/// How a best-effort notification ended
#[derive(Debug, Clone, PartialEq)]
pub enum DeliveryReport {
    Delivered,
    /// No webhook configured
    Skipped,
    /// Non-200 answer, timeout or transport error. Logged, never raised.
    Failed(String),
}

impl DeliveryReport {
    pub fn is_delivered(&self) -> bool {
        matches!(self, DeliveryReport::Delivered)
    }
}

/// Capability to deliver a message to a webhook URL
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, url: &str, message: &Message) -> DeliveryReport;
}

#[derive(Debug, Clone)]
pub struct WebhookNotifier {
    client: Client,
}

impl WebhookNotifier {
    pub fn new(timeouts: WebhookTimeouts) -> Self {
        let client = Client::builder()
            .timeout(timeouts.request)
            .build()
            .unwrap_or_else(|e| {
                error!("falling back to default webhook client: {e}");
                Client::new()
            });
        Self { client }
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    #[instrument(skip_all)]
    async fn send(&self, url: &str, message: &Message) -> DeliveryReport {
        match self.client.post(url).json(message).send().await {
            Ok(response) if response.status() == StatusCode::OK => {
                info!("Successfully sent webhook alert");
                DeliveryReport::Delivered
            }
            Ok(response) => {
                let status = response.status();
                let body = response.text().await.unwrap_or_default();
                error!("Webhook alert failed with status: {status}, response: {body}");
                DeliveryReport::Failed(format!("webhook answered {status}"))
            }
            Err(e) => {
                error!("Failed to send webhook alert: {}", e);
                DeliveryReport::Failed(e.to_string())
            }
        }
    }
}
