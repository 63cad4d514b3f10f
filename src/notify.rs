use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Serialize;
use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::config::WebhookConfig;

/// Posts a message into the chat.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, text: &str, props: Option<Map<String, Value>>) -> Result<()>;
}

/// Body accepted by a Mattermost incoming webhook.
#[derive(Debug, Serialize)]
pub struct WebhookPayload<'a> {
    pub text: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub props: Option<Map<String, Value>>,
}

impl<'a> WebhookPayload<'a> {
    /// Empty props are dropped from the payload.
    pub fn new(text: &'a str, props: Option<Map<String, Value>>) -> Self {
        let props = props.filter(|map| !map.is_empty());
        Self { text, props }
    }
}

pub struct WebhookNotifier {
    client: reqwest::Client,
    config: WebhookConfig,
}

impl WebhookNotifier {
    pub fn new(config: WebhookConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .context("Failed to build webhook HTTP client")?;
        Ok(Self { client, config })
    }

    pub fn is_configured(&self) -> bool {
        self.config.url.is_some()
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn notify(&self, text: &str, props: Option<Map<String, Value>>) -> Result<()> {
        let Some(url) = self.config.url.as_deref() else {
            warn!("MM_INCOMING_WEBHOOK_URL is not set; skipping chat notification");
            return Ok(());
        };

        let payload = WebhookPayload::new(text, props);
        debug!("Posting {} chars to incoming webhook", text.len());

        let response = self
            .client
            .post(url)
            .json(&payload)
            .send()
            .await
            .context("Failed to send message to incoming webhook")?;

        let status = response.status();
        if !status.is_success() {
            let error_body = response.text().await.unwrap_or_default();
            anyhow::bail!("Incoming webhook error ({}): {}", status, error_body);
        }

        Ok(())
    }
}
