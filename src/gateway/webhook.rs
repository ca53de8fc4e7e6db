use anyhow::{bail, Context, Result};
use chrono::{SecondsFormat, Utc};
use reqwest::multipart::{Form, Part};
use reqwest::Client;
use std::time::Duration;
use tracing::{debug, error, info};

use super::messages::extract_reply_content;
use crate::recording::Utterance;

/// Hands finalized utterances to the remote agent
///
/// Implementations:
/// - `WebhookGateway`: multipart POST to an automation webhook
/// - test fakes with scripted replies
#[async_trait::async_trait]
pub trait TransmissionGateway: Send + Sync {
    /// Submit one utterance and return the agent's reply content
    async fn transmit(&self, utterance: Utterance) -> Result<String>;
}

/// Automation webhook client (n8n-style form contract)
pub struct WebhookGateway {
    client: Client,
    webhook_url: Option<String>,
}

impl WebhookGateway {
    pub fn new(webhook_url: Option<String>, request_timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(request_timeout)
            .build()
            .context("Failed to build HTTP client")?;

        let webhook_url = webhook_url.filter(|u| !u.trim().is_empty());
        match &webhook_url {
            Some(url) => info!("Webhook gateway targeting {}", url),
            None => info!("No webhook URL configured; utterances will not be delivered"),
        }

        Ok(Self {
            client,
            webhook_url,
        })
    }

    fn form(utterance: Utterance) -> Result<Form> {
        let file = Part::bytes(utterance.wav)
            .file_name("voice_message.wav")
            .mime_str("audio/wav")
            .context("Invalid MIME type")?;

        Ok(Form::new()
            .text("type", "audio")
            .text(
                "timestamp",
                Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
            )
            .part("file", file)
            .text("message", "Voice message received")
            .text("mode", "call"))
    }
}

#[async_trait::async_trait]
impl TransmissionGateway for WebhookGateway {
    async fn transmit(&self, utterance: Utterance) -> Result<String> {
        let Some(url) = self.webhook_url.as_deref() else {
            bail!("No webhook URL configured");
        };

        debug!(
            bytes = utterance.wav.len(),
            duration_ms = utterance.duration_ms(),
            "transmitting utterance"
        );

        let response = self
            .client
            .post(url)
            .multipart(Self::form(utterance)?)
            .send()
            .await
            .map_err(|e| {
                error!(error = %e, "Webhook request failed");
                e
            })?;

        let status = response.status();
        let body = response.text().await.unwrap_or_default();

        if !status.is_success() {
            let excerpt: String = body.chars().take(100).collect();
            bail!("Gateway Error ({}): {}", status.as_u16(), excerpt);
        }

        debug!(status = %status, "webhook replied");
        Ok(extract_reply_content(&body))
    }
}
