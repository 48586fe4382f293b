use crate::{cli::globals::GlobalArgs, portero::store::VerificationRecord, portero::APP_USER_AGENT};
use anyhow::{anyhow, Context, Result};
use chrono::Utc;
use reqwest::Client;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::warn;

const NOTIFY_TIMEOUT: Duration = Duration::from_secs(10);

const EMBED_COLOR_GREEN: u32 = 0x0000_ff00;

/// Best-effort audit sink posting a completion embed to a webhook.
///
/// A missing webhook URL or a delivery failure never affects the attempt; the
/// caller logs and moves on.
#[derive(Debug, Clone)]
pub struct WebhookSink {
    http: Client,
    url: Option<String>,
}

impl WebhookSink {
    /// # Errors
    /// Returns an error if the HTTP client cannot be constructed.
    pub fn new(globals: &GlobalArgs) -> Result<Self> {
        let http = Client::builder()
            .user_agent(APP_USER_AGENT)
            .timeout(NOTIFY_TIMEOUT)
            .build()?;

        Ok(Self {
            http,
            url: globals.webhook_url.clone(),
        })
    }

    /// Post the audit embed for a completed verification.
    ///
    /// # Errors
    /// Returns an error if the webhook rejects or the request fails.
    pub async fn notify(&self, record: &VerificationRecord) -> Result<()> {
        let Some(url) = &self.url else {
            warn!("Audit webhook not configured, skipping notification");
            return Ok(());
        };

        let response = self
            .http
            .post(url)
            .json(&audit_embed(record))
            .send()
            .await
            .context("Audit webhook request failed")?;

        let status = response.status();
        if !status.is_success() {
            return Err(anyhow!("Audit webhook returned {status}"));
        }

        Ok(())
    }
}

fn audit_embed(record: &VerificationRecord) -> Value {
    json!({
        "embeds": [{
            "title": "Verification completed",
            "color": EMBED_COLOR_GREEN,
            "fields": [
                { "name": "Username", "value": record.username },
                { "name": "Identity ID", "value": record.id },
                {
                    "name": "Email",
                    "value": record.email.as_deref().unwrap_or("not provided"),
                },
                { "name": "Origin", "value": record.origin },
                {
                    "name": "Device",
                    "value": record.device.as_deref().unwrap_or("unknown"),
                },
            ],
            "timestamp": Utc::now().to_rfc3339(),
        }]
    })
}
