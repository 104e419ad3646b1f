//! JSON webhook sink (Slack/Discord-style incoming hooks, or anything that
//! accepts a POST).

use super::{AlertSink, Envelope, Severity, SinkError};

use async_trait::async_trait;
use serde::Serialize;
use std::time::Duration;
use tracing::debug;

#[derive(Debug, Serialize, PartialEq, Eq)]
pub struct WebhookPayload {
    pub emitted_at: String,
    pub severity: Severity,
    pub kind: &'static str,
    /// Same line the console prints, also used as `text` by chat webhooks.
    pub text: String,
}

impl WebhookPayload {
    pub fn from_envelope(envelope: &Envelope) -> Self {
        Self {
            emitted_at: envelope.emitted_at.to_rfc3339(),
            severity: envelope.severity(),
            kind: envelope.notification.kind(),
            text: envelope.notification.to_string(),
        }
    }
}

pub struct WebhookSink {
    client: reqwest::Client,
    url: String,
    min_severity: Severity,
}

impl WebhookSink {
    pub fn new(url: String, min_severity: Severity, timeout: Duration) -> Result<Self, SinkError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            url,
            min_severity,
        })
    }
}

#[async_trait]
impl AlertSink for WebhookSink {
    fn name(&self) -> &str {
        "webhook"
    }

    fn min_severity(&self) -> Severity {
        self.min_severity
    }

    async fn notify(&self, envelope: &Envelope) -> Result<(), SinkError> {
        let payload = WebhookPayload::from_envelope(envelope);
        let resp = self.client.post(&self.url).json(&payload).send().await?;
        let status = resp.status().as_u16();
        if status >= 400 {
            let body = resp.text().await.unwrap_or_default();
            return Err(SinkError::Rejected { status, body });
        }
        debug!(status, kind = payload.kind, "webhook delivered");
        Ok(())
    }
}
