//! Best-effort incident alerting.
//!
//! When a connection is permanently invalidated the orchestrator raises an
//! incident so someone re-links the platform. The call is fire-and-forget:
//! it runs after the core decision is committed, under a bounded timeout,
//! and its outcome never influences the orchestrator's return value.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;

use adlink_models::Platform;

#[async_trait]
pub trait AlertSink: Send + Sync {
    /// Open an incident with a title and a markdown body.
    async fn create_incident(&self, title: &str, body: &str) -> anyhow::Result<()>;
}

/// Sink that drops every incident; used when alerting is unconfigured.
pub struct NullAlertSink;

#[async_trait]
impl AlertSink for NullAlertSink {
    async fn create_incident(&self, title: &str, _body: &str) -> anyhow::Result<()> {
        tracing::debug!(title, "Alerting disabled, incident dropped");
        Ok(())
    }
}

/// Sink posting incidents to a ticketing webhook.
pub struct HttpAlertSink {
    endpoint: String,
    token: Option<String>,
    http: Client,
}

impl HttpAlertSink {
    pub fn new(endpoint: impl Into<String>, token: Option<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            token,
            http: Client::new(),
        }
    }
}

#[async_trait]
impl AlertSink for HttpAlertSink {
    async fn create_incident(&self, title: &str, body: &str) -> anyhow::Result<()> {
        let mut request = self.http.post(&self.endpoint).json(&serde_json::json!({
            "name": title,
            "description": body,
            "tags": ["validation_needed"],
        }));
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }
        let response = request.send().await?;
        if !response.status().is_success() {
            anyhow::bail!("incident endpoint returned HTTP {}", response.status());
        }
        Ok(())
    }
}

/// Fire-and-forget wrapper around an alert sink.
#[derive(Clone)]
pub struct Notifier {
    sink: Arc<dyn AlertSink>,
    timeout: Duration,
}

impl Notifier {
    pub fn new(sink: Arc<dyn AlertSink>, timeout: Duration) -> Self {
        Self { sink, timeout }
    }

    pub fn disabled() -> Self {
        Self::new(Arc::new(NullAlertSink), Duration::from_secs(5))
    }

    /// Raise an incident for a permanently dead grant. Returns immediately;
    /// delivery happens on a detached task and failures are only logged.
    pub fn notify_reauth_required(&self, campaigner_id: i64, platform: Platform, reason: &str) {
        let sink = self.sink.clone();
        let timeout = self.timeout;
        let title = format!("Re-authentication required: {platform}");
        let body = format!(
            "Connection for campaigner **{campaigner_id}** on **{platform}** was \
             permanently invalidated and silent refresh is no longer possible.\n\n\
             Reason: `{reason}`\n\nThe campaigner must re-link the platform.",
        );

        tokio::spawn(async move {
            match tokio::time::timeout(timeout, sink.create_incident(&title, &body)).await {
                Ok(Ok(())) => {
                    tracing::info!(%platform, "Raised re-authentication incident");
                }
                Ok(Err(e)) => {
                    tracing::warn!(%platform, error = %e, "Failed to raise incident");
                }
                Err(_) => {
                    tracing::warn!(%platform, "Incident delivery timed out");
                }
            }
        });
    }
}
