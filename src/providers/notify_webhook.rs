//! HTTP webhook [`NotificationSink`] for the §4.12 Safety Monitor's alert
//! channel. POSTs `{channel, payload}` to a configured URL; failures are
//! logged and swallowed, never surfaced past this collaborator (§7's
//! Safety error-kind policy: "log only").

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::error::{CoreError, Result};
use crate::interfaces::NotificationSink;

pub struct WebhookNotificationSink {
    webhook_url: String,
    client: reqwest::Client,
}

impl std::fmt::Debug for WebhookNotificationSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebhookNotificationSink").field("webhook_url", &self.webhook_url).finish_non_exhaustive()
    }
}

impl WebhookNotificationSink {
    #[must_use]
    pub fn new(webhook_url: impl Into<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_millis(2_000))
            .build()
            .unwrap_or_default();
        Self { webhook_url: webhook_url.into(), client }
    }
}

#[async_trait]
impl NotificationSink for WebhookNotificationSink {
    async fn notify(&self, channel: &str, payload: Value) -> Result<()> {
        let body = json!({ "channel": channel, "payload": payload });
        let response = self
            .client
            .post(&self.webhook_url)
            .json(&body)
            .send()
            .await
            .map_err(|e| CoreError::TransientExternal(format!("notification webhook failed: {e}")))?;
        if !response.status().is_success() {
            return Err(CoreError::TransientExternal(format!(
                "notification webhook returned HTTP {}",
                response.status()
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::method;
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn notify_posts_channel_and_payload() {
        let server = MockServer::start().await;
        Mock::given(method("POST")).respond_with(ResponseTemplate::new(200)).mount(&server).await;

        let sink = WebhookNotificationSink::new(server.uri());
        sink.notify("safety-alerts", json!({"matched": "hurt me"})).await.expect("notify");
    }

    #[tokio::test]
    async fn notify_surfaces_non_success_as_transient() {
        let server = MockServer::start().await;
        Mock::given(method("POST")).respond_with(ResponseTemplate::new(503)).mount(&server).await;

        let sink = WebhookNotificationSink::new(server.uri());
        let err = sink.notify("safety-alerts", json!({})).await.unwrap_err();
        assert!(matches!(err, CoreError::TransientExternal(_)));
    }
}
