use async_trait::async_trait;
use log::debug;
use reqwest::Client;
use std::time::Duration;

use crate::notifiers::{PublishError, Publisher};

/// Chat webhook publisher, the channel identifier is the webhook URL
pub struct WebhookPublisher {
    /// HTTP client
    client: Client,
}

impl WebhookPublisher {
    pub fn new(timeout: Duration) -> Result<Self, PublishError> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl Publisher for WebhookPublisher {
    async fn publish(&self, channel: &str, message: &str) -> Result<(), PublishError> {
        let payload = serde_json::json!({ "content": message });

        let response = self.client.post(channel).json(&payload).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(PublishError::Rejected(format!("webhook returned status code {}", status)));
        }

        debug!("Webhook notification delivered");
        Ok(())
    }
}
