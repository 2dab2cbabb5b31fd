use async_trait::async_trait;
use log::debug;
use regex::Regex;
use reqwest::header::{CONTENT_LENGTH, CONTENT_TYPE};
use reqwest::Client;
use serde_json::Value;

use crate::notifiers::{PublishError, Publisher};

/// Environment variable holding the ServerChan send key
pub const SERVER_CHAN_KEY_VAR: &str = "SERVER_CHAN_KEY";

/// ServerChan titles are cut off by the service beyond this many characters
const MAX_TITLE_CHARS: usize = 32;

/// ServerChan push service, delivers notifications to WeChat
///
/// The service has no notion of channels, so the channel identifier is put in
/// front of the title as a `[channel]` tag.
pub struct ServerChanPublisher {
    /// ServerChan send key
    key: String,
    /// HTTP client
    client: Client,
}

impl ServerChanPublisher {
    pub fn new(key: &str) -> Self {
        Self {
            key: key.to_string(),
            client: Client::new(),
        }
    }

    /// Read the send key from the environment
    pub fn from_env() -> Result<Self, PublishError> {
        match std::env::var(SERVER_CHAN_KEY_VAR) {
            Ok(key) if !key.trim().is_empty() => Ok(Self::new(key.trim())),
            _ => Err(PublishError::MissingCredentials(SERVER_CHAN_KEY_VAR)),
        }
    }

    /// Endpoint for the key, `sctp<N>t...` keys are served from a per-user host
    fn endpoint(&self) -> Result<String, PublishError> {
        if self.key.starts_with("sctp") {
            let re = Regex::new(r"^sctp(\d+)t").map_err(|e| PublishError::Rejected(e.to_string()))?;
            let captures = re
                .captures(&self.key)
                .ok_or_else(|| PublishError::Rejected("malformed ServerChan key".to_string()))?;
            Ok(format!("https://{}.push.ft07.com/send/{}.send", &captures[1], self.key))
        } else {
            Ok(format!("https://sctapi.ftqq.com/{}.send", self.key))
        }
    }

    async fn send(&self, text: &str, desp: &str) -> Result<String, PublishError> {
        let params = [("text", text), ("desp", desp)];
        let post_data = serde_urlencoded::to_string(params)
            .map_err(|e| PublishError::Rejected(format!("cannot encode request: {}", e)))?;

        let url = self.endpoint()?;
        debug!("Sending notification to ServerChan");

        let res = self
            .client
            .post(&url)
            .header(CONTENT_TYPE, "application/x-www-form-urlencoded")
            .header(CONTENT_LENGTH, post_data.len() as u64)
            .body(post_data)
            .send()
            .await?;

        let status = res.status();
        if !status.is_success() {
            return Err(PublishError::Rejected(format!("status code {}", status)));
        }

        Ok(res.text().await?)
    }
}

/// Title shown in the push, `[channel] first line of the message`
fn title(channel: &str, message: &str) -> String {
    let first_line = message.lines().next().unwrap_or_default();
    let title = format!("[{}] {}", channel, first_line);
    title.chars().take(MAX_TITLE_CHARS).collect()
}

/// ServerChan answers `{"code": 0, ...}` on success
fn check_response(response: &str) -> Result<(), PublishError> {
    let data: Value = serde_json::from_str(response)
        .map_err(|e| PublishError::InvalidResponse(e.to_string()))?;

    let code = data["code"].as_i64().unwrap_or(-1);
    if code != 0 {
        let message = data["message"].as_str().unwrap_or("unknown error");
        return Err(PublishError::Rejected(message.to_string()));
    }
    Ok(())
}

#[async_trait]
impl Publisher for ServerChanPublisher {
    async fn publish(&self, channel: &str, message: &str) -> Result<(), PublishError> {
        let response = self.send(&title(channel, message), message).await?;
        debug!("ServerChan response: {}", response);
        check_response(&response)
    }
}
