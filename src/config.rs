use anyhow::{Context, Result};
use clap::{Args, ValueEnum};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// How the page is turned into the text of the monitored region
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Renderer {
    /// Headless Chrome, the page as rendered after scripts run
    Chrome,
    /// Raw HTML as served
    Static,
}

/// Where notifications are delivered
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum PublisherKind {
    /// ServerChan push service, key from SERVER_CHAN_KEY
    #[value(name = "server_chan")]
    ServerChan,
    /// Chat webhook, channel identifiers are webhook URLs
    Webhook,
    /// Only write notifications to the log
    Log,
}

/// Monitor configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    /// Page to monitor
    pub url: String,
    /// CSS selector of the monitored region
    pub selector: String,
    /// How the page is fetched
    pub renderer: Renderer,
    /// Channel receiving change notifications
    pub change_channel: String,
    /// Channel receiving status notifications
    pub health_channel: String,
    /// Time budget of one fetch (seconds)
    pub fetch_timeout_secs: u64,
    /// Pause between two checks (seconds)
    pub poll_interval_secs: u64,
    /// Send a status report after this many checks without change
    pub health_report_every: u32,
    /// Stop after this many changes
    pub max_changes: u32,
    /// Notification service
    pub publisher: PublisherKind,
    /// Browser binary, found automatically when unset
    pub chrome_path: Option<PathBuf>,
    /// Treat a failed notification as a fatal error
    pub fail_on_publish_error: bool,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            selector: String::new(),
            renderer: Renderer::Chrome,
            change_channel: "change".to_string(),
            health_channel: "health".to_string(),
            fetch_timeout_secs: 10,
            poll_interval_secs: 60,
            health_report_every: 120,
            max_changes: 10,
            publisher: PublisherKind::Log,
            chrome_path: None,
            fail_on_publish_error: false,
        }
    }
}

/// Configuration problems found before monitoring starts
#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),
    #[error("url must start with http:// or https://, got `{0}`")]
    InvalidUrl(String),
    #[error("{0} must be greater than zero")]
    Zero(&'static str),
    #[error("{0} must be a webhook URL when publishing to webhooks")]
    NotWebhookUrl(&'static str),
}

fn is_http_url(s: &str) -> bool {
    s.starts_with("http://") || s.starts_with("https://")
}

/// Command line overrides, each one replaces the config file value when given
#[derive(Debug, Clone, Default, Args)]
pub struct ConfigOverrides {
    /// Webpage URL to monitor
    #[arg(short, long)]
    pub url: Option<String>,

    /// CSS selector of the region to monitor
    #[arg(short, long)]
    pub selector: Option<String>,

    /// Channel for change notifications
    #[arg(long)]
    pub change_channel: Option<String>,

    /// Channel for status notifications
    #[arg(long)]
    pub health_channel: Option<String>,

    /// Fetch timeout (seconds)
    #[arg(long)]
    pub fetch_timeout: Option<u64>,

    /// Monitoring interval (seconds)
    #[arg(short, long)]
    pub interval: Option<u64>,

    /// Report status after this many checks without change
    #[arg(long)]
    pub health_every: Option<u32>,

    /// Stop after this many changes
    #[arg(long)]
    pub max_changes: Option<u32>,

    /// Notification service
    #[arg(short, long, value_enum)]
    pub publisher: Option<PublisherKind>,

    /// Path to the Chrome binary
    #[arg(long, value_name = "FILE")]
    pub chrome_path: Option<PathBuf>,

    /// Stop monitoring when a notification cannot be delivered
    #[arg(long)]
    pub fail_on_publish_error: bool,
}

impl MonitorConfig {
    /// Load configuration from a JSON file, missing fields take their defaults
    pub fn load(path: &Path) -> Result<Self> {
        let config_str = fs::read_to_string(path)
            .with_context(|| format!("Cannot read config file {}", path.display()))?;
        let config = serde_json::from_str(&config_str)
            .with_context(|| format!("Cannot parse config file {}", path.display()))?;
        Ok(config)
    }

    pub fn apply(&mut self, overrides: ConfigOverrides) {
        if let Some(url) = overrides.url {
            self.url = url;
        }
        if let Some(selector) = overrides.selector {
            self.selector = selector;
        }
        if let Some(channel) = overrides.change_channel {
            self.change_channel = channel;
        }
        if let Some(channel) = overrides.health_channel {
            self.health_channel = channel;
        }
        if let Some(secs) = overrides.fetch_timeout {
            self.fetch_timeout_secs = secs;
        }
        if let Some(secs) = overrides.interval {
            self.poll_interval_secs = secs;
        }
        if let Some(every) = overrides.health_every {
            self.health_report_every = every;
        }
        if let Some(max) = overrides.max_changes {
            self.max_changes = max;
        }
        if let Some(publisher) = overrides.publisher {
            self.publisher = publisher;
        }
        if overrides.chrome_path.is_some() {
            self.chrome_path = overrides.chrome_path;
        }
        if overrides.fail_on_publish_error {
            self.fail_on_publish_error = true;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.url.trim().is_empty() {
            return Err(ConfigError::Missing("url"));
        }
        if !is_http_url(&self.url) {
            return Err(ConfigError::InvalidUrl(self.url.clone()));
        }
        if self.selector.trim().is_empty() {
            return Err(ConfigError::Missing("selector"));
        }
        if self.change_channel.trim().is_empty() {
            return Err(ConfigError::Missing("change_channel"));
        }
        if self.health_channel.trim().is_empty() {
            return Err(ConfigError::Missing("health_channel"));
        }
        if self.publisher == PublisherKind::Webhook {
            if !is_http_url(&self.change_channel) {
                return Err(ConfigError::NotWebhookUrl("change_channel"));
            }
            if !is_http_url(&self.health_channel) {
                return Err(ConfigError::NotWebhookUrl("health_channel"));
            }
        }
        if self.fetch_timeout_secs == 0 {
            return Err(ConfigError::Zero("fetch_timeout_secs"));
        }
        if self.poll_interval_secs == 0 {
            return Err(ConfigError::Zero("poll_interval_secs"));
        }
        if self.health_report_every == 0 {
            return Err(ConfigError::Zero("health_report_every"));
        }
        if self.max_changes == 0 {
            return Err(ConfigError::Zero("max_changes"));
        }
        Ok(())
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }
}
