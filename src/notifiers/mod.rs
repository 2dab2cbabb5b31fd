pub mod log_only;
pub mod server_chan;
pub mod webhook;

use async_trait::async_trait;
use log::debug;
use thiserror::Error;

/// Errors returned by notification publishers
#[derive(Debug, Error)]
pub enum PublishError {
    #[error("{0} is not set, cannot send notifications")]
    MissingCredentials(&'static str),
    #[error("notification request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("notification rejected: {0}")]
    Rejected(String),
    #[error("invalid notification service response: {0}")]
    InvalidResponse(String),
}

/// Notification publisher trait, delivers one message to one named channel
#[async_trait]
pub trait Publisher: Send + Sync {
    async fn publish(&self, channel: &str, message: &str) -> Result<(), PublishError>;
}

#[async_trait]
impl<T: Publisher + ?Sized> Publisher for Box<T> {
    async fn publish(&self, channel: &str, message: &str) -> Result<(), PublishError> {
        (**self).publish(channel, message).await
    }
}

/// The two notification destinations
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Channel {
    /// Content changed
    Change,
    /// Liveness, status and fatal errors of the monitor itself
    Health,
}

/// What the monitor wants to announce
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NotificationEvent {
    Started(String),
    Changed(String),
    HealthOk(String),
    FatalError(String),
    Stopped(String),
}

impl NotificationEvent {
    /// Channels the event goes to, in publish order
    ///
    /// A change is echoed on the health channel after the change channel.
    pub fn channels(&self) -> &'static [Channel] {
        match self {
            NotificationEvent::Changed(_) => &[Channel::Change, Channel::Health],
            _ => &[Channel::Health],
        }
    }

    /// Message text sent for the event
    pub fn message(&self) -> String {
        match self {
            NotificationEvent::Started(url) => format!("Start monitoring {}", url),
            NotificationEvent::Stopped(url) => format!("Monitor for {} has stopped", url),
            NotificationEvent::Changed(message)
            | NotificationEvent::HealthOk(message)
            | NotificationEvent::FatalError(message) => message.clone(),
        }
    }
}

/// Turns notification events into publish calls on the configured channels
pub struct NotificationDispatcher<P> {
    publisher: P,
    change_channel: String,
    health_channel: String,
}

impl<P: Publisher> NotificationDispatcher<P> {
    pub fn new(publisher: P, change_channel: &str, health_channel: &str) -> Self {
        Self {
            publisher,
            change_channel: change_channel.to_string(),
            health_channel: health_channel.to_string(),
        }
    }

    fn channel_id(&self, channel: Channel) -> &str {
        match channel {
            Channel::Change => &self.change_channel,
            Channel::Health => &self.health_channel,
        }
    }

    /// Publish the event to each of its channels
    ///
    /// Every channel is attempted even if an earlier one failed; the first
    /// failure is returned.
    pub async fn dispatch(&self, event: &NotificationEvent) -> Result<(), PublishError> {
        let message = event.message();
        let mut first_error = None;

        for &channel in event.channels() {
            let channel_id = self.channel_id(channel);
            debug!("Publishing {:?} to {:?} channel", event, channel);

            if let Err(e) = self.publisher.publish(channel_id, &message).await {
                first_error.get_or_insert(e);
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    #[cfg(test)]
    pub fn publisher(&self) -> &P {
        &self.publisher
    }
}
