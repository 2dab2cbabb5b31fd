use async_trait::async_trait;
use log::info;

use crate::notifiers::{PublishError, Publisher};

/// Publisher that only writes notifications to the log, for dry runs
pub struct LogPublisher;

#[async_trait]
impl Publisher for LogPublisher {
    async fn publish(&self, channel: &str, message: &str) -> Result<(), PublishError> {
        info!("[{}] {}", channel, message);
        Ok(())
    }
}
