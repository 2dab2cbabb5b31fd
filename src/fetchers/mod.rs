pub mod chrome;
pub mod static_page;

use async_trait::async_trait;
use log::debug;
use std::time::Duration;
use thiserror::Error;

/// Failures a page fetcher can report
#[derive(Debug, Error)]
pub enum FetchError {
    /// The selector did not resolve to any element
    #[error("cannot find region `{0}`")]
    RegionNotFound(String),
    /// The fetch exceeded its time budget
    #[error("timed out after {0:?} while waiting for the page")]
    Timeout(Duration),
    /// Anything else
    #[error(transparent)]
    Unexpected(#[from] anyhow::Error),
}

/// Outcome of one fetch attempt, as seen by the control loop
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchResult {
    Success(String),
    NotFound,
    Timeout,
    UnexpectedError(String),
}

/// Page content fetcher trait, renders a page and extracts the text of one region
#[async_trait]
pub trait PageFetcher: Send {
    /// Fetch the page and return the text of the region matched by `selector`
    async fn fetch_region_text(
        &mut self,
        url: &str,
        selector: &str,
        timeout: Duration,
    ) -> Result<String, FetchError>;

    /// Release whatever the fetcher holds (browser process, connections)
    async fn close(&mut self) -> anyhow::Result<()>;
}

#[async_trait]
impl<T: PageFetcher + ?Sized> PageFetcher for Box<T> {
    async fn fetch_region_text(
        &mut self,
        url: &str,
        selector: &str,
        timeout: Duration,
    ) -> Result<String, FetchError> {
        (**self).fetch_region_text(url, selector, timeout).await
    }

    async fn close(&mut self) -> anyhow::Result<()> {
        (**self).close().await
    }
}

/// Map a fetcher outcome onto the closed set of results the loop branches on
pub fn classify(outcome: Result<String, FetchError>) -> FetchResult {
    match outcome {
        Ok(text) => FetchResult::Success(text),
        Err(FetchError::RegionNotFound(_)) => FetchResult::NotFound,
        Err(FetchError::Timeout(_)) => FetchResult::Timeout,
        // Alternate format keeps the whole context chain
        Err(FetchError::Unexpected(e)) => FetchResult::UnexpectedError(format!("{:#}", e)),
    }
}

/// Make exactly one fetch attempt and classify it, no retries
pub async fn fetch_classified<F: PageFetcher + ?Sized>(
    fetcher: &mut F,
    url: &str,
    selector: &str,
    timeout: Duration,
) -> FetchResult {
    let outcome = fetcher.fetch_region_text(url, selector, timeout).await;
    if let Err(e) = &outcome {
        debug!("Fetch of {} failed: {}", url, e);
    }
    classify(outcome)
}
