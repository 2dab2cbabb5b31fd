use anyhow::{anyhow, Result};
use async_trait::async_trait;
use log::debug;
use reqwest::Client;
use scraper::{Html, Selector};
use std::time::Duration;

use crate::fetchers::{FetchError, PageFetcher};

/// Page fetcher for pages whose region is present in the served HTML
pub struct StaticFetcher {
    /// HTTP client
    client: Client,
    /// Source text of the selector, checked against each call
    selector_source: String,
    /// Parsed selector
    selector: Selector,
}

impl StaticFetcher {
    /// Create a new static page fetcher, the selector is parsed once here
    pub fn new(selector: &str) -> Result<Self> {
        let parsed = Selector::parse(selector)
            .map_err(|e| anyhow!("Invalid CSS selector `{}`: {:?}", selector, e))?;

        Ok(Self {
            client: Client::new(),
            selector_source: selector.to_string(),
            selector: parsed,
        })
    }

    /// Get content of webpage
    async fn get_html(&self, url: &str, timeout: Duration) -> Result<String, FetchError> {
        let response = self
            .client
            .get(url)
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| request_error(e, timeout))?;

        let status = response.status();
        if !status.is_success() {
            return Err(anyhow!("HTTP request to {} failed, status code: {}", url, status).into());
        }

        let html = response.text().await.map_err(|e| request_error(e, timeout))?;
        debug!("Webpage content retrieved: {} bytes", html.len());

        Ok(html)
    }
}

fn request_error(err: reqwest::Error, timeout: Duration) -> FetchError {
    if err.is_timeout() {
        FetchError::Timeout(timeout)
    } else {
        FetchError::Unexpected(anyhow!("Failed to get webpage content: {}", err))
    }
}

/// Text of the first element matching the selector, text nodes joined as-is
fn extract_region(html: &str, selector: &Selector) -> Option<String> {
    let document = Html::parse_document(html);
    let element = document.select(selector).next()?;
    Some(element.text().collect::<String>())
}

#[async_trait]
impl PageFetcher for StaticFetcher {
    async fn fetch_region_text(
        &mut self,
        url: &str,
        selector: &str,
        timeout: Duration,
    ) -> Result<String, FetchError> {
        if selector != self.selector_source {
            return Err(anyhow!(
                "Fetcher was built for selector `{}`, got `{}`",
                self.selector_source,
                selector
            )
            .into());
        }

        let html = self.get_html(url, timeout).await?;
        extract_region(&html, &self.selector)
            .ok_or_else(|| FetchError::RegionNotFound(selector.to_string()))
    }

    async fn close(&mut self) -> Result<()> {
        Ok(())
    }
}
