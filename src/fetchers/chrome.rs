use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use headless_chrome::browser::tab::NoElementFound;
use headless_chrome::util::Timeout;
use headless_chrome::{Browser, LaunchOptions, Tab};
use log::{debug, info, warn};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use crate::fetchers::{FetchError, PageFetcher};

/// Page fetcher backed by headless Chrome, sees the page as rendered after scripts run
pub struct ChromeFetcher {
    /// Browser process, dropped on close
    browser: Option<Browser>,
    /// Single tab reused for every fetch
    tab: Option<Arc<Tab>>,
}

impl ChromeFetcher {
    /// Launch headless Chrome and open the tab used for fetching
    ///
    /// `idle_timeout` must outlast the pause between two fetches, otherwise
    /// the browser shuts itself down while the monitor sleeps.
    pub fn launch(chrome_path: Option<PathBuf>, idle_timeout: Duration) -> Result<Self> {
        let options = LaunchOptions::default_builder()
            .headless(true)
            .path(chrome_path)
            .idle_browser_timeout(idle_timeout)
            .build()
            .map_err(|e| anyhow!("Invalid browser launch options: {}", e))?;

        let browser = Browser::new(options).context("Failed to launch headless Chrome")?;
        let tab = browser.new_tab().context("Failed to open browser tab")?;
        info!("Headless Chrome started");

        Ok(Self {
            browser: Some(browser),
            tab: Some(tab),
        })
    }
}

/// Blocking part of a fetch, runs on the blocking thread pool
fn read_region(tab: &Tab, url: &str, selector: &str, timeout: Duration) -> Result<String, FetchError> {
    tab.set_default_timeout(timeout);

    tab.navigate_to(url)
        .and_then(|tab| tab.wait_until_navigated())
        .map_err(|e| to_fetch_error(e, selector, timeout))?;

    // The wait keeps polling through NoElementFound and reports Timeout at the
    // end, so one last lookup tells a missing region from a slow page
    let element = match tab.wait_for_element_with_custom_timeout(selector, timeout) {
        Ok(element) => element,
        Err(e) if e.downcast_ref::<Timeout>().is_some() => tab
            .find_element(selector)
            .map_err(|last| region_missing_or(last, e, selector, timeout))?,
        Err(e) => return Err(to_fetch_error(e, selector, timeout)),
    };

    element
        .get_inner_text()
        .map_err(|e| to_fetch_error(e, selector, timeout))
}

/// Outcome of the last lookup after a wait timed out
fn region_missing_or(
    last: anyhow::Error,
    wait: anyhow::Error,
    selector: &str,
    timeout: Duration,
) -> FetchError {
    if last.downcast_ref::<NoElementFound>().is_some() {
        FetchError::RegionNotFound(selector.to_string())
    } else {
        to_fetch_error(wait, selector, timeout)
    }
}

fn to_fetch_error(err: anyhow::Error, selector: &str, timeout: Duration) -> FetchError {
    if err.downcast_ref::<Timeout>().is_some() {
        FetchError::Timeout(timeout)
    } else if err.downcast_ref::<NoElementFound>().is_some() {
        FetchError::RegionNotFound(selector.to_string())
    } else {
        FetchError::Unexpected(err)
    }
}

#[async_trait]
impl PageFetcher for ChromeFetcher {
    async fn fetch_region_text(
        &mut self,
        url: &str,
        selector: &str,
        timeout: Duration,
    ) -> Result<String, FetchError> {
        let tab = self
            .tab
            .clone()
            .ok_or_else(|| anyhow!("Browser tab has already been closed"))?;
        let url = url.to_string();
        let selector = selector.to_string();

        debug!("Rendering {} and waiting for {}", url, selector);

        tokio::task::spawn_blocking(move || read_region(&tab, &url, &selector, timeout))
            .await
            .map_err(|e| anyhow!("Browser task failed: {}", e))?
    }

    async fn close(&mut self) -> Result<()> {
        if let Some(tab) = self.tab.take() {
            let closed = tokio::task::spawn_blocking(move || tab.close(true))
                .await
                .context("Browser task failed")?;
            if let Err(e) = closed {
                warn!("Failed to close browser tab: {}", e);
            }
        }

        // Dropping the browser kills the Chrome process
        if self.browser.take().is_some() {
            info!("Headless Chrome stopped");
        }

        Ok(())
    }
}
