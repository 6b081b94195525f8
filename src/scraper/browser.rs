//! Browser automation using chromiumoxide.

use async_trait::async_trait;
use chromiumoxide::browser::{Browser as ChromeBrowser, BrowserConfig};
use chromiumoxide::page::Page;
use futures::StreamExt;
use tokio::time::{sleep, timeout, Duration, Instant};
use tracing::debug;

use super::Fetch;
use crate::config::ScraperConfig;
use crate::error::{Result, ScrapeError};

/// How often to poll for a selector while waiting.
const SELECTOR_POLL_INTERVAL: Duration = Duration::from_millis(250);

/// Browser wrapper implementing the fetch capability.
pub struct Browser {
    browser: ChromeBrowser,
    handle: tokio::task::JoinHandle<()>,
    page_load_timeout: Duration,
    navigation_timeout: Duration,
    selector_timeout: Duration,
    user_agent: String,
}

impl Browser {
    /// Launch a new headless browser instance
    pub async fn launch(config: &ScraperConfig) -> anyhow::Result<Self> {
        // Find Chrome executable
        let chrome_path = if cfg!(target_os = "macos") {
            "/Applications/Google Chrome.app/Contents/MacOS/Google Chrome"
        } else if cfg!(target_os = "windows") {
            "C:\\Program Files\\Google\\Chrome\\Application\\chrome.exe"
        } else {
            "google-chrome"
        };

        let browser_config = BrowserConfig::builder()
            .chrome_executable(chrome_path)
            .no_sandbox()
            .disable_default_args()
            .arg("--headless=new")
            .arg("--disable-gpu")
            .arg("--disable-dev-shm-usage")
            .arg("--disable-software-rasterizer")
            .arg("--no-first-run")
            .arg("--no-default-browser-check")
            .arg("--disable-extensions")
            .arg("--disable-background-networking")
            .arg("--disable-sync")
            .arg("--disable-translate")
            .arg("--mute-audio")
            .window_size(1920, 1080)
            .build()
            .map_err(|e| anyhow::anyhow!("Failed to build browser config: {}", e))?;

        let (browser, mut handler) = ChromeBrowser::launch(browser_config)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to launch browser: {}", e))?;

        // Spawn handler task - must keep running for browser to work
        let handle = tokio::spawn(async move {
            loop {
                match handler.next().await {
                    Some(Ok(_)) => continue,
                    Some(Err(_)) => continue, // Don't break on errors
                    None => break,
                }
            }
        });

        // Give the browser a moment to become ready
        sleep(Duration::from_secs(1)).await;

        Ok(Self {
            browser,
            handle,
            page_load_timeout: config.page_load_timeout(),
            navigation_timeout: config.navigation_timeout(),
            selector_timeout: config.selector_timeout(),
            user_agent: config.user_agent.clone(),
        })
    }

    async fn open_page(&self, url: &str) -> Result<Page> {
        let page = timeout(self.navigation_timeout, self.browser.new_page(url))
            .await
            .map_err(|_| {
                ScrapeError::TransientFetch(format!(
                    "navigation timed out after {:?}: {url}",
                    self.navigation_timeout
                ))
            })?
            .map_err(|e| ScrapeError::TransientFetch(format!("failed to open {url}: {e}")))?;

        let _ = page.set_user_agent(self.user_agent.as_str()).await;
        Ok(page)
    }

    async fn wait_for_load(&self, page: &Page) -> Result<bool> {
        // Race card content is rendered client-side; the body appearing
        // is the cheapest signal that rendering has started.
        self.poll_selector(page, "body").await
    }

    async fn poll_selector(&self, page: &Page, selector: &str) -> Result<bool> {
        let deadline = Instant::now() + self.selector_timeout;
        loop {
            if page.find_element(selector).await.is_ok() {
                return Ok(true);
            }
            if Instant::now() >= deadline {
                debug!(selector, "selector did not appear before timeout");
                return Ok(false);
            }
            sleep(SELECTOR_POLL_INTERVAL).await;
        }
    }

    /// Close the browser
    pub async fn close(mut self) -> Result<()> {
        let _ = self.browser.close().await;
        self.handle.abort();
        Ok(())
    }
}

#[async_trait]
impl Fetch for Browser {
    async fn fetch(&self, url: &str) -> Result<String> {
        let page = self.open_page(url).await?;
        self.wait_for_load(&page).await?;

        let html = timeout(self.page_load_timeout, page.content())
            .await
            .map_err(|_| {
                ScrapeError::TransientFetch(format!(
                    "page load timed out after {:?}: {url}",
                    self.page_load_timeout
                ))
            })?
            .map_err(|e| ScrapeError::TransientFetch(format!("failed to read {url}: {e}")))?;

        let _ = page.close().await;
        Ok(html)
    }
}
