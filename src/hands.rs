use std::ffi::OsStr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use headless_chrome::{Browser, LaunchOptions};
use reqwest::Client;
use tracing::{debug, info};

use crate::error::FetchError;
use crate::types::{SubmissionPayload, TraversalResult};

/// Retrieves pages and files.
#[async_trait]
pub trait PageFetcher: Send + Sync {
    /// Returns `(status, html)`. Non-success statuses are not errors here.
    async fn fetch(&self, url: &str, timeout: Duration) -> Result<(u16, String), FetchError>;

    /// Raw bytes of a successful response.
    async fn fetch_bytes(&self, url: &str, timeout: Duration) -> Result<Vec<u8>, FetchError>;
}

/// Posts answers to a quiz server.
#[async_trait]
pub trait AnswerSubmitter: Send + Sync {
    async fn submit(
        &self,
        url: &str,
        payload: &SubmissionPayload,
        timeout: Duration,
    ) -> Result<TraversalResult, FetchError>;
}

/// Plain HTTP for pages, downloads and submissions.
#[derive(Debug, Clone, Default)]
pub struct HttpClient {
    client: Client,
}

impl HttpClient {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PageFetcher for HttpClient {
    async fn fetch(&self, url: &str, timeout: Duration) -> Result<(u16, String), FetchError> {
        let response = self.client.get(url).timeout(timeout).send().await?;
        let status = response.status().as_u16();
        let body = response.text().await?;
        debug!(url, status, bytes = body.len(), "fetched page");
        Ok((status, body))
    }

    async fn fetch_bytes(&self, url: &str, timeout: Duration) -> Result<Vec<u8>, FetchError> {
        let response = self.client.get(url).timeout(timeout).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status(status.as_u16()));
        }
        Ok(response.bytes().await?.to_vec())
    }
}

#[async_trait]
impl AnswerSubmitter for HttpClient {
    async fn submit(
        &self,
        url: &str,
        payload: &SubmissionPayload,
        timeout: Duration,
    ) -> Result<TraversalResult, FetchError> {
        let response = self
            .client
            .post(url)
            .json(payload)
            .timeout(timeout)
            .send()
            .await?;
        let status = response.status().as_u16();
        let body = response.text().await?;
        Ok(TraversalResult::from_response(status, body))
    }
}

/// Renders pages in headless Chrome so script-built markup is visible.
/// Downloads still go over plain HTTP.
pub struct BrowserFetcher {
    browser: Arc<Browser>,
    http: HttpClient,
}

impl BrowserFetcher {
    pub fn launch(http: HttpClient) -> anyhow::Result<Self> {
        info!("launching headless Chrome");
        let options = LaunchOptions {
            headless: true,
            args: vec![
                OsStr::new("--no-first-run"),
                OsStr::new("--no-default-browser-check"),
                OsStr::new("--disable-blink-features=AutomationControlled"),
            ],
            idle_browser_timeout: Duration::from_secs(300),
            ..Default::default()
        };
        let browser = Browser::new(options)
            .map_err(|e| anyhow::anyhow!("Browser launch failed: {}", e))?;
        Ok(Self {
            browser: Arc::new(browser),
            http,
        })
    }
}

#[async_trait]
impl PageFetcher for BrowserFetcher {
    async fn fetch(&self, url: &str, timeout: Duration) -> Result<(u16, String), FetchError> {
        let browser = Arc::clone(&self.browser);
        let target = url.to_string();
        let render = tokio::task::spawn_blocking(move || -> anyhow::Result<String> {
            let tab = browser.new_tab()?;
            tab.set_default_timeout(timeout);
            tab.navigate_to(&target)?;
            tab.wait_until_navigated()?;
            let html = tab.get_content()?;
            let _ = tab.close(true);
            Ok(html)
        });

        let html = tokio::time::timeout(timeout, render)
            .await
            .map_err(|_| FetchError::Timeout(url.to_string()))?
            .map_err(|e| FetchError::Browser(format!("render task failed: {e}")))?
            .map_err(|e| FetchError::Browser(format!("{e:#}")))?;
        debug!(url, bytes = html.len(), "rendered page");
        Ok((200, html))
    }

    async fn fetch_bytes(&self, url: &str, timeout: Duration) -> Result<Vec<u8>, FetchError> {
        self.http.fetch_bytes(url, timeout).await
    }
}
