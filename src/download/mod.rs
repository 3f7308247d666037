pub mod playlist;
pub mod segment;

use std::time::Duration;

use reqwest::Response;
use url::Url;

use crate::error::{Error, Result};

const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; rv:78.0) Gecko/20100101 Firefox/78.0";

/// HTTP connection pool shared by every request of one pipeline run.
#[derive(Debug, Clone)]
pub struct DownloadClient {
    client: reqwest::Client,
}

impl DownloadClient {
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(timeout)
            .build()
            .map_err(|err| Error::Workspace(format!("failed to build HTTP client: {err}")))?;

        Ok(Self { client })
    }

    /// Sends a GET and fails on transport errors or non-2xx statuses.
    pub async fn get(&self, url: &Url, timeout: Option<Duration>) -> reqwest::Result<Response> {
        let mut request = self.client.get(url.as_str());
        if let Some(timeout) = timeout {
            request = request.timeout(timeout);
        }

        request.send().await?.error_for_status()
    }

    pub async fn download_text(&self, url: &Url) -> reqwest::Result<String> {
        self.get(url, None).await?.text().await
    }
}
