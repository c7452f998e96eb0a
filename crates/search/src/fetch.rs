use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{ACCEPT, ACCEPT_LANGUAGE, HeaderMap, HeaderValue, USER_AGENT};
use thiserror::Error;
use url::Url;

use dealfinder_config::ScraperConfig;

/// Why a results page could not be retrieved.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FetchError {
    #[error("request timed out")]
    Timeout,
    #[error("HTTP {0}")]
    Status(u16),
    #[error("connection failed: {0}")]
    Connect(String),
    #[error("request error: {0}")]
    Request(String),
    #[error("could not read response body: {0}")]
    Body(String),
}

impl From<reqwest::Error> for FetchError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            FetchError::Timeout
        } else if err.is_connect() {
            FetchError::Connect(err.to_string())
        } else if let Some(status) = err.status() {
            FetchError::Status(status.as_u16())
        } else if err.is_body() || err.is_decode() {
            FetchError::Body(err.to_string())
        } else {
            FetchError::Request(err.to_string())
        }
    }
}

/// Retrieves an HTML document.
#[async_trait]
pub trait PageFetcher: Send + Sync {
    async fn fetch(&self, url: &Url) -> Result<String, FetchError>;
}

/// Single-attempt HTTP fetcher that presents itself as a desktop browser.
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: reqwest::Client,
    max_body_bytes: usize,
}

impl HttpFetcher {
    pub fn new(config: &ScraperConfig) -> Result<Self, reqwest::Error> {
        let mut headers = HeaderMap::new();
        headers.insert(
            ACCEPT,
            HeaderValue::from_static("text/html,application/xhtml+xml;q=0.9,*/*;q=0.8"),
        );
        if let Ok(value) = HeaderValue::from_str(&config.accept_language) {
            headers.insert(ACCEPT_LANGUAGE, value);
        }
        if let Ok(value) = HeaderValue::from_str(&config.user_agent) {
            headers.insert(USER_AGENT, value);
        }

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs.max(1)))
            .default_headers(headers)
            .build()?;

        Ok(Self {
            client,
            max_body_bytes: config.max_body_bytes,
        })
    }
}

#[async_trait]
impl PageFetcher for HttpFetcher {
    async fn fetch(&self, url: &Url) -> Result<String, FetchError> {
        let resp = self.client.get(url.clone()).send().await?;

        let status = resp.status();
        if !status.is_success() {
            return Err(FetchError::Status(status.as_u16()));
        }

        let mut body = resp.text().await?;
        if body.len() > self.max_body_bytes {
            let end = truncate_byte_boundary(&body, self.max_body_bytes);
            body.truncate(end);
        }
        Ok(body)
    }
}

/// Largest index `<= max` that falls on a char boundary of `s`.
fn truncate_byte_boundary(s: &str, max: usize) -> usize {
    if max >= s.len() {
        return s.len();
    }
    let mut end = max;
    while end > 0 && !s.is_char_boundary(end) {
        end -= 1;
    }
    end
}
