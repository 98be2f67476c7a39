//! Page fetcher implementation
//!
//! This module handles loading pages for the crawler, including:
//! - The `PageFetcher` capability the pipeline depends on
//! - Building HTTP clients with proper user agent strings
//! - GET requests with redirect handling
//! - Error classification into transient and permanent failures

use crate::config::UserAgentConfig;
use crate::crawler::parser::parse_html;
use crate::state::FailureKind;
use async_trait::async_trait;
use reqwest::{redirect::Policy, Client, StatusCode};
use std::time::Duration;
use thiserror::Error;
use url::Url;

/// Maximum number of redirects followed for one page
pub const MAX_REDIRECTS: usize = 10;

/// A loaded page as returned by a fetcher
#[derive(Debug, Clone, Default)]
pub struct LoadedPage {
    /// Final URL after redirects
    pub final_url: Option<Url>,
    /// Page title, if the page has one
    pub title: Option<String>,
    /// Visible body text
    pub body_text: String,
    /// Ordered text blocks
    pub blocks: Vec<String>,
    /// Outbound links, absolute
    pub links: Vec<Url>,
}

/// Fetch failure, classified for the retry policy
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FetchError {
    /// Network error, timeout, 5xx or 429; eligible for retry
    #[error("Transient fetch error for {url}: {reason}")]
    Transient { url: String, reason: String },

    /// 4xx, non-HTML or undecodable content; never retried
    #[error("Permanent fetch error for {url}: {reason}")]
    Permanent { url: String, reason: String },
}

impl FetchError {
    pub fn transient(url: &Url, reason: impl Into<String>) -> Self {
        Self::Transient {
            url: url.to_string(),
            reason: reason.into(),
        }
    }

    pub fn permanent(url: &Url, reason: impl Into<String>) -> Self {
        Self::Permanent {
            url: url.to_string(),
            reason: reason.into(),
        }
    }

    pub fn kind(&self) -> FailureKind {
        match self {
            Self::Transient { .. } => FailureKind::Transient,
            Self::Permanent { .. } => FailureKind::Permanent,
        }
    }

    pub fn reason(&self) -> &str {
        match self {
            Self::Transient { reason, .. } | Self::Permanent { reason, .. } => reason,
        }
    }
}

/// Loads a page and returns its title, text and outbound links
///
/// The crawler treats this as an opaque capability; implementations decide
/// how a page is loaded and rendered.
#[async_trait]
pub trait PageFetcher: Send + Sync {
    async fn load(&self, url: &Url) -> Result<LoadedPage, FetchError>;
}

/// Builds an HTTP client with proper configuration
///
/// # Arguments
///
/// * `config` - The user agent configuration
/// * `timeout` - Whole-request timeout
///
/// # Example
///
/// ```no_run
/// use scoped_crawler::config::UserAgentConfig;
/// use scoped_crawler::crawler::build_http_client;
/// use std::time::Duration;
///
/// let config = UserAgentConfig {
///     crawler_name: "ScopedCrawler".to_string(),
///     crawler_version: "1.0".to_string(),
///     contact_url: "https://example.com/about".to_string(),
///     contact_email: "admin@example.com".to_string(),
/// };
///
/// let client = build_http_client(&config, Duration::from_secs(30)).unwrap();
/// ```
pub fn build_http_client(
    config: &UserAgentConfig,
    timeout: Duration,
) -> Result<Client, reqwest::Error> {
    Client::builder()
        .user_agent(config.header_value())
        .timeout(timeout)
        .connect_timeout(Duration::from_secs(10))
        .redirect(Policy::limited(MAX_REDIRECTS))
        .gzip(true)
        .brotli(true)
        .build()
}

/// `PageFetcher` over plain HTTP; no script execution
pub struct HttpFetcher {
    client: Client,
}

impl HttpFetcher {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// Builds a fetcher with a client configured from the user agent settings
    pub fn from_config(
        config: &UserAgentConfig,
        timeout: Duration,
    ) -> Result<Self, reqwest::Error> {
        Ok(Self::new(build_http_client(config, timeout)?))
    }
}

#[async_trait]
impl PageFetcher for HttpFetcher {
    /// Fetches and extracts one page
    ///
    /// # Classification
    ///
    /// | Condition | Result |
    /// |-----------|--------|
    /// | Timeout / connection error | Transient |
    /// | HTTP 5xx, HTTP 429 | Transient |
    /// | Other HTTP 4xx | Permanent |
    /// | Redirect loop, chain > 10 | Permanent |
    /// | Non-HTML Content-Type | Permanent |
    /// | Body decode failure | Permanent |
    async fn load(&self, url: &Url) -> Result<LoadedPage, FetchError> {
        let response = self
            .client
            .get(url.clone())
            .send()
            .await
            .map_err(|e| classify_request_error(url, &e))?;

        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
            return Err(FetchError::transient(url, format!("HTTP {}", status.as_u16())));
        }
        if !status.is_success() {
            return Err(FetchError::permanent(url, format!("HTTP {}", status.as_u16())));
        }

        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_ascii_lowercase();

        if !is_html(&content_type) {
            let shown = if content_type.is_empty() {
                "<none>"
            } else {
                content_type.as_str()
            };
            return Err(FetchError::permanent(url, format!("not HTML: {}", shown)));
        }

        let final_url = response.url().clone();
        let body = response.text().await.map_err(|e| {
            if e.is_timeout() {
                FetchError::transient(url, "timed out reading body")
            } else {
                FetchError::permanent(url, format!("undecodable body: {}", e))
            }
        })?;

        let parsed = parse_html(&body, &final_url);
        tracing::trace!(
            "Loaded {} ({} bytes, {} links)",
            final_url,
            body.len(),
            parsed.links.len()
        );

        Ok(LoadedPage {
            final_url: Some(final_url),
            title: parsed.title,
            body_text: parsed.body_text,
            blocks: parsed.blocks,
            links: parsed.links,
        })
    }
}

fn is_html(content_type: &str) -> bool {
    content_type.starts_with("text/html") || content_type.starts_with("application/xhtml+xml")
}

fn classify_request_error(url: &Url, e: &reqwest::Error) -> FetchError {
    if e.is_timeout() {
        FetchError::transient(url, "request timeout")
    } else if e.is_connect() {
        FetchError::transient(url, format!("connection failed: {}", e))
    } else if e.is_redirect() {
        FetchError::permanent(url, format!("redirect error: {}", e))
    } else if e.is_request() {
        FetchError::transient(url, format!("request failed: {}", e))
    } else {
        FetchError::permanent(url, e.to_string())
    }
}
