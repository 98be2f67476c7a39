//! Shared helpers for the integration tests

use async_trait::async_trait;
use scoped_crawler::config::{parse_config, Config};
use scoped_crawler::crawler::{FetchError, LoadedPage, PageFetcher};
use scoped_crawler::storage::SqliteDedupStore;
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};
use url::Url;
use wiremock::ResponseTemplate;

/// Builds a validated configuration for a crawl over `seeds`
///
/// `crawler_extra` is appended to the `[crawler]` table.
pub fn create_test_config(seeds: &[String], db: &Path, crawler_extra: &str) -> Config {
    let seeds = seeds
        .iter()
        .map(|s| format!("\"{}\"", s))
        .collect::<Vec<_>>()
        .join(", ");

    parse_config(&config_text(&seeds, db, crawler_extra)).expect("test config should be valid")
}

/// Raw TOML for `create_test_config`, for tests that write the file themselves
pub fn config_text(seeds: &str, db: &Path, crawler_extra: &str) -> String {
    format!(
        r#"
seeds = [{}]

[crawler]
concurrency = 4
retry-backoff-ms = 1
max-backoff-ms = 5
fetch-timeout-secs = 5
commit-timeout-secs = 5
{}

[user-agent]
crawler-name = "TestCrawler"
crawler-version = "1.0.0"
contact-url = "https://example.com/contact"
contact-email = "test@example.com"

[store]
database-path = "{}"
"#,
        seeds,
        crawler_extra,
        db.display()
    )
}

pub fn open_store(db: &Path, pool_size: usize) -> Arc<SqliteDedupStore> {
    Arc::new(SqliteDedupStore::open(db, 1, pool_size).expect("store should open"))
}

/// A small HTML document linking to `links`
pub fn html_page(title: &str, links: &[&str]) -> String {
    let anchors: String = links
        .iter()
        .map(|href| format!(r#"<li><a href="{}">{}</a></li>"#, href, href))
        .collect();
    format!(
        "<html><head><title>{}</title></head><body><h1>{}</h1><p>Welcome to {}.</p><ul>{}</ul></body></html>",
        title, title, title, anchors
    )
}

/// 200 response with an HTML content type
pub fn html_response(title: &str, links: &[&str]) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_raw(html_page(title, links), "text/html; charset=utf-8")
}

pub fn url(s: &str) -> Url {
    Url::parse(s).expect("test URL should parse")
}

/// In-memory link graph that counts how often each URL was loaded
///
/// URLs missing from the graph fail permanently, like an HTTP 404.
#[derive(Default)]
pub struct GraphFetcher {
    pages: HashMap<String, Vec<Url>>,
    loads: Mutex<HashMap<String, usize>>,
}

impl GraphFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn page(mut self, from: &str, links: &[&str]) -> Self {
        self.pages
            .insert(from.to_string(), links.iter().map(|l| url(l)).collect());
        self
    }

    /// Number of loads of `url` so far
    pub fn loads_of(&self, url: &str) -> usize {
        self.loads.lock().unwrap().get(url).copied().unwrap_or(0)
    }

    pub fn load_counts(&self) -> HashMap<String, usize> {
        self.loads.lock().unwrap().clone()
    }
}

#[async_trait]
impl PageFetcher for GraphFetcher {
    async fn load(&self, url: &Url) -> Result<LoadedPage, FetchError> {
        *self
            .loads
            .lock()
            .unwrap()
            .entry(url.as_str().to_string())
            .or_default() += 1;

        // Give other workers a chance to interleave
        tokio::task::yield_now().await;

        let links = self
            .pages
            .get(url.as_str())
            .ok_or_else(|| FetchError::permanent(url, "HTTP 404"))?;
        Ok(LoadedPage {
            final_url: Some(url.clone()),
            title: Some(url.path().to_string()),
            body_text: format!("content of {}", url),
            blocks: Vec::new(),
            links: links.clone(),
        })
    }
}
