use serde::Deserialize;

/// Main configuration structure for the crawler
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct Config {
    /// Ordered list of seed URLs; seeds bypass the link filter
    pub seeds: Vec<String>,
    pub crawler: CrawlerConfig,
    #[serde(rename = "user-agent")]
    pub user_agent: UserAgentConfig,
    pub store: StoreConfig,
    #[serde(default)]
    pub filter: FilterConfig,
    #[serde(default)]
    pub normalize: NormalizeConfig,
}

/// Crawler behavior configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct CrawlerConfig {
    /// Number of workers pulling from the frontier
    pub concurrency: u32,

    /// Retries allowed after the first failed attempt (transient fetch or store errors)
    #[serde(default = "default_retry_budget")]
    pub retry_budget: u32,

    /// Base backoff between retries (milliseconds), doubled per attempt
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,

    /// Upper bound for a single backoff (milliseconds)
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,

    /// Timeout for one page load
    #[serde(default = "default_fetch_timeout_secs")]
    pub fetch_timeout_secs: u64,

    /// Timeout for one persistence call
    #[serde(default = "default_commit_timeout_secs")]
    pub commit_timeout_secs: u64,

    /// How page text is collected
    #[serde(default)]
    pub extraction: ExtractionMode,

    /// Stop dispatching once this many pages have been committed
    #[serde(default)]
    pub max_pages: Option<u64>,

    /// Consecutive persistence failures that abort the crawl
    #[serde(default)]
    pub store_failure_threshold: Option<u32>,
}

impl CrawlerConfig {
    /// Effective crawl-level persistence failure threshold
    pub fn effective_store_failure_threshold(&self) -> u32 {
        self.store_failure_threshold
            .unwrap_or(self.concurrency.saturating_mul(self.retry_budget + 1))
            .max(1)
    }
}

fn default_retry_budget() -> u32 {
    2
}

fn default_retry_backoff_ms() -> u64 {
    500
}

fn default_max_backoff_ms() -> u64 {
    10_000
}

fn default_fetch_timeout_secs() -> u64 {
    30
}

fn default_commit_timeout_secs() -> u64 {
    10
}

/// Content extraction strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ExtractionMode {
    /// Whole body text as one string
    #[default]
    BodyText,
    /// Ordered text blocks collected per content element
    Blocks,
}

/// User agent identification configuration
#[derive(Debug, Clone, Deserialize)]
pub struct UserAgentConfig {
    /// Name of the crawler
    #[serde(rename = "crawler-name")]
    pub crawler_name: String,

    /// Version of the crawler
    #[serde(rename = "crawler-version")]
    pub crawler_version: String,

    /// URL with information about the crawler
    #[serde(rename = "contact-url")]
    pub contact_url: String,

    /// Email address for crawler-related contact
    #[serde(rename = "contact-email")]
    pub contact_email: String,
}

impl UserAgentConfig {
    /// Formats the User-Agent header: `Name/Version (+ContactURL; ContactEmail)`
    pub fn header_value(&self) -> String {
        format!(
            "{}/{} (+{}; {})",
            self.crawler_name, self.crawler_version, self.contact_url, self.contact_email
        )
    }
}

/// Persistence configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct StoreConfig {
    /// Path to the SQLite database file
    pub database_path: String,

    /// Tenant tag written on every page row
    #[serde(default = "default_company_id")]
    pub company_id: i64,

    /// Pooled connections; defaults to the crawler concurrency
    #[serde(default)]
    pub pool_size: Option<u32>,
}

impl StoreConfig {
    pub fn effective_pool_size(&self, concurrency: u32) -> u32 {
        self.pool_size.unwrap_or(concurrency).clamp(1, concurrency.max(1))
    }
}

fn default_company_id() -> i64 {
    1
}

/// Domain scope used by the link filter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DomainScope {
    /// Candidate host must equal the source host
    #[default]
    Host,
    /// Candidate must share the source's registrable domain
    RegistrableDomain,
}

/// Link filter rule configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct FilterConfig {
    #[serde(default)]
    pub domain_scope: DomainScope,

    /// File extensions (without the dot) that never hold page content
    #[serde(default = "default_excluded_extensions")]
    pub excluded_extensions: Vec<String>,

    /// Regexes matched against the URL path
    #[serde(default = "default_excluded_path_patterns")]
    pub excluded_path_patterns: Vec<String>,

    /// Substrings that reject a URL anywhere in it
    #[serde(default)]
    pub excluded_keywords: Vec<String>,

    /// Host patterns ("host.example.com" or "*.example.com")
    #[serde(default)]
    pub excluded_subdomains: Vec<String>,
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            domain_scope: DomainScope::default(),
            excluded_extensions: default_excluded_extensions(),
            excluded_path_patterns: default_excluded_path_patterns(),
            excluded_keywords: Vec::new(),
            excluded_subdomains: Vec::new(),
        }
    }
}

fn default_excluded_extensions() -> Vec<String> {
    vec!["pdf".to_string()]
}

/// Date-like archive segments such as `/2021/01/01/`
pub const DATE_PATH_PATTERN: &str = r"/\d{4}/\d{2}/\d{2}(/|$)";

fn default_excluded_path_patterns() -> Vec<String> {
    vec![DATE_PATH_PATTERN.to_string()]
}

/// URL normalization policy
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct NormalizeConfig {
    #[serde(default)]
    pub strip_www: bool,

    #[serde(default = "default_true")]
    pub strip_tracking_params: bool,

    #[serde(default = "default_true")]
    pub remove_trailing_slash: bool,
}

impl Default for NormalizeConfig {
    fn default() -> Self {
        Self {
            strip_www: false,
            strip_tracking_params: true,
            remove_trailing_slash: true,
        }
    }
}

fn default_true() -> bool {
    true
}
