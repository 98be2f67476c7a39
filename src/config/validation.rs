use crate::config::types::{Config, CrawlerConfig, FilterConfig, StoreConfig, UserAgentConfig};
use crate::ConfigError;
use regex::Regex;
use url::Url;

/// Validates the entire configuration
pub fn validate(config: &Config) -> Result<(), ConfigError> {
    validate_crawler_config(&config.crawler)?;
    validate_user_agent_config(&config.user_agent)?;
    validate_store_config(&config.store, config.crawler.concurrency)?;
    validate_seeds(&config.seeds)?;
    validate_filter_config(&config.filter)?;
    Ok(())
}

/// Validates crawler configuration
fn validate_crawler_config(config: &CrawlerConfig) -> Result<(), ConfigError> {
    if config.concurrency < 1 || config.concurrency > 100 {
        return Err(ConfigError::Validation(format!(
            "concurrency must be between 1 and 100, got {}",
            config.concurrency
        )));
    }

    if config.retry_budget > 10 {
        return Err(ConfigError::Validation(format!(
            "retry_budget must be <= 10, got {}",
            config.retry_budget
        )));
    }

    if config.max_backoff_ms < config.retry_backoff_ms {
        return Err(ConfigError::Validation(format!(
            "max_backoff_ms ({}) must be >= retry_backoff_ms ({})",
            config.max_backoff_ms, config.retry_backoff_ms
        )));
    }

    if config.fetch_timeout_secs == 0 || config.commit_timeout_secs == 0 {
        return Err(ConfigError::Validation(
            "fetch_timeout_secs and commit_timeout_secs must be >= 1".to_string(),
        ));
    }

    if config.max_pages == Some(0) {
        return Err(ConfigError::Validation(
            "max_pages must be >= 1 when set".to_string(),
        ));
    }

    if config.store_failure_threshold == Some(0) {
        return Err(ConfigError::Validation(
            "store_failure_threshold must be >= 1 when set".to_string(),
        ));
    }

    Ok(())
}

/// Validates user agent configuration
fn validate_user_agent_config(config: &UserAgentConfig) -> Result<(), ConfigError> {
    if config.crawler_name.is_empty() {
        return Err(ConfigError::Validation(
            "crawler_name cannot be empty".to_string(),
        ));
    }

    if !config
        .crawler_name
        .chars()
        .all(|c| c.is_alphanumeric() || c == '-')
    {
        return Err(ConfigError::Validation(format!(
            "crawler_name must contain only alphanumeric characters and hyphens, got '{}'",
            config.crawler_name
        )));
    }

    Url::parse(&config.contact_url)
        .map_err(|e| ConfigError::InvalidUrl(format!("Invalid contact_url: {}", e)))?;

    validate_email(&config.contact_email)?;

    Ok(())
}

/// Validates store configuration
fn validate_store_config(config: &StoreConfig, concurrency: u32) -> Result<(), ConfigError> {
    if config.database_path.is_empty() {
        return Err(ConfigError::Validation(
            "database_path cannot be empty".to_string(),
        ));
    }

    if let Some(pool_size) = config.pool_size {
        if pool_size < 1 || pool_size > concurrency {
            return Err(ConfigError::Validation(format!(
                "pool_size must be between 1 and concurrency ({}), got {}",
                concurrency, pool_size
            )));
        }
    }

    Ok(())
}

/// Validates the seed list
fn validate_seeds(seeds: &[String]) -> Result<(), ConfigError> {
    if seeds.is_empty() {
        return Err(ConfigError::Validation(
            "at least one seed URL is required".to_string(),
        ));
    }

    for seed in seeds {
        let url = Url::parse(seed)
            .map_err(|e| ConfigError::InvalidUrl(format!("Invalid seed URL '{}': {}", seed, e)))?;

        if url.scheme() != "https" && url.scheme() != "http" {
            return Err(ConfigError::Validation(format!(
                "Seed URL '{}' must use HTTP or HTTPS scheme",
                seed
            )));
        }
    }

    Ok(())
}

/// Validates the link filter rules; a malformed rule set stops the crawl before it starts
pub(crate) fn validate_filter_config(config: &FilterConfig) -> Result<(), ConfigError> {
    for ext in &config.excluded_extensions {
        let ext = ext.trim_start_matches('.');
        if ext.is_empty() || ext.contains('/') {
            return Err(ConfigError::InvalidPattern(format!(
                "Invalid excluded extension '{}'",
                ext
            )));
        }
    }

    for pattern in &config.excluded_path_patterns {
        Regex::new(pattern).map_err(|e| {
            ConfigError::InvalidPattern(format!("Invalid path pattern '{}': {}", pattern, e))
        })?;
    }

    if config.excluded_keywords.iter().any(|k| k.is_empty()) {
        return Err(ConfigError::InvalidPattern(
            "Excluded keywords cannot be empty".to_string(),
        ));
    }

    for pattern in &config.excluded_subdomains {
        validate_domain_pattern(pattern)?;
    }

    Ok(())
}

/// Validates a domain pattern (supports wildcards)
fn validate_domain_pattern(pattern: &str) -> Result<(), ConfigError> {
    if pattern.is_empty() {
        return Err(ConfigError::InvalidPattern(
            "Domain pattern cannot be empty".to_string(),
        ));
    }

    if let Some(domain) = pattern.strip_prefix("*.") {
        validate_domain_string(domain)?;
    } else {
        validate_domain_string(pattern)?;
    }

    Ok(())
}

/// Validates a domain string (without wildcard prefix)
fn validate_domain_string(domain: &str) -> Result<(), ConfigError> {
    if domain.is_empty() {
        return Err(ConfigError::InvalidPattern(
            "Domain cannot be empty".to_string(),
        ));
    }

    if !domain
        .chars()
        .all(|c| c.is_alphanumeric() || c == '.' || c == '-')
    {
        return Err(ConfigError::InvalidPattern(format!(
            "Domain '{}' contains invalid characters",
            domain
        )));
    }

    if domain.starts_with('.')
        || domain.ends_with('.')
        || domain.starts_with('-')
        || domain.ends_with('-')
    {
        return Err(ConfigError::InvalidPattern(format!(
            "Domain '{}' cannot start or end with '.' or '-'",
            domain
        )));
    }

    if domain.contains("..") {
        return Err(ConfigError::InvalidPattern(format!(
            "Domain '{}' cannot contain consecutive dots",
            domain
        )));
    }

    if !domain.contains('.') {
        return Err(ConfigError::InvalidPattern(format!(
            "Domain '{}' must contain at least one dot (e.g., 'example.com')",
            domain
        )));
    }

    Ok(())
}

/// Basic email validation
fn validate_email(email: &str) -> Result<(), ConfigError> {
    if email.is_empty() {
        return Err(ConfigError::Validation(
            "contact_email cannot be empty".to_string(),
        ));
    }

    let parts: Vec<&str> = email.split('@').collect();
    if parts.len() != 2 {
        return Err(ConfigError::Validation(format!(
            "Invalid email format: '{}'",
            email
        )));
    }

    let local = parts[0];
    let domain = parts[1];

    if local.is_empty() || domain.is_empty() {
        return Err(ConfigError::Validation(format!(
            "Invalid email format: '{}'",
            email
        )));
    }

    if !domain.contains('.') {
        return Err(ConfigError::Validation(format!(
            "Invalid email domain: '{}'",
            email
        )));
    }

    Ok(())
}
