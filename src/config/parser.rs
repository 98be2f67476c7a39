use crate::config::types::Config;
use crate::config::validation::validate;
use crate::ConfigError;
use sha2::{Digest, Sha256};
use std::path::Path;

/// Loads and parses a configuration file from the given path
///
/// # Arguments
///
/// * `path` - Path to the TOML configuration file
///
/// # Returns
///
/// * `Ok(Config)` - Successfully loaded and validated configuration
/// * `Err(ConfigError)` - Failed to load, parse, or validate the configuration
pub fn load_config(path: &Path) -> Result<Config, ConfigError> {
    let content = std::fs::read_to_string(path)?;
    parse_config(&content)
}

/// Parses and validates configuration from TOML text
pub fn parse_config(content: &str) -> Result<Config, ConfigError> {
    let config: Config = toml::from_str(content)?;
    validate(&config)?;
    Ok(config)
}

/// Computes a SHA-256 hash of the configuration file content
///
/// The hash is stored with each crawl run so runs can be tied to the
/// configuration that produced them.
///
/// # Returns
///
/// * `Ok(String)` - Hex-encoded SHA-256 hash of the file content
/// * `Err(ConfigError)` - Failed to read the file
pub fn compute_config_hash(path: &Path) -> Result<String, ConfigError> {
    let content = std::fs::read_to_string(path)?;
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    let result = hasher.finalize();
    Ok(hex::encode(result))
}

/// Loads a configuration and returns both the config and its hash
pub fn load_config_with_hash(path: &Path) -> Result<(Config, String), ConfigError> {
    let config = load_config(path)?;
    let hash = compute_config_hash(path)?;
    Ok((config, hash))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{DomainScope, ExtractionMode, DATE_PATH_PATTERN};
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn create_temp_config(content: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file.flush().unwrap();
        file
    }

    const MINIMAL: &str = r#"
seeds = ["https://example.edu/"]

[crawler]
concurrency = 4

[user-agent]
crawler-name = "TestCrawler"
crawler-version = "1.0"
contact-url = "https://example.com/about"
contact-email = "admin@example.com"

[store]
database-path = "./test.db"
"#;

    #[test]
    fn test_load_valid_config() {
        let file = create_temp_config(MINIMAL);
        let config = load_config(file.path()).unwrap();

        assert_eq!(config.seeds, vec!["https://example.edu/".to_string()]);
        assert_eq!(config.crawler.concurrency, 4);
        assert_eq!(config.user_agent.crawler_name, "TestCrawler");
        assert_eq!(config.store.company_id, 1);
    }

    #[test]
    fn test_defaults_applied() {
        let config = parse_config(MINIMAL).unwrap();

        assert_eq!(config.crawler.retry_budget, 2);
        assert_eq!(config.crawler.extraction, ExtractionMode::BodyText);
        assert_eq!(config.crawler.max_pages, None);
        assert_eq!(config.filter.domain_scope, DomainScope::Host);
        assert_eq!(config.filter.excluded_extensions, vec!["pdf".to_string()]);
        assert_eq!(
            config.filter.excluded_path_patterns,
            vec![DATE_PATH_PATTERN.to_string()]
        );
        assert!(!config.normalize.strip_www);
        assert!(config.normalize.strip_tracking_params);
        assert_eq!(config.store.effective_pool_size(4), 4);
        assert_eq!(config.crawler.effective_store_failure_threshold(), 12);
    }

    #[test]
    fn test_full_config() {
        let content = r#"
seeds = ["https://www.ubc.ca/", "https://news.ubc.ca/"]

[crawler]
concurrency = 8
retry-budget = 3
retry-backoff-ms = 100
fetch-timeout-secs = 5
extraction = "blocks"
max-pages = 500

[user-agent]
crawler-name = "UbcCrawler"
crawler-version = "2.0"
contact-url = "https://example.com/about"
contact-email = "admin@example.com"

[store]
database-path = "./crawl.db"
company-id = 7
pool-size = 4

[filter]
domain-scope = "registrable-domain"
excluded-extensions = ["pdf", "docx"]
excluded-keywords = ["login"]
excluded-subdomains = ["*.events.ubc.ca"]

[normalize]
strip-www = true
"#;
        let config = parse_config(content).unwrap();

        assert_eq!(config.crawler.extraction, ExtractionMode::Blocks);
        assert_eq!(config.crawler.max_pages, Some(500));
        assert_eq!(config.store.company_id, 7);
        assert_eq!(config.store.effective_pool_size(8), 4);
        assert_eq!(config.filter.domain_scope, DomainScope::RegistrableDomain);
        assert_eq!(config.filter.excluded_keywords, vec!["login".to_string()]);
        assert!(config.normalize.strip_www);
        assert!(config.normalize.remove_trailing_slash);
    }

    #[test]
    fn test_load_config_with_invalid_path() {
        let result = load_config(Path::new("/nonexistent/config.toml"));
        assert!(result.is_err());
    }

    #[test]
    fn test_load_config_with_invalid_toml() {
        let file = create_temp_config("this is not valid TOML {{{");
        let result = load_config(file.path());
        assert!(matches!(result.unwrap_err(), ConfigError::Parse(_)));
    }

    #[test]
    fn test_load_config_with_validation_error() {
        let content = MINIMAL.replace("concurrency = 4", "concurrency = 0");
        let result = parse_config(&content);
        assert!(matches!(result.unwrap_err(), ConfigError::Validation(_)));
    }

    #[test]
    fn test_bad_path_pattern_is_fatal() {
        let content = format!("{}\n[filter]\nexcluded-path-patterns = [\"(unclosed\"]\n", MINIMAL);
        let result = parse_config(&content);
        assert!(matches!(result.unwrap_err(), ConfigError::InvalidPattern(_)));
    }

    #[test]
    fn test_compute_config_hash() {
        let file = create_temp_config("test content");

        let hash1 = compute_config_hash(file.path()).unwrap();
        let hash2 = compute_config_hash(file.path()).unwrap();

        assert_eq!(hash1, hash2);
        assert_eq!(hash1.len(), 64);
    }

    #[test]
    fn test_different_content_different_hash() {
        let file1 = create_temp_config("content 1");
        let file2 = create_temp_config("content 2");

        let hash1 = compute_config_hash(file1.path()).unwrap();
        let hash2 = compute_config_hash(file2.path()).unwrap();

        assert_ne!(hash1, hash2);
    }
}
