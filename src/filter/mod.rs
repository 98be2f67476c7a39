//! Link filter deciding which discovered URLs may be enqueued
//!
//! The rule set is built once from [`FilterConfig`] and then evaluated as a
//! pure predicate: a candidate is rejected if ANY rule matches. Evaluation
//! stops at the first match; since rules are independent the order never
//! changes the outcome, only which rejection gets reported.

mod rules;

pub use rules::{FilterRule, Rejection};

use crate::config::FilterConfig;
use crate::ConfigError;
use regex::Regex;
use url::Url;

/// Ordered, declarative set of exclusion rules
#[derive(Debug, Clone)]
pub struct FilterRuleSet {
    rules: Vec<FilterRule>,
}

impl FilterRuleSet {
    /// Builds the rule set from configuration
    ///
    /// Fails with `ConfigError::InvalidPattern` when a path pattern does not
    /// compile; the crawl must not start in that case.
    pub fn from_config(config: &FilterConfig) -> Result<Self, ConfigError> {
        crate::config::validate_filter_config(config)?;

        let mut rules = Vec::new();

        if !config.excluded_extensions.is_empty() {
            rules.push(FilterRule::Extension(
                config
                    .excluded_extensions
                    .iter()
                    .map(|ext| ext.trim_start_matches('.').to_lowercase())
                    .collect(),
            ));
        }

        if !config.excluded_path_patterns.is_empty() {
            let patterns = config
                .excluded_path_patterns
                .iter()
                .map(|p| {
                    Regex::new(p).map_err(|e| {
                        ConfigError::InvalidPattern(format!("Invalid path pattern '{}': {}", p, e))
                    })
                })
                .collect::<Result<Vec<_>, _>>()?;
            rules.push(FilterRule::PathPattern(patterns));
        }

        if !config.excluded_keywords.is_empty() {
            rules.push(FilterRule::Keyword(
                config
                    .excluded_keywords
                    .iter()
                    .map(|k| k.to_lowercase())
                    .collect(),
            ));
        }

        if !config.excluded_subdomains.is_empty() {
            rules.push(FilterRule::Subdomain(
                config
                    .excluded_subdomains
                    .iter()
                    .map(|p| p.to_lowercase())
                    .collect(),
            ));
        }

        rules.push(FilterRule::Scope(config.domain_scope));

        Ok(Self { rules })
    }

    /// Returns the first rule that rejects `candidate`, if any
    pub fn evaluate(&self, candidate: &Url, source: &Url) -> Option<Rejection> {
        if candidate.scheme() != "http" && candidate.scheme() != "https" {
            return Some(Rejection::UnsupportedScheme(candidate.scheme().to_string()));
        }

        self.rules
            .iter()
            .find_map(|rule| rule.check(candidate, source))
    }

    /// Returns true when `candidate`, found on `source`, may be enqueued
    ///
    /// # Examples
    ///
    /// ```
    /// use scoped_crawler::config::FilterConfig;
    /// use scoped_crawler::filter::FilterRuleSet;
    /// use url::Url;
    ///
    /// let rules = FilterRuleSet::from_config(&FilterConfig::default()).unwrap();
    /// let src = Url::parse("https://example.edu/").unwrap();
    /// assert!(!rules.accept(&Url::parse("https://example.edu/doc.pdf").unwrap(), &src));
    /// assert!(rules.accept(&Url::parse("https://example.edu/about").unwrap(), &src));
    /// ```
    pub fn accept(&self, candidate: &Url, source: &Url) -> bool {
        self.evaluate(candidate, source).is_none()
    }

    /// Number of configured rules
    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}
