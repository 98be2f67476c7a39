//! Individual exclusion rules
//!
//! Every rule is a pure function of the candidate URL, the source URL and the
//! rule's own configuration.

use crate::config::DomainScope;
use crate::url::{extract_domain, in_scope, matches_wildcard};
use regex::Regex;
use std::fmt;
use url::Url;

/// One exclusion predicate; a URL is rejected when the rule matches
#[derive(Debug, Clone)]
pub enum FilterRule {
    /// Candidate must stay inside the source's host or registrable domain
    Scope(DomainScope),
    /// Last path segment ends with one of these extensions (lowercase, no dot)
    Extension(Vec<String>),
    /// Path matches one of these patterns
    PathPattern(Vec<Regex>),
    /// URL contains one of these substrings (lowercase)
    Keyword(Vec<String>),
    /// Host matches one of these exact or wildcard patterns
    Subdomain(Vec<String>),
}

/// Name of the rule that rejected a URL, with the offending value
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rejection {
    UnsupportedScheme(String),
    OutOfScope(String),
    Extension(String),
    PathPattern(String),
    Keyword(String),
    Subdomain(String),
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnsupportedScheme(s) => write!(f, "unsupported scheme '{}'", s),
            Self::OutOfScope(host) => write!(f, "host '{}' is out of scope", host),
            Self::Extension(ext) => write!(f, "excluded extension '.{}'", ext),
            Self::PathPattern(p) => write!(f, "path matches '{}'", p),
            Self::Keyword(k) => write!(f, "contains keyword '{}'", k),
            Self::Subdomain(p) => write!(f, "host matches '{}'", p),
        }
    }
}

impl FilterRule {
    /// Returns the rejection when this rule matches the candidate
    pub fn check(&self, candidate: &Url, source: &Url) -> Option<Rejection> {
        match self {
            Self::Scope(scope) => {
                if in_scope(candidate, source, *scope) {
                    None
                } else {
                    Some(Rejection::OutOfScope(
                        extract_domain(candidate).unwrap_or_default(),
                    ))
                }
            }
            Self::Extension(extensions) => {
                let last = candidate
                    .path_segments()
                    .and_then(|mut segments| segments.next_back())
                    .unwrap_or("")
                    .to_lowercase();
                extensions
                    .iter()
                    .find(|ext| {
                        last.len() > ext.len()
                            && last.ends_with(ext.as_str())
                            && last.as_bytes()[last.len() - ext.len() - 1] == b'.'
                    })
                    .map(|ext| Rejection::Extension(ext.clone()))
            }
            Self::PathPattern(patterns) => patterns
                .iter()
                .find(|re| re.is_match(candidate.path()))
                .map(|re| Rejection::PathPattern(re.as_str().to_string())),
            Self::Keyword(keywords) => {
                let haystack = candidate.as_str().to_lowercase();
                keywords
                    .iter()
                    .find(|k| haystack.contains(k.as_str()))
                    .map(|k| Rejection::Keyword(k.clone()))
            }
            Self::Subdomain(patterns) => {
                let host = extract_domain(candidate)?;
                patterns
                    .iter()
                    .find(|p| matches_wildcard(p, &host))
                    .map(|p| Rejection::Subdomain(p.clone()))
            }
        }
    }
}
