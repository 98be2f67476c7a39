//! URL handling module
//!
//! This module provides URL normalization, domain extraction, registrable
//! domain approximation and wildcard host matching.

mod domain;
mod matcher;
mod normalize;

use crate::config::DomainScope;
use ::url::Url;

// Re-export main functions
pub use domain::{extract_domain, registrable_domain};
pub use matcher::matches_wildcard;
pub use normalize::normalize_url;

/// Returns true when `candidate` lies inside the scope defined by `source`
pub fn in_scope(candidate: &Url, source: &Url, scope: DomainScope) -> bool {
    let (Some(candidate_host), Some(source_host)) =
        (extract_domain(candidate), extract_domain(source))
    else {
        return false;
    };

    match scope {
        DomainScope::Host => candidate_host == source_host,
        DomainScope::RegistrableDomain => {
            registrable_domain(&candidate_host) == registrable_domain(&source_host)
        }
    }
}
