use std::net::IpAddr;
use url::Url;

/// Second-level labels that sit under a two-letter country TLD (e.g. `co.uk`)
const COMMON_SECOND_LEVEL: &[&str] = &["co", "com", "ac", "edu", "gov", "org", "net"];

/// Extracts the domain from a URL
///
/// Retrieves the host portion of a URL and converts it to lowercase.
///
/// # Examples
///
/// ```
/// use url::Url;
/// use scoped_crawler::url::extract_domain;
///
/// let url = Url::parse("https://EXAMPLE.COM/path").unwrap();
/// assert_eq!(extract_domain(&url), Some("example.com".to_string()));
/// ```
pub fn extract_domain(url: &Url) -> Option<String> {
    url.host_str().map(|h| h.to_lowercase())
}

/// Returns the registrable domain of a host
///
/// This is an approximation of the public suffix rules: the last two labels,
/// or the last three when the host ends in a common second-level label under
/// a two-letter country code (`news.bbc.co.uk` -> `bbc.co.uk`). IP addresses
/// and single-label hosts are returned unchanged.
///
/// # Examples
///
/// ```
/// use scoped_crawler::url::registrable_domain;
///
/// assert_eq!(registrable_domain("news.ubc.ca"), "ubc.ca");
/// assert_eq!(registrable_domain("www.bbc.co.uk"), "bbc.co.uk");
/// ```
pub fn registrable_domain(host: &str) -> String {
    let host = host.trim_end_matches('.').to_lowercase();

    if host.parse::<IpAddr>().is_ok() || host.starts_with('[') {
        return host;
    }

    let labels: Vec<&str> = host.split('.').collect();
    if labels.len() <= 2 {
        return host;
    }

    let tld = labels[labels.len() - 1];
    let second = labels[labels.len() - 2];
    let keep = if tld.len() == 2 && COMMON_SECOND_LEVEL.contains(&second) {
        3
    } else {
        2
    };

    labels[labels.len() - keep..].join(".")
}
