/// Checks if a host matches a wildcard pattern
///
/// Two kinds of patterns are supported:
/// 1. Exact match: "events.example.com" matches only "events.example.com"
/// 2. Wildcard match: "*.events.example.com" matches the bare host and every
///    host below it ("a.events.example.com", "x.y.events.example.com")
///
/// Both sides are expected to be lowercase already.
///
/// # Examples
///
/// ```
/// use scoped_crawler::url::matches_wildcard;
///
/// assert!(matches_wildcard("example.com", "example.com"));
/// assert!(matches_wildcard("*.example.com", "api.v2.example.com"));
/// assert!(!matches_wildcard("*.example.com", "example.org"));
/// ```
pub fn matches_wildcard(pattern: &str, candidate: &str) -> bool {
    if let Some(base) = pattern.strip_prefix("*.") {
        candidate == base
            || (candidate.len() > base.len()
                && candidate.ends_with(base)
                && candidate.as_bytes()[candidate.len() - base.len() - 1] == b'.')
    } else {
        candidate == pattern
    }
}
