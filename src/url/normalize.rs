use crate::config::NormalizeConfig;
use crate::UrlError;
use url::Url;

/// List of tracking query parameters to remove during normalization
const TRACKING_PARAMS: &[&str] = &[
    "utm_source",
    "utm_medium",
    "utm_campaign",
    "utm_term",
    "utm_content",
    "fbclid",
    "gclid",
    "mc_eid",
    "ref",
    "source",
];

/// Normalizes a URL so equal pages share one dedup key
///
/// # Normalization Steps
///
/// 1. Parse the URL; reject if malformed
/// 2. Reject anything other than http:// and https://
/// 3. Lowercase the host (always) and strip `www.` (if configured)
/// 4. Normalize path:
///    - Decode escapes of unreserved characters, uppercase the remaining escapes
///    - Remove dot segments (. and ..) and duplicate slashes
///    - Remove trailing slash, except for root / (if configured)
///    - Empty path becomes /
/// 5. Remove fragment (everything after #)
/// 6. Remove tracking query parameters (if configured)
/// 7. Sort remaining query parameters alphabetically
/// 8. Remove empty query string (trailing ?)
///
/// The same policy must be used for every dedup and enqueue decision.
///
/// # Examples
///
/// ```
/// use scoped_crawler::config::NormalizeConfig;
/// use scoped_crawler::url::normalize_url;
///
/// let url = normalize_url("https://EXAMPLE.edu/page/#top", &NormalizeConfig::default()).unwrap();
/// assert_eq!(url.as_str(), "https://example.edu/page");
/// ```
pub fn normalize_url(url_str: &str, policy: &NormalizeConfig) -> Result<Url, UrlError> {
    let mut url = Url::parse(url_str.trim()).map_err(|e| UrlError::Parse(e.to_string()))?;

    if url.scheme() != "http" && url.scheme() != "https" {
        return Err(UrlError::InvalidScheme(format!(
            "Only HTTP and HTTPS schemes are supported, got: {}",
            url.scheme()
        )));
    }

    if let Some(host) = url.host_str() {
        let mut normalized_host = host.to_lowercase();

        if policy.strip_www {
            if let Some(stripped) = normalized_host.strip_prefix("www.") {
                normalized_host = stripped.to_string();
            }
        }

        url.set_host(Some(&normalized_host))
            .map_err(|e| UrlError::Malformed(format!("Failed to set host: {}", e)))?;
    } else {
        return Err(UrlError::MissingDomain);
    }

    let normalized_path = normalize_path(url.path(), policy.remove_trailing_slash);
    url.set_path(&normalized_path);

    url.set_fragment(None);

    if url.query().is_some() {
        let params = filter_and_sort_query_params(&url, policy.strip_tracking_params);

        if params.is_empty() {
            url.set_query(None);
        } else {
            url.query_pairs_mut().clear().extend_pairs(params);
        }
    }

    Ok(url)
}

/// Normalizes a URL path by removing dot segments and, optionally, trailing slashes
fn normalize_path(path: &str, remove_trailing_slash: bool) -> String {
    if path.is_empty() {
        return "/".to_string();
    }

    let mut normalized_segments: Vec<String> = Vec::new();

    for segment in path.split('/') {
        let segment = normalize_percent_encoding(segment);
        match segment.as_str() {
            "" | "." => continue,
            ".." => {
                normalized_segments.pop();
            }
            _ => normalized_segments.push(segment),
        }
    }

    if normalized_segments.is_empty() {
        return "/".to_string();
    }

    let mut result = format!("/{}", normalized_segments.join("/"));

    if !remove_trailing_slash && path.ends_with('/') {
        result.push('/');
    }

    result
}

/// Decodes `%XX` escapes of unreserved characters (ALPHA, DIGIT, `-._~`)
/// and uppercases the hex digits of every other escape
fn normalize_percent_encoding(segment: &str) -> String {
    let bytes = segment.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;

    while i < bytes.len() {
        if bytes[i] == b'%' && i + 2 < bytes.len() {
            if let (Some(hi), Some(lo)) = (hex_value(bytes[i + 1]), hex_value(bytes[i + 2])) {
                let decoded = hi * 16 + lo;
                if is_unreserved(decoded) {
                    out.push(decoded);
                } else {
                    out.push(b'%');
                    out.push(bytes[i + 1].to_ascii_uppercase());
                    out.push(bytes[i + 2].to_ascii_uppercase());
                }
                i += 3;
                continue;
            }
        }
        out.push(bytes[i]);
        i += 1;
    }

    String::from_utf8_lossy(&out).into_owned()
}

fn hex_value(b: u8) -> Option<u8> {
    (b as char).to_digit(16).map(|d| d as u8)
}

fn is_unreserved(b: u8) -> bool {
    b.is_ascii_alphanumeric() || matches!(b, b'-' | b'.' | b'_' | b'~')
}

/// Filters out tracking parameters and sorts remaining query parameters
fn filter_and_sort_query_params(url: &Url, strip_tracking: bool) -> Vec<(String, String)> {
    let mut params: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(key, _)| !(strip_tracking && is_tracking_param(key)))
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();

    params.sort();
    params
}

/// Checks if a query parameter is a tracking parameter
fn is_tracking_param(key: &str) -> bool {
    TRACKING_PARAMS.contains(&key) || key.starts_with("utm_")
}
