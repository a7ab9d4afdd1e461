//! Utility functions and helpers.

pub mod http;

use url::Url;

/// Parse an absolute `http`/`https` URL.
pub fn parse_http_url(url_str: &str) -> Option<Url> {
    Url::parse(url_str.trim())
        .ok()
        .filter(|u| matches!(u.scheme(), "http" | "https") && u.has_host())
}

/// Check that a string is an absolute `http`/`https` URL.
pub fn is_http_url(url_str: &str) -> bool {
    parse_http_url(url_str).is_some()
}
