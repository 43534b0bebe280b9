//! Session cookie extraction.

use axum::http::{header::COOKIE, HeaderMap};

/// Find the value of cookie `name` across all `Cookie` headers.
///
/// Surrounding double quotes are stripped. Returns `None` when the cookie is
/// absent or its value contains characters outside the RFC 6265
/// `cookie-octet` set.
pub fn session_cookie(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get_all(COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|line| line.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(key, _)| key.trim() == name)
        .and_then(|(_, value)| {
            let value = value.trim();
            let value = value
                .strip_prefix('"')
                .and_then(|v| v.strip_suffix('"'))
                .unwrap_or(value);
            value.bytes().all(is_cookie_octet).then(|| value.to_string())
        })
}

fn is_cookie_octet(b: u8) -> bool {
    matches!(b, 0x21 | 0x23..=0x2B | 0x2D..=0x3A | 0x3C..=0x5B | 0x5D..=0x7E)
}
