//! Header rewriting for both proxy paths.
//!
//! # Responsibilities
//! - Resolve the upstream target from the edge's routing headers
//! - Re-derive X-Forwarded-* from trusted edge headers
//! - Strip CDN-internal headers before anything leaves the gateway
//! - Replace the WebSocket header set with the edge-supplied header blob
//! - Drop handshake negotiation headers from upstream dial requests
//!
//! # Design Decisions
//! - Header sets are passed by value; each rewrite returns the new set
//! - The WebSocket blob is applied verbatim, no denylist: only the edge
//!   is expected to build it

use std::collections::BTreeMap;

use axum::http::{
    header::{HOST, ORIGIN, SEC_WEBSOCKET_PROTOCOL},
    uri::{Authority, Scheme},
    HeaderMap, HeaderName, HeaderValue, Uri,
};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use thiserror::Error;

pub const X_PM_HOST: &str = "x-pm-host";
pub const X_PM_PORT: &str = "x-pm-port";
pub const X_PM_TOKEN: &str = "x-pm-token";
pub const X_AUTH_TOKEN: &str = "x-auth-token";
pub const CF_CONNECTING_IP: &str = "cf-connecting-ip";
pub const X_FORWARDED_FOR: &str = "x-forwarded-for";
pub const X_FORWARDED_HOST: &str = "x-forwarded-host";
pub const X_FORWARDED_PORT: &str = "x-forwarded-port";
pub const X_FORWARDED_PROTO: &str = "x-forwarded-proto";

/// Query parameter carrying the base64 JSON header blob.
pub const HEADER_BLOB_PARAM: &str = "headers";

/// Prefixes of headers injected by the CDN (matched on lowercase names).
pub const CDN_HEADER_PREFIXES: [&str; 2] = ["cf-", "cdn-loop"];

/// Prefixes of handshake headers that belong to one WebSocket leg only.
pub const NEGOTIATION_HEADER_PREFIXES: [&str; 3] = ["sec-websocket", "upgrade", "connection"];

/// Header rewrite failures.
///
/// `InvalidTarget` only surfaces once the upstream URI is built, after the
/// token check; callers report it as an upstream failure.
#[derive(Debug, Error)]
pub enum RewriteError {
    #[error("X-Pm-Host header missing")]
    MissingHost,

    #[error("invalid upstream target: {0}")]
    InvalidTarget(String),

    #[error("could not decode headers: {0}")]
    Decode(#[from] base64::DecodeError),

    #[error("could not unmarshal headers: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("invalid header in blob: {0}")]
    InvalidHeader(String),
}

/// Upstream selected by the edge's routing headers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpstreamTarget {
    pub scheme: String,
    pub host: String,
    pub port: Option<String>,
}

impl UpstreamTarget {
    /// Resolve the target from `X-Forwarded-Proto`, `X-Pm-Host` and `X-Pm-Port`.
    pub fn resolve(headers: &HeaderMap) -> Result<Self, RewriteError> {
        let host = header_str(headers, X_PM_HOST).ok_or(RewriteError::MissingHost)?;

        let scheme = match header_str(headers, X_FORWARDED_PROTO) {
            Some(proto) => proto.trim_end_matches(':').to_ascii_lowercase(),
            None => "https".to_string(),
        };

        Ok(Self {
            scheme,
            host: host.to_string(),
            port: header_str(headers, X_PM_PORT).map(str::to_string),
        })
    }

    /// `host[:port]` as sent on the wire.
    pub fn authority(&self) -> String {
        match &self.port {
            Some(port) => format!("{}:{}", self.host, port),
            None => self.host.clone(),
        }
    }

    /// Absolute URI for `path_and_query` on this upstream.
    pub fn uri(&self, path_and_query: &str) -> Result<Uri, RewriteError> {
        if self.scheme != "https" && self.scheme != "http" {
            return Err(RewriteError::InvalidTarget(format!("unsupported scheme '{}'", self.scheme)));
        }
        let scheme: Scheme = self
            .scheme
            .parse()
            .map_err(|_| RewriteError::InvalidTarget(self.scheme.clone()))?;
        let authority: Authority = self
            .authority()
            .parse()
            .map_err(|_| RewriteError::InvalidTarget(self.authority()))?;

        Uri::builder()
            .scheme(scheme)
            .authority(authority)
            .path_and_query(path_and_query)
            .build()
            .map_err(|e| RewriteError::InvalidTarget(e.to_string()))
    }
}

/// Result of the HTTP rewrite: where to send the request and with what headers.
#[derive(Debug, Clone)]
pub struct ForwardHeaders {
    pub target: UpstreamTarget,
    pub headers: HeaderMap,
}

/// Rewrite an inbound HTTP header set into the one sent upstream.
pub fn rewrite_forward(mut headers: HeaderMap) -> Result<ForwardHeaders, RewriteError> {
    let target = UpstreamTarget::resolve(&headers)?;

    match headers.get(X_FORWARDED_HOST).cloned() {
        Some(forwarded_host) => {
            headers.insert(HOST, forwarded_host.clone());
            headers.insert(ORIGIN, forwarded_host.clone());
            headers.insert(X_FORWARDED_HOST, forwarded_host);
        }
        None => {
            // The client fills Host from the target authority.
            headers.remove(HOST);
            headers.remove(ORIGIN);
        }
    }

    match headers.get(CF_CONNECTING_IP).cloned() {
        Some(client_ip) => {
            headers.insert(X_FORWARDED_FOR, client_ip);
        }
        None => {
            headers.remove(X_FORWARDED_FOR);
        }
    }
    headers.insert(X_FORWARDED_PROTO, HeaderValue::from_static("https"));

    // Some upstreams drop X-Auth-Token on the way in, so the edge ships it
    // under another name.
    if let Some(token) = headers.remove(X_PM_TOKEN) {
        if !token.is_empty() {
            headers.insert(X_AUTH_TOKEN, token);
        }
    }
    headers.remove(X_FORWARDED_PORT);

    strip_cdn_headers(&mut headers);

    Ok(ForwardHeaders { target, headers })
}

/// Remove every `Cf-*` and `Cdn-Loop*` header.
pub fn strip_cdn_headers(headers: &mut HeaderMap) {
    remove_matching(headers, &CDN_HEADER_PREFIXES);
}

/// Replace the whole header set with the blob in the `headers` query parameter.
///
/// Existing headers never survive, even when no blob is present.
pub fn rewrite_from_query(mut headers: HeaderMap, query: Option<&str>) -> Result<HeaderMap, RewriteError> {
    headers.clear();

    let Some(blob) = query.and_then(header_blob) else {
        return Ok(headers);
    };

    let decoded = STANDARD.decode(blob.as_bytes())?;
    let pairs: BTreeMap<String, String> = serde_json::from_slice(&decoded)?;

    for (name, value) in pairs {
        let header_name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|_| RewriteError::InvalidHeader(name.clone()))?;
        let header_value =
            HeaderValue::from_str(&value).map_err(|_| RewriteError::InvalidHeader(name.clone()))?;
        headers.insert(header_name, header_value);
    }

    Ok(headers)
}

/// Copy of `headers` fit for an upstream WebSocket dial.
pub fn dial_headers(headers: &HeaderMap) -> HeaderMap {
    let mut dial = headers.clone();
    remove_matching(&mut dial, &NEGOTIATION_HEADER_PREFIXES);
    dial
}

/// Subprotocols requested in `Sec-WebSocket-Protocol`, split on commas and trimmed.
pub fn requested_protocols(headers: &HeaderMap) -> Vec<String> {
    headers
        .get(SEC_WEBSOCKET_PROTOCOL)
        .and_then(|v| v.to_str().ok())
        .map(|value| {
            value
                .split(',')
                .map(str::trim)
                .filter(|p| !p.is_empty())
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

fn header_blob(query: &str) -> Option<String> {
    url::form_urlencoded::parse(query.as_bytes())
        .find(|(key, _)| key == HEADER_BLOB_PARAM)
        .map(|(_, value)| value.into_owned())
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
}

fn remove_matching(headers: &mut HeaderMap, prefixes: &[&str]) {
    let doomed: Vec<HeaderName> = headers
        .keys()
        .filter(|name| prefixes.iter().any(|p| name.as_str().starts_with(p)))
        .cloned()
        .collect();
    for name in doomed {
        headers.remove(&name);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn map(pairs: &[(&str, &str)]) -> HeaderMap {
        let mut headers = HeaderMap::new();
        for (k, v) in pairs {
            headers.append(
                HeaderName::from_bytes(k.as_bytes()).unwrap(),
                HeaderValue::from_str(v).unwrap(),
            );
        }
        headers
    }

    fn encode_blob(json: &str) -> String {
        let b64 = STANDARD.encode(json);
        url::form_urlencoded::Serializer::new(String::new())
            .append_pair(HEADER_BLOB_PARAM, &b64)
            .finish()
    }

    #[test]
    fn resolves_target_with_defaults() {
        let target = UpstreamTarget::resolve(&map(&[("X-Pm-Host", "10.1.2.3")])).unwrap();
        assert_eq!(target.scheme, "https");
        assert_eq!(target.authority(), "10.1.2.3");

        let target = UpstreamTarget::resolve(&map(&[
            ("X-Pm-Host", "internal.example"),
            ("X-Pm-Port", "8443"),
            ("X-Forwarded-Proto", "http"),
        ]))
        .unwrap();
        assert_eq!(target.scheme, "http");
        assert_eq!(target.authority(), "internal.example:8443");
        assert_eq!(
            target.uri("/redfish/v1?x=1").unwrap().to_string(),
            "http://internal.example:8443/redfish/v1?x=1"
        );
    }

    #[test]
    fn missing_or_empty_host_is_rejected() {
        assert!(matches!(
            UpstreamTarget::resolve(&HeaderMap::new()),
            Err(RewriteError::MissingHost)
        ));
        assert!(matches!(
            UpstreamTarget::resolve(&map(&[("X-Pm-Host", "")])),
            Err(RewriteError::MissingHost)
        ));
    }

    #[test]
    fn unknown_scheme_fails_when_building_the_uri() {
        let target = UpstreamTarget::resolve(&map(&[("X-Pm-Host", "a"), ("X-Forwarded-Proto", "gopher")]))
            .unwrap();
        assert_eq!(target.scheme, "gopher");
        assert!(matches!(target.uri("/"), Err(RewriteError::InvalidTarget(_))));
    }

    #[test]
    fn edge_style_proto_is_normalized() {
        let target = UpstreamTarget::resolve(&map(&[("X-Pm-Host", "a"), ("X-Forwarded-Proto", "HTTPS:")])).unwrap();
        assert_eq!(target.scheme, "https");
    }

    #[test]
    fn forward_rewrite_derives_proxy_headers() {
        let rewritten = rewrite_forward(map(&[
            ("Host", "gateway.local:8443"),
            ("X-Pm-Host", "internal.example"),
            ("X-Pm-Port", "443"),
            ("X-Forwarded-Host", "console.example.com"),
            ("X-Forwarded-Proto", "https"),
            ("X-Forwarded-Port", "443"),
            ("Cf-Connecting-Ip", "203.0.113.9"),
            ("X-Pm-Token", "ilo-session"),
            ("Origin", "https://evil.example"),
        ]))
        .unwrap();

        let h = &rewritten.headers;
        assert_eq!(rewritten.target.authority(), "internal.example:443");
        assert_eq!(h["host"], "console.example.com");
        assert_eq!(h["x-forwarded-host"], "console.example.com");
        assert_eq!(h["origin"], "console.example.com");
        assert_eq!(h["x-forwarded-for"], "203.0.113.9");
        assert_eq!(h["x-forwarded-proto"], "https");
        assert_eq!(h["x-auth-token"], "ilo-session");
        assert!(h.get(X_PM_TOKEN).is_none());
        assert!(h.get(X_FORWARDED_PORT).is_none());
        assert!(h.get(CF_CONNECTING_IP).is_none());
    }

    #[test]
    fn forward_rewrite_without_edge_headers() {
        let rewritten = rewrite_forward(map(&[
            ("Host", "gateway.local"),
            ("X-Pm-Host", "internal.example"),
            ("X-Forwarded-For", "198.51.100.1"),
            ("X-Pm-Token", ""),
        ]))
        .unwrap();

        let h = &rewritten.headers;
        assert!(h.get(HOST).is_none());
        assert!(h.get(ORIGIN).is_none());
        assert!(h.get(X_FORWARDED_FOR).is_none());
        assert!(h.get(X_AUTH_TOKEN).is_none());
        assert_eq!(h["x-forwarded-proto"], "https");
    }

    #[test]
    fn forward_rewrite_strips_every_cdn_header() {
        let rewritten = rewrite_forward(map(&[
            ("X-Pm-Host", "internal.example"),
            ("CF-Ray", "abc"),
            ("Cf-Ipcountry", "DE"),
            ("cf-visitor", "{\"scheme\":\"https\"}"),
            ("CDN-Loop", "cloudflare"),
            ("Cdn-Loop-Extra", "1"),
            ("Accept", "text/html"),
        ]))
        .unwrap();

        for name in rewritten.headers.keys() {
            assert!(!name.as_str().starts_with("cf-"), "{} survived", name);
            assert!(!name.as_str().starts_with("cdn-loop"), "{} survived", name);
        }
        assert_eq!(rewritten.headers["accept"], "text/html");
    }

    #[test]
    fn query_rewrite_replaces_everything() {
        let inbound = map(&[
            ("Cookie", "pm-session=smuggled"),
            ("X-Injected", "1"),
            ("Sec-WebSocket-Key", "dGhlIHNhbXBsZSBub25jZQ=="),
        ]);
        let query = encode_blob(r#"{"Cookie":"pm-session=tok","Sec-Websocket-Protocol":"binary, base64","User-Agent":"edge"}"#);

        let headers = rewrite_from_query(inbound, Some(&query)).unwrap();

        let expected = map(&[
            ("cookie", "pm-session=tok"),
            ("sec-websocket-protocol", "binary, base64"),
            ("user-agent", "edge"),
        ]);
        assert_eq!(headers, expected);
    }

    #[test]
    fn query_rewrite_without_blob_clears() {
        let headers = rewrite_from_query(map(&[("X-Injected", "1")]), Some("foo=bar")).unwrap();
        assert!(headers.is_empty());
        let headers = rewrite_from_query(map(&[("X-Injected", "1")]), None).unwrap();
        assert!(headers.is_empty());
    }

    #[test]
    fn query_rewrite_reports_decode_and_parse_errors() {
        assert!(matches!(
            rewrite_from_query(HeaderMap::new(), Some("headers=%%%not-base64")),
            Err(RewriteError::Decode(_))
        ));

        let not_json = encode_blob("not json");
        assert!(matches!(
            rewrite_from_query(HeaderMap::new(), Some(&not_json)),
            Err(RewriteError::Parse(_))
        ));

        let nested = encode_blob(r#"{"a":{"b":"c"}}"#);
        assert!(matches!(
            rewrite_from_query(HeaderMap::new(), Some(&nested)),
            Err(RewriteError::Parse(_))
        ));

        let bad_name = encode_blob(r#"{"bad header":"x"}"#);
        assert!(matches!(
            rewrite_from_query(HeaderMap::new(), Some(&bad_name)),
            Err(RewriteError::InvalidHeader(_))
        ));
    }

    #[test]
    fn dial_headers_drop_negotiation() {
        let dial = dial_headers(&map(&[
            ("Sec-WebSocket-Key", "k"),
            ("Sec-WebSocket-Version", "13"),
            ("Sec-Websocket-Extensions", "permessage-deflate"),
            ("Upgrade", "websocket"),
            ("Connection", "Upgrade"),
            ("Cookie", "pm-session=tok"),
            ("Origin", "https://console.example.com"),
        ]));

        assert_eq!(dial.len(), 2);
        assert_eq!(dial["cookie"], "pm-session=tok");
        assert_eq!(dial["origin"], "https://console.example.com");
    }

    #[test]
    fn protocols_are_split_and_trimmed() {
        let protocols = requested_protocols(&map(&[("Sec-WebSocket-Protocol", " binary ,base64,, ")]));
        assert_eq!(protocols, vec!["binary".to_string(), "base64".to_string()]);
        assert!(requested_protocols(&HeaderMap::new()).is_empty());
    }
}
