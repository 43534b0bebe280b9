//! Upstream response handling.
//!
//! # Responsibilities
//! - Stream the upstream response back without buffering
//! - Strip hop-by-hop headers in both directions
//!
//! # Design Decisions
//! - Status, remaining headers and body pass through verbatim
//! - Hop-by-hop headers belong to one connection and never cross the gateway

use axum::{
    body::Body,
    http::{header, HeaderMap, HeaderName},
    response::Response,
};
use hyper::body::Incoming;

/// Headers scoped to a single connection (RFC 9110 section 7.6.1).
pub const HOP_BY_HOP_HEADERS: [HeaderName; 7] = [
    header::CONNECTION,
    HeaderName::from_static("keep-alive"),
    header::PROXY_AUTHENTICATE,
    header::PROXY_AUTHORIZATION,
    header::TE,
    header::TRAILER,
    header::TRANSFER_ENCODING,
];

/// Remove hop-by-hop headers, including any listed in `Connection`.
pub fn strip_hop_by_hop(headers: &mut HeaderMap) {
    let listed: Vec<HeaderName> = headers
        .get_all(header::CONNECTION)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .filter_map(|name| HeaderName::from_bytes(name.trim().as_bytes()).ok())
        .collect();

    for name in listed {
        headers.remove(name);
    }
    for name in HOP_BY_HOP_HEADERS.iter() {
        headers.remove(name);
    }
    headers.remove(header::UPGRADE);
}

/// Turn an upstream response into the client response, streaming the body.
pub fn into_client_response(upstream: hyper::Response<Incoming>) -> Response {
    let (mut parts, body) = upstream.into_parts();
    strip_hop_by_hop(&mut parts.headers);
    Response::from_parts(parts, Body::new(body))
}
