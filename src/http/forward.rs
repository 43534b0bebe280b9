//! HTTP forwarding to the upstream named by the edge.
//!
//! # Responsibilities
//! - Authenticate the request against the `X-Pm-Host` identity
//! - Rewrite headers and resolve the upstream target
//! - Stream the request upstream and the response back
//!
//! # Design Decisions
//! - No retries: a failed exchange is a 502 with a JSON error body
//! - Method, path, query and body are forwarded unchanged
//! - The upstream connection is HTTP/1.1 whatever the inbound version

use axum::{
    body::Body,
    extract::State,
    http::{Method, Request},
    response::{IntoResponse, Response},
};
use hyper_rustls::{HttpsConnector, HttpsConnectorBuilder};
use hyper_util::{
    client::legacy::{connect::HttpConnector, Client},
    rt::TokioExecutor,
};
use rustls::ClientConfig;
use std::time::Instant;

use crate::error::GatewayError;
use crate::http::request::request_id;
use crate::http::response::{into_client_response, strip_hop_by_hop};
use crate::http::server::AppState;
use crate::observability::metrics;
use crate::security::cookie::session_cookie;
use crate::security::headers::{rewrite_forward, UpstreamTarget};

pub type UpstreamClient = Client<HttpsConnector<HttpConnector>, Body>;

/// One request on its way upstream, after rewriting.
#[derive(Debug)]
pub struct ProxyRequestContext {
    pub target: UpstreamTarget,
    pub method: Method,
    pub path_and_query: String,
    pub headers: axum::http::HeaderMap,
    pub body: Body,
}

impl ProxyRequestContext {
    /// Build the outbound request. Hop-by-hop headers are dropped.
    pub fn into_request(self) -> Result<Request<Body>, GatewayError> {
        let uri = self
            .target
            .uri(&self.path_and_query)
            .map_err(GatewayError::unreachable_target)?;
        let mut headers = self.headers;
        strip_hop_by_hop(&mut headers);

        let mut request = Request::new(self.body);
        *request.method_mut() = self.method;
        *request.uri_mut() = uri;
        *request.headers_mut() = headers;
        Ok(request)
    }
}

/// Pooled client for upstream HTTP(S) exchanges.
#[derive(Clone)]
pub struct HttpForwarder {
    client: UpstreamClient,
}

impl HttpForwarder {
    pub fn new(tls: ClientConfig) -> Self {
        let https = HttpsConnectorBuilder::new()
            .with_tls_config(tls)
            .https_or_http()
            .enable_http1()
            .build();
        let client = Client::builder(TokioExecutor::new()).build(https);
        Self { client }
    }

    /// Send the request and return the upstream response, body unread.
    pub async fn forward(&self, ctx: ProxyRequestContext) -> Result<Response, GatewayError> {
        let request = ctx.into_request()?;
        match self.client.request(request).await {
            Ok(response) => Ok(into_client_response(response)),
            Err(e) => Err(GatewayError::Upstream {
                status: None,
                message: e.to_string(),
            }),
        }
    }
}

/// Fallback handler: every request that is not a tunnel is forwarded.
pub async fn http_proxy(State(state): State<AppState>, request: Request<Body>) -> Response {
    let start = Instant::now();
    let request_id = request_id(request.headers()).to_string();
    let method = request.method().clone();
    let path = request.uri().path().to_string();

    let response = match proxy_http(&state, request).await {
        Ok(response) => {
            tracing::debug!(
                request_id = %request_id,
                method = %method,
                path = %path,
                status = response.status().as_u16(),
                "Forwarded request"
            );
            response
        }
        Err(e) => {
            tracing::warn!(
                request_id = %request_id,
                method = %method,
                path = %path,
                error = %e,
                "Request rejected"
            );
            e.into_response()
        }
    };

    metrics::record_request("http", response.status().as_u16(), start);
    response
}

async fn proxy_http(state: &AppState, request: Request<Body>) -> Result<Response, GatewayError> {
    let (parts, body) = request.into_parts();

    let forward = rewrite_forward(parts.headers)?;
    let token = session_cookie(&forward.headers, &state.cookie_name);
    if !state.validator.validate(token.as_deref(), &forward.target.host) {
        return Err(GatewayError::Unauthorized);
    }

    let path_and_query = parts
        .uri
        .path_and_query()
        .map(|pq| pq.as_str().to_string())
        .unwrap_or_else(|| "/".to_string());

    let ctx = ProxyRequestContext {
        target: forward.target,
        method: parts.method,
        path_and_query,
        headers: forward.headers,
        body,
    };
    state.forwarder.forward(ctx).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn target() -> UpstreamTarget {
        UpstreamTarget {
            scheme: "https".into(),
            host: "origin.internal".into(),
            port: Some("8443".into()),
        }
    }

    #[test]
    fn builds_absolute_request() {
        let mut headers = axum::http::HeaderMap::new();
        headers.insert("x-custom", HeaderValue::from_static("1"));
        headers.insert("connection", HeaderValue::from_static("keep-alive"));

        let ctx = ProxyRequestContext {
            target: target(),
            method: Method::PATCH,
            path_and_query: "/api/items?page=2".into(),
            headers,
            body: Body::empty(),
        };
        let request = ctx.into_request().unwrap();

        assert_eq!(request.method(), Method::PATCH);
        assert_eq!(
            request.uri().to_string(),
            "https://origin.internal:8443/api/items?page=2"
        );
        assert_eq!(request.headers().get("x-custom").unwrap(), "1");
        assert!(request.headers().get("connection").is_none());
    }

    #[test]
    fn rejects_unusable_authority() {
        let ctx = ProxyRequestContext {
            target: UpstreamTarget {
                scheme: "https".into(),
                host: "bad host".into(),
                port: None,
            },
            method: Method::GET,
            path_and_query: "/".into(),
            headers: Default::default(),
            body: Body::empty(),
        };
        let err = ctx.into_request().unwrap_err();
        assert!(matches!(err, GatewayError::Upstream { status: None, .. }));
        assert_eq!(err.status(), axum::http::StatusCode::BAD_GATEWAY);
    }
}
