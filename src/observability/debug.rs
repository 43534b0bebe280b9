//! Exchange dumps for troubleshooting edge integrations.
//!
//! Enabled with `observability.debug`. For every response that is not
//! `200 OK`, logs the request line plus request and response headers; for
//! error responses (status >= 400) the body is logged as it streams through,
//! capped at [`MAX_LOGGED_BODY`] bytes.

use axum::{
    body::Body,
    http::{HeaderMap, Request, StatusCode},
    middleware::Next,
    response::Response,
};
use futures_util::StreamExt;

/// Upper bound on logged response body bytes per exchange.
pub const MAX_LOGGED_BODY: usize = 64 * 1024;

pub async fn debug_exchange(request: Request<Body>, next: Next) -> Response {
    let method = request.method().clone();
    let uri = request.uri().clone();
    let request_headers = request.headers().clone();

    let response = next.run(request).await;
    let status = response.status();
    if status == StatusCode::OK {
        return response;
    }

    tracing::debug!(%method, %uri, status = status.as_u16(), "Exchange did not return 200");
    log_headers("request", &request_headers);
    log_headers("response", response.headers());

    if !status.is_client_error() && !status.is_server_error() {
        return response;
    }

    let (parts, body) = response.into_parts();
    let mut logged = 0usize;
    let stream = body.into_data_stream().inspect(move |chunk| {
        if let Ok(bytes) = chunk {
            if logged < MAX_LOGGED_BODY {
                let take = bytes.len().min(MAX_LOGGED_BODY - logged);
                logged += take;
                tracing::debug!(
                    status = status.as_u16(),
                    body = %String::from_utf8_lossy(&bytes[..take]),
                    "Response body"
                );
            }
        }
    });

    Response::from_parts(parts, Body::from_stream(stream))
}

fn log_headers(side: &'static str, headers: &HeaderMap) {
    for (name, value) in headers {
        tracing::debug!(side, header = %name, value = ?value, "Header");
    }
}
