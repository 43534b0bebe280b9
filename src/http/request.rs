//! Request correlation.
//!
//! # Responsibilities
//! - Assign a request ID to every inbound request
//! - Echo the ID on the response so edge logs can be joined with ours
//!
//! # Design Decisions
//! - An ID supplied by the edge is kept, not replaced
//! - The ID also travels upstream with the forwarded headers

use axum::http::{HeaderMap, HeaderName};
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};

/// Request ID header name.
pub const X_REQUEST_ID: HeaderName = HeaderName::from_static("x-request-id");

/// Layer assigning a UUID request ID when the request has none.
pub fn set_request_id() -> SetRequestIdLayer<MakeRequestUuid> {
    SetRequestIdLayer::new(X_REQUEST_ID, MakeRequestUuid)
}

/// Layer copying the request ID onto the response.
pub fn propagate_request_id() -> PropagateRequestIdLayer {
    PropagateRequestIdLayer::new(X_REQUEST_ID)
}

/// Request ID of an inbound request, for logs.
pub fn request_id(headers: &HeaderMap) -> &str {
    headers
        .get(X_REQUEST_ID)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("unknown")
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{body::Body, http::Request, routing::get, Router};
    use tower::ServiceExt;

    fn app() -> Router {
        Router::new()
            .route(
                "/",
                get(|headers: HeaderMap| async move { request_id(&headers).to_string() }),
            )
            .layer(propagate_request_id())
            .layer(set_request_id())
    }

    #[tokio::test]
    async fn generates_and_echoes_id() {
        let response = app()
            .oneshot(Request::get("/").body(Body::empty()).unwrap())
            .await
            .unwrap();
        let echoed = response.headers().get(X_REQUEST_ID).unwrap().to_str().unwrap().to_string();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(echoed.as_bytes(), &body[..]);
        assert!(uuid::Uuid::parse_str(&echoed).is_ok());
    }

    #[tokio::test]
    async fn keeps_supplied_id() {
        let response = app()
            .oneshot(
                Request::get("/")
                    .header("x-request-id", "edge-42")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.headers().get(X_REQUEST_ID).unwrap(), "edge-42");
    }

    #[test]
    fn missing_id_reads_as_unknown() {
        assert_eq!(request_id(&HeaderMap::new()), "unknown");
    }
}
