//! Request-level error taxonomy.
//!
//! Every failure a handler can hit before a response is streamed maps to
//! exactly one variant here. Nothing is retried; the variant decides the
//! status code the client sees.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

use crate::security::headers::RewriteError;

/// Terminal failure of one proxied request or tunnel setup.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// Header rewrite failed: missing `X-Pm-Host` or a bad header blob.
    #[error(transparent)]
    Malformed(#[from] RewriteError),

    /// Missing, invalid, expired or identity-mismatched token.
    #[error("Invalid token")]
    Unauthorized,

    /// The upstream could not be reached or refused the connection.
    ///
    /// `status` carries the upstream's own answer when it sent one.
    #[error("Upstream connection failed: {message}")]
    Upstream {
        status: Option<StatusCode>,
        message: String,
    },

    /// Client-side upgrade failed after the upstream was dialed.
    #[error("WebSocket upgrade failed: {0}")]
    Upgrade(String),
}

impl GatewayError {
    /// Status code sent to the client for this error.
    pub fn status(&self) -> StatusCode {
        match self {
            GatewayError::Malformed(_) => StatusCode::BAD_REQUEST,
            GatewayError::Unauthorized => StatusCode::UNAUTHORIZED,
            GatewayError::Upstream { status, .. } => status.unwrap_or(StatusCode::BAD_GATEWAY),
            GatewayError::Upgrade(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// An upstream target that cannot be addressed (bad scheme, host or port).
    pub fn unreachable_target(err: RewriteError) -> Self {
        GatewayError::Upstream {
            status: None,
            message: err.to_string(),
        }
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let status = self.status();
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}
