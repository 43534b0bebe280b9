//! WebSocket tunnel.
//!
//! # Responsibilities
//! - Authenticate the tunnel against the host named in the path
//! - Dial the upstream WebSocket over TLS
//! - Upgrade the client connection and hand both legs to the relay
//!
//! # Data Flow
//! ```text
//! GET /websocket/{host}/{port}/{*path}?headers=<blob>
//!     → rewrite_from_query (header set replaced by the blob)
//!     → token check against {host}
//!     → dial wss://{host}:{port}/{path}
//!     → client upgrade (101)
//!     → relay::bridge until either leg ends
//! ```
//!
//! # Design Decisions
//! - Upstream first: the client is only upgraded once the upstream accepted
//! - The client-facing handshake uses the original request headers, so its
//!   accept value matches the client's own Sec-WebSocket-Key
//! - The upstream's chosen subprotocol is the one answered to the client

use std::sync::Arc;
use std::time::Instant;

use axum::{
    extract::{
        ws::{rejection::WebSocketUpgradeRejection, WebSocket, WebSocketUpgrade},
        Path, State,
    },
    http::{header, HeaderMap, HeaderName, HeaderValue, Uri},
    response::{IntoResponse, Response},
};
use rustls::ClientConfig;
use serde::Deserialize;
use tokio::net::TcpStream;
use tokio_tungstenite::{
    connect_async_tls_with_config,
    tungstenite::{self, client::IntoClientRequest},
    Connector, MaybeTlsStream, WebSocketStream,
};
use url::Url;

use crate::error::GatewayError;
use crate::http::relay::{self, Completion};
use crate::http::server::AppState;
use crate::net::connection::{SessionGuard, SessionId};
use crate::observability::metrics;
use crate::security::cookie::session_cookie;
use crate::security::headers::{dial_headers, requested_protocols, rewrite_from_query, RewriteError};

pub type UpstreamSocket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Upstream handshake headers that are passed on to the client.
pub const UPGRADE_HEADER_WHITELIST: [HeaderName; 1] = [header::SEC_WEBSOCKET_PROTOCOL];

/// Path parameters of the tunnel route.
#[derive(Debug, Clone, Deserialize)]
pub struct TunnelRoute {
    pub host: String,
    pub port: String,
    #[serde(default)]
    pub path: String,
}

impl TunnelRoute {
    /// `wss://host:port/path`. The inbound query string is not forwarded.
    pub fn upstream_url(&self) -> Result<Url, RewriteError> {
        let raw = format!(
            "wss://{}:{}/{}",
            self.host,
            self.port,
            self.path.trim_start_matches('/')
        );
        Url::parse(&raw).map_err(|e| RewriteError::InvalidTarget(format!("{}: {}", raw, e)))
    }
}

/// Dials upstream WebSocket endpoints.
#[derive(Clone)]
pub struct TunnelDialer {
    tls: Arc<ClientConfig>,
}

impl TunnelDialer {
    pub fn new(tls: ClientConfig) -> Self {
        Self { tls: Arc::new(tls) }
    }

    /// Open the upstream leg.
    ///
    /// `headers` replace the handshake's generated headers of the same name;
    /// `protocols` become its `Sec-WebSocket-Protocol`. Returns the socket and
    /// the upstream's handshake response headers.
    pub async fn dial(
        &self,
        url: &Url,
        headers: &HeaderMap,
        protocols: &[String],
    ) -> Result<(UpstreamSocket, HeaderMap), GatewayError> {
        let mut request = url.as_str().into_client_request().map_err(dial_error)?;
        let outbound = request.headers_mut();
        for name in headers.keys() {
            outbound.remove(name);
        }
        for (name, value) in headers {
            outbound.append(name.clone(), value.clone());
        }
        if !protocols.is_empty() {
            let value = HeaderValue::from_str(&protocols.join(", "))
                .map_err(|_| RewriteError::InvalidHeader(header::SEC_WEBSOCKET_PROTOCOL.to_string()))?;
            outbound.insert(header::SEC_WEBSOCKET_PROTOCOL, value);
        }

        let connector = Connector::Rustls(Arc::clone(&self.tls));
        let (socket, response) = connect_async_tls_with_config(request, None, false, Some(connector))
            .await
            .map_err(dial_error)?;
        Ok((socket, response.headers().clone()))
    }
}

fn dial_error(err: tungstenite::Error) -> GatewayError {
    match err {
        tungstenite::Error::Http(response) => GatewayError::Upstream {
            status: Some(response.status()),
            message: format!("upstream refused handshake with {}", response.status()),
        },
        other => GatewayError::Upstream {
            status: None,
            message: other.to_string(),
        },
    }
}

/// Subset of the upstream handshake headers forwarded to the client.
pub fn whitelisted_headers(upstream: &HeaderMap) -> HeaderMap {
    let mut forwarded = HeaderMap::new();
    for name in UPGRADE_HEADER_WHITELIST.iter() {
        if let Some(value) = upstream.get(name).filter(|v| !v.is_empty()) {
            forwarded.insert(name.clone(), value.clone());
        }
    }
    forwarded
}

/// One client leg paired with one upstream leg.
pub struct WebSocketSession {
    guard: SessionGuard,
    client: WebSocket,
    upstream: UpstreamSocket,
    protocols: Vec<String>,
}

impl WebSocketSession {
    pub fn new(
        guard: SessionGuard,
        client: WebSocket,
        upstream: UpstreamSocket,
        protocols: Vec<String>,
    ) -> Self {
        Self {
            guard,
            client,
            upstream,
            protocols,
        }
    }

    pub fn id(&self) -> SessionId {
        self.guard.id()
    }

    /// Relay until either leg ends; both legs are closed when this returns.
    pub async fn run(self) {
        let id = self.guard.id();
        let started = Instant::now();
        tracing::info!(
            session_id = %id,
            protocols = ?self.protocols,
            negotiated = ?self.client.protocol(),
            "Tunnel session started"
        );

        let completion = relay::bridge(self.client, self.upstream).await;
        report_end(id, started, completion);
        drop(self.guard);
    }
}

fn report_end(id: SessionId, started: Instant, completion: Option<Completion>) {
    let duration_ms = started.elapsed().as_millis() as u64;
    match completion {
        Some(c) if c.termination.is_normal() => {
            tracing::info!(
                session_id = %id,
                direction = %c.direction,
                cause = %c.termination,
                duration_ms,
                "Tunnel session ended"
            );
            metrics::record_session_end("closed");
        }
        Some(c) => {
            tracing::warn!(
                session_id = %id,
                direction = %c.direction,
                cause = %c.termination,
                duration_ms,
                "Tunnel fault"
            );
            metrics::record_session_end("fault");
        }
        None => {
            tracing::warn!(session_id = %id, duration_ms, "Relay tasks ended without reporting");
            metrics::record_session_end("fault");
        }
    }
}

/// `GET /websocket/{host}/{port}/{*path}`
pub async fn websocket_proxy(
    State(state): State<AppState>,
    Path(route): Path<TunnelRoute>,
    headers: HeaderMap,
    uri: Uri,
    upgrade: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> Response {
    let start = Instant::now();
    let host = route.host.clone();

    let response = match open_tunnel(&state, route, headers, &uri, upgrade).await {
        Ok(response) => response,
        Err(e) => {
            match &e {
                GatewayError::Upstream { .. } => {
                    tracing::error!(host = %host, error = %e, "Upstream WebSocket dial failed")
                }
                _ => tracing::warn!(host = %host, error = %e, "Tunnel rejected"),
            }
            e.into_response()
        }
    };

    metrics::record_request("websocket", response.status().as_u16(), start);
    response
}

async fn open_tunnel(
    state: &AppState,
    route: TunnelRoute,
    headers: HeaderMap,
    uri: &Uri,
    upgrade: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> Result<Response, GatewayError> {
    if let Some(key) = headers.get(header::SEC_WEBSOCKET_KEY) {
        tracing::debug!(client_key = ?key, "Client handshake key");
    }

    let headers = rewrite_from_query(headers, uri.query())?;
    let token = session_cookie(&headers, &state.cookie_name);
    if !state.validator.validate(token.as_deref(), &route.host) {
        return Err(GatewayError::Unauthorized);
    }

    let url = route.upstream_url().map_err(GatewayError::unreachable_target)?;
    let protocols = requested_protocols(&headers);
    tracing::debug!(target_url = %url, protocols = ?protocols, "Dialing upstream WebSocket");
    let (mut upstream, upstream_headers) = state
        .tunnel
        .dial(&url, &dial_headers(&headers), &protocols)
        .await?;
    tracing::debug!(target_url = %url, headers = ?upstream_headers, "Upstream WebSocket connected");

    let upgrade = match upgrade {
        Ok(upgrade) => upgrade,
        Err(rejection) => {
            let _ = upstream.close(None).await;
            return Err(GatewayError::Upgrade(rejection.body_text()));
        }
    };

    let forwarded = whitelisted_headers(&upstream_headers);
    let offered = match forwarded
        .get(header::SEC_WEBSOCKET_PROTOCOL)
        .and_then(|v| v.to_str().ok())
    {
        Some(selected) => vec![selected.to_string()],
        None => protocols.clone(),
    };

    let guard = state.sessions.track();
    let session_id = guard.id();
    let mut response = upgrade
        .protocols(offered)
        .on_failed_upgrade(move |e| {
            tracing::warn!(session_id = %session_id, error = %e, "Client upgrade failed");
        })
        .on_upgrade(move |client| WebSocketSession::new(guard, client, upstream, protocols).run());

    for (name, value) in forwarded.iter() {
        if name != header::SEC_WEBSOCKET_PROTOCOL {
            response.headers_mut().insert(name.clone(), value.clone());
        }
    }
    Ok(response)
}
