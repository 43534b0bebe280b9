//! Shared utilities for integration tests.

#![allow(dead_code)]

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{
        ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade},
        State,
    },
    http::{HeaderMap, Method, StatusCode, Uri},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use axum_server::tls_rustls::RustlsConfig;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde_json::{json, Value};

use edge_gateway::config::GatewayConfig;
use edge_gateway::http::HttpServer;
use edge_gateway::lifecycle::Shutdown;
use edge_gateway::net::tls::install_crypto_provider;
use edge_gateway::security::token::{issue_token, unix_now, SessionClaims, DEFAULT_TTL_SECS};

pub const SECRET: &str = "integration-secret";
pub const COOKIE: &str = "pm-session";

/// TLS upstream serving a header echo for HTTP and an echo WebSocket on `/chat`.
pub struct Upstream {
    pub addr: SocketAddr,
    hits: Arc<AtomicUsize>,
}

impl Upstream {
    /// Requests and handshakes received so far.
    pub fn hits(&self) -> usize {
        self.hits.load(Ordering::SeqCst)
    }
}

fn headers_json(headers: &HeaderMap) -> BTreeMap<String, String> {
    headers
        .iter()
        .map(|(k, v)| (k.as_str().to_string(), v.to_str().unwrap_or_default().to_string()))
        .collect()
}

async fn echo_request(
    State(hits): State<Arc<AtomicUsize>>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Json<Value> {
    hits.fetch_add(1, Ordering::SeqCst);
    Json(json!({
        "method": method.as_str(),
        "path": uri.path(),
        "query": uri.query(),
        "headers": headers_json(&headers),
        "body": String::from_utf8_lossy(&body),
    }))
}

async fn chat(
    State(hits): State<Arc<AtomicUsize>>,
    uri: Uri,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> Response {
    hits.fetch_add(1, Ordering::SeqCst);
    let handshake = json!({
        "path": uri.path(),
        "query": uri.query(),
        "headers": headers_json(&headers),
    })
    .to_string();
    ws.protocols(["binary"])
        .on_upgrade(move |socket| echo_socket(socket, handshake))
}

/// Sends the handshake summary, then echoes; `close-me` makes it close with 1000.
async fn echo_socket(mut socket: WebSocket, handshake: String) {
    if socket.send(Message::Text(handshake.into())).await.is_err() {
        return;
    }
    while let Some(Ok(message)) = socket.recv().await {
        match message {
            Message::Text(text) if text.as_str() == "close-me" => {
                let _ = socket
                    .send(Message::Close(Some(CloseFrame {
                        code: 1000,
                        reason: "bye".into(),
                    })))
                    .await;
            }
            Message::Text(_) | Message::Binary(_) => {
                if socket.send(message).await.is_err() {
                    return;
                }
            }
            Message::Close(_) => return,
            _ => {}
        }
    }
}

async fn reject(State(hits): State<Arc<AtomicUsize>>) -> impl IntoResponse {
    hits.fetch_add(1, Ordering::SeqCst);
    (StatusCode::FORBIDDEN, "not today")
}

/// Start the TLS upstream with a fresh self-signed certificate.
pub async fn start_upstream() -> Upstream {
    install_crypto_provider();

    let hits = Arc::new(AtomicUsize::new(0));
    let app = Router::new()
        .route("/chat", get(chat))
        .route("/reject", get(reject))
        .fallback(echo_request)
        .with_state(hits.clone());

    let cert = rcgen::generate_simple_self_signed(vec!["localhost".to_string()]).unwrap();
    let tls = RustlsConfig::from_pem(
        cert.cert.pem().into_bytes(),
        cert.key_pair.serialize_pem().into_bytes(),
    )
    .await
    .unwrap();

    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    listener.set_nonblocking(true).unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        let _ = axum_server::from_tcp_rustls(listener, tls)
            .serve(app.into_make_service())
            .await;
    });

    Upstream { addr, hits }
}

/// Gateway running on plain TCP. Dropping the returned `Shutdown` stops it.
pub async fn start_gateway() -> (SocketAddr, Shutdown) {
    install_crypto_provider();

    let mut config = GatewayConfig::default();
    config.listener.bind_address = "127.0.0.1:0".to_string();
    config.listener.tls = None;
    config.auth.jwt_key = SECRET.to_string();

    let server = HttpServer::new(config).unwrap();
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let shutdown = Shutdown::new();
    let server_shutdown = shutdown.subscribe();
    tokio::spawn(async move {
        let _ = server.run(listener, server_shutdown).await;
    });

    (addr, shutdown)
}

/// Valid session token bound to `ip`.
pub fn token_for(ip: &str) -> String {
    let claims = SessionClaims::issued_at(ip, "gateway.test", unix_now(), DEFAULT_TTL_SECS);
    issue_token(SECRET.as_bytes(), &claims).unwrap()
}

/// `headers` query value carrying `pairs` as base64 JSON.
pub fn header_blob(pairs: &[(&str, &str)]) -> String {
    let map: BTreeMap<&str, &str> = pairs.iter().copied().collect();
    let encoded = STANDARD.encode(serde_json::to_vec(&map).unwrap());
    url::form_urlencoded::byte_serialize(encoded.as_bytes()).collect()
}

/// An address nothing listens on.
pub fn closed_port() -> u16 {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap().port()
}
