//! HTTP server setup and configuration.
//!
//! # Responsibilities
//! - Create the Axum router: tunnel routes plus the forwarding fallback
//! - Wire up middleware (request ID, tracing, optional debug dumps)
//! - Serve on a plain or TLS listener until shutdown

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::{middleware, routing::get, Router};
use axum_server::{tls_rustls::RustlsConfig, Handle};
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tower_http::trace::TraceLayer;

use crate::config::GatewayConfig;
use crate::http::forward::{http_proxy, HttpForwarder};
use crate::http::request::{propagate_request_id, set_request_id};
use crate::http::websocket::{websocket_proxy, TunnelDialer};
use crate::lifecycle::shutdown;
use crate::net::connection::SessionTracker;
use crate::net::tls::insecure_client_config;
use crate::observability::debug::debug_exchange;
use crate::security::token::TokenValidator;

/// Grace period for in-flight TLS connections after shutdown is triggered.
const TLS_SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

/// Application state injected into handlers.
#[derive(Clone)]
pub struct AppState {
    pub validator: Arc<TokenValidator>,
    pub cookie_name: Arc<str>,
    pub forwarder: HttpForwarder,
    pub tunnel: TunnelDialer,
    pub sessions: SessionTracker,
}

impl AppState {
    /// Build the state; upstream TLS never verifies certificates.
    pub fn from_config(config: &GatewayConfig) -> Result<Self, rustls::Error> {
        let tls = insecure_client_config()?;
        Ok(Self {
            validator: Arc::new(TokenValidator::new(config.auth.jwt_key.as_bytes())),
            cookie_name: Arc::from(config.auth.cookie_name.as_str()),
            forwarder: HttpForwarder::new(tls.clone()),
            tunnel: TunnelDialer::new(tls),
            sessions: SessionTracker::new(),
        })
    }
}

/// HTTP server for the gateway.
pub struct HttpServer {
    router: Router,
    sessions: SessionTracker,
}

impl HttpServer {
    /// Create a new HTTP server with the given configuration.
    pub fn new(config: GatewayConfig) -> Result<Self, rustls::Error> {
        let state = AppState::from_config(&config)?;
        let sessions = state.sessions.clone();
        let router = Self::build_router(&config, state);
        Ok(Self { router, sessions })
    }

    /// Build the Axum router with all middleware layers.
    pub fn build_router(config: &GatewayConfig, state: AppState) -> Router {
        let tunnel = get(websocket_proxy).fallback(http_proxy);

        let router = Router::new()
            .route("/websocket/{host}/{port}/{*path}", tunnel.clone())
            .route("/websocket/{host}/{port}/", tunnel)
            .fallback(http_proxy)
            .with_state(state);

        let router = if config.observability.debug {
            router.layer(middleware::from_fn(debug_exchange))
        } else {
            router
        };

        router
            .layer(propagate_request_id())
            .layer(TraceLayer::new_for_http())
            .layer(set_request_id())
    }

    /// Live tunnel sessions.
    pub fn sessions(&self) -> SessionTracker {
        self.sessions.clone()
    }

    /// Run on a plain TCP listener until `shutdown` fires.
    pub async fn run(
        self,
        listener: TcpListener,
        shutdown: broadcast::Receiver<()>,
    ) -> Result<(), std::io::Error> {
        let addr = listener.local_addr()?;
        tracing::info!(address = %addr, tls = false, "HTTP server starting");

        let app = self.router.into_make_service_with_connect_info::<SocketAddr>();
        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown::wait(shutdown))
            .await?;

        tracing::info!(
            active_sessions = self.sessions.active_count(),
            "HTTP server stopped"
        );
        Ok(())
    }

    /// Run on a TLS listener until `shutdown` fires.
    pub async fn run_tls(
        self,
        listener: std::net::TcpListener,
        tls: RustlsConfig,
        shutdown: broadcast::Receiver<()>,
    ) -> Result<(), std::io::Error> {
        let addr = listener.local_addr()?;
        tracing::info!(address = %addr, tls = true, "HTTP server starting");

        let handle = Handle::new();
        let signal_handle = handle.clone();
        tokio::spawn(async move {
            shutdown::wait(shutdown).await;
            signal_handle.graceful_shutdown(Some(TLS_SHUTDOWN_GRACE));
        });

        let app = self.router.into_make_service_with_connect_info::<SocketAddr>();
        axum_server::from_tcp_rustls(listener, tls)
            .handle(handle)
            .serve(app)
            .await?;

        tracing::info!(
            active_sessions = self.sessions.active_count(),
            "HTTP server stopped"
        );
        Ok(())
    }
}
