//! Startup orchestration.
//!
//! # Responsibilities
//! - Initialize process-wide pieces (crypto provider, metrics)
//! - Bind the listener and load TLS material
//! - Start the HTTP server and wire it to OS signals
//!
//! # Design Decisions
//! - Fail fast: any startup error is fatal
//! - Listener starts last (traffic only when ready)

use std::net::SocketAddr;
use std::path::Path;

use thiserror::Error;

use crate::config::GatewayConfig;
use crate::http::HttpServer;
use crate::lifecycle::{signals, Shutdown};
use crate::net::tls;
use crate::observability::metrics;

/// Fatal error raised before or while serving.
#[derive(Debug, Error)]
pub enum StartupError {
    #[error("invalid address '{0}'")]
    Address(String),

    #[error("failed to bind {address}: {source}")]
    Bind {
        address: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to load TLS material: {0}")]
    Tls(#[source] std::io::Error),

    #[error("failed to build upstream TLS client: {0}")]
    UpstreamTls(#[from] rustls::Error),

    #[error("failed to start metrics endpoint: {0}")]
    Metrics(#[from] metrics_exporter_prometheus::BuildError),

    #[error("server error: {0}")]
    Serve(#[source] std::io::Error),
}

/// Start the gateway and serve until a shutdown signal arrives.
pub async fn run(config: GatewayConfig) -> Result<(), StartupError> {
    tls::install_crypto_provider();

    if config.observability.metrics_enabled {
        let addr: SocketAddr = config
            .observability
            .metrics_address
            .parse()
            .map_err(|_| StartupError::Address(config.observability.metrics_address.clone()))?;
        metrics::init_metrics(addr)?;
    }

    if config.auth.jwt_key.is_empty() {
        tracing::warn!("auth.jwt_key is empty; session tokens are checked against an empty secret");
    }

    let address = config.listener.bind_address.clone();
    let listener = std::net::TcpListener::bind(&address)
        .and_then(|l| l.set_nonblocking(true).map(|_| l))
        .map_err(|source| StartupError::Bind {
            address: address.clone(),
            source,
        })?;

    let tls_config = match &config.listener.tls {
        Some(paths) => Some(
            tls::load_tls_config(Path::new(&paths.cert_path), Path::new(&paths.key_path))
                .await
                .map_err(StartupError::Tls)?,
        ),
        None => None,
    };

    let server = HttpServer::new(config)?;

    let shutdown = Shutdown::new();
    let server_shutdown = shutdown.subscribe();
    let signal_task = tokio::spawn(async move {
        signals::wait_for_signal().await;
        shutdown.trigger();
    });

    let result = match tls_config {
        Some(tls_config) => server.run_tls(listener, tls_config, server_shutdown).await,
        None => {
            let listener = tokio::net::TcpListener::from_std(listener).map_err(|source| {
                StartupError::Bind {
                    address: address.clone(),
                    source,
                }
            })?;
            server.run(listener, server_shutdown).await
        }
    };

    signal_task.abort();
    result.map_err(StartupError::Serve)
}
