//! Edge gateway binary.
//!
//! # Architecture Overview
//!
//! ```text
//!  CDN edge ──▶ ┌──────────┐   ┌──────────────┐   ┌───────────┐ ──▶ upstream
//!               │ listener │──▶│ token check  │──▶│ forwarder │     (HTTP)
//!               │ (TLS)    │   │ + rewriting  │   ├───────────┤
//!               └──────────┘   └──────────────┘   │  tunnel   │ ◀─▶ upstream
//!                                                 └───────────┘     (WSS)
//! ```

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;

use edge_gateway::config::loader::resolve_config;
use edge_gateway::lifecycle::startup;
use edge_gateway::observability::logging;

#[derive(Debug, Parser)]
#[command(name = "edge-gateway", version, about = "Authenticated edge gateway")]
struct Args {
    /// TOML configuration file; defaults plus environment when omitted.
    #[arg(short, long, env = "GATEWAY_CONFIG")]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    let config = match resolve_config(args.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("edge-gateway: {}", e);
            return ExitCode::FAILURE;
        }
    };

    logging::init(&config.observability.log_level);
    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        bind_address = %config.listener.bind_address,
        tls = config.listener.tls.is_some(),
        debug = config.observability.debug,
        "edge-gateway starting"
    );

    match startup::run(config).await {
        Ok(()) => {
            tracing::info!("edge-gateway stopped");
            ExitCode::SUCCESS
        }
        Err(e) => {
            tracing::error!(error = %e, "edge-gateway failed");
            ExitCode::FAILURE
        }
    }
}
