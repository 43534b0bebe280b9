//! Metrics collection and exposition.
//!
//! # Metrics
//! - `gateway_requests_total` (counter): requests by kind (`http`, `websocket`) and status
//! - `gateway_request_duration_seconds` (histogram): time to response head, by kind
//! - `gateway_websocket_sessions_active` (gauge): live tunnel sessions
//! - `gateway_websocket_sessions_total` (counter): ended sessions by outcome (`closed`, `fault`)
//!
//! Every recording function is a no-op until [`init_metrics`] installs the
//! Prometheus recorder.

use std::net::SocketAddr;
use std::time::Instant;

use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};

/// Install the Prometheus recorder and its scrape listener on `addr`.
pub fn init_metrics(addr: SocketAddr) -> Result<(), BuildError> {
    PrometheusBuilder::new().with_http_listener(addr).install()?;
    tracing::info!(address = %addr, "Metrics endpoint listening");
    Ok(())
}

/// Record one finished request.
pub fn record_request(kind: &'static str, status: u16, start: Instant) {
    metrics::counter!(
        "gateway_requests_total",
        "kind" => kind,
        "status" => status.to_string()
    )
    .increment(1);
    metrics::histogram!("gateway_request_duration_seconds", "kind" => kind)
        .record(start.elapsed().as_secs_f64());
}

/// Publish the live session count.
pub fn set_active_sessions(count: u64) {
    metrics::gauge!("gateway_websocket_sessions_active").set(count as f64);
}

/// Record how a tunnel session ended.
pub fn record_session_end(outcome: &'static str) {
    metrics::counter!("gateway_websocket_sessions_total", "outcome" => outcome).increment(1);
}
