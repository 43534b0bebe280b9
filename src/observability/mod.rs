//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! All subsystems produce:
//!     → logging.rs (structured log events)
//!     → metrics.rs (counters, gauges, histograms)
//!     → debug.rs (header/body dumps of failed exchanges, opt-in)
//!
//! Consumers:
//!     → Log aggregation (stdout)
//!     → Metrics endpoint (Prometheus scrape)
//! ```
//!
//! # Design Decisions
//! - Request ID (`x-request-id`) set at the edge of the router and logged by TraceLayer
//! - The Prometheus exporter is off unless configured
//! - Debug dumps never change the response

pub mod debug;
pub mod logging;
pub mod metrics;
