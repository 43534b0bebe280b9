//! Authenticated edge gateway.
//!
//! Sits between a CDN edge and private upstreams. Every request carries a
//! signed session token bound to the upstream it may reach; plain HTTP is
//! streamed through after header rewriting, and `/websocket/...` requests
//! become a relayed WebSocket tunnel.

// Core subsystems
pub mod config;
pub mod error;
pub mod http;
pub mod net;
pub mod security;

// Cross-cutting concerns
pub mod lifecycle;
pub mod observability;

pub use config::GatewayConfig;
pub use error::GatewayError;
pub use http::HttpServer;
pub use lifecycle::Shutdown;
