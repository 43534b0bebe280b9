//! Network layer subsystem.
//!
//! # Data Flow
//! ```text
//! Listener socket
//!     → tls.rs (optional TLS handshake, upstream client config)
//!     → Hand off to HTTP layer
//!
//! WebSocket sessions:
//!     connection.rs (session IDs, live session count)
//! ```
//!
//! # Design Decisions
//! - TLS is optional on the listener and handled transparently
//! - Upstream TLS never verifies certificates: upstreams are private

pub mod connection;
pub mod tls;
