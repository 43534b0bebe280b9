//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP/TLS connection
//!     → server.rs (Axum setup, request ID, tracing)
//!     ├─ /websocket/{host}/{port}/{*path}
//!     │     → websocket.rs (authenticate, dial upstream, upgrade client)
//!     │     → relay.rs (frames both ways until either leg ends)
//!     └─ anything else
//!           → forward.rs (authenticate, rewrite headers, stream upstream)
//!           → response.rs (strip hop-by-hop, stream back)
//! ```

pub mod forward;
pub mod relay;
pub mod request;
pub mod response;
pub mod server;
pub mod websocket;

pub use forward::HttpForwarder;
pub use request::X_REQUEST_ID;
pub use server::{AppState, HttpServer};
pub use websocket::TunnelDialer;
