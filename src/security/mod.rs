//! Security subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming request:
//!     → headers.rs (resolve target, rewrite or replace the header set)
//!     → cookie.rs (pull the session token out of Cookie)
//!     → token.rs (verify signature, lifetime and identity binding)
//!     → Pass to forwarder or tunnel
//! ```
//!
//! # Design Decisions
//! - Fail closed: any token problem is the same 401
//! - CDN-internal headers never reach an upstream

pub mod cookie;
pub mod headers;
pub mod token;

pub use token::{SessionClaims, TokenValidator};
