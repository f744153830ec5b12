//! HTTP front ends.
//!
//! # Data Flow
//! ```text
//! Tunnel listener:
//!     TCP/TLS connection
//!         → server.rs (bounded accept, optional TLS)
//!         → request.rs (read head, keep read-ahead)
//!         → tunnel::Tunneler (dial, hijack, relay)
//!         → response.rs (framed error if rejected before hijack)
//!
//! Echo listeners:
//!     axum router (echo.rs) on plain HTTP and on mutual TLS
//! ```

pub mod echo;
pub mod request;
pub mod response;
pub mod server;

pub use echo::{http_router, https_router, serve_http, serve_https};
pub use request::{HttpConn, RequestHead};
pub use response::{error_response, CONNECT_ESTABLISHED};
pub use server::{TunnelServer, DRAIN_TIMEOUT};
