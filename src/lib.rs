//! HTTP CONNECT tunnel proxy with echo and mutual-TLS test listeners.
//!
//! # Architecture Overview
//!
//! ```text
//!     Client                 ┌──────────────────────────────────────────────┐
//!     CONNECT host:port      │                 TUNNEL PROXY                  │
//!     ───────────────────────┼─▶ net::Listener ─▶ http::HttpConn            │
//!                            │                      │ RequestHead           │
//!                            │                      ▼                       │
//!                            │               tunnel::Tunneler ──dial──────────┼──▶ Target
//!                            │                      │ hijack + 200 OK       │   (plain or TLS)
//!                            │                      ▼                       │
//!     ◀──────────────────────┼───────────── tunnel::relay ◀────────────────┼───
//!                            │                                              │
//!                            │  echo listeners (axum): /cert /key /echo     │
//!                            │  certs: generated once per process           │
//!                            │  config, lifecycle, observability            │
//!                            └──────────────────────────────────────────────┘
//! ```

pub mod certs;
pub mod config;
pub mod http;
pub mod lifecycle;
pub mod net;
pub mod observability;
pub mod tunnel;

pub use config::schema::ProxyConfig;
pub use http::TunnelServer;
pub use lifecycle::Shutdown;
pub use tunnel::{TunnelError, Tunneler};
