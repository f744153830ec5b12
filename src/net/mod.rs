//! Network layer subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming TCP connection
//!     → listener.rs (accept loop, session limits)
//!     → tls.rs (optional TLS handshake)
//!     → connection.rs (session id, lifetime tracking)
//!     → stream.rs (plain or TLS byte stream)
//!     → Hand off to HTTP front end
//! ```
//!
//! # Design Decisions
//! - Bounded accept queue prevents resource exhaustion
//! - Each session tracked for graceful shutdown
//! - TLS is optional and handled transparently

pub mod connection;
pub mod listener;
pub mod stream;
pub mod tls;

pub use connection::{SessionGuard, SessionId, SessionTracker};
pub use listener::{ConnectionPermit, Listener, ListenerError};
pub use stream::MaybeTlsStream;
pub use tls::TlsInfo;
