//! CONNECT tunnelling.
//!
//! # Responsibilities
//! - Validate CONNECT requests and pick a dial strategy for the target
//! - Take raw ownership of the client connection and acknowledge the tunnel
//! - Relay bytes both ways until each direction has ended on its own
//!
//! # Data Flow
//! ```text
//! HttpConn ──RequestHead──▶ Tunneler::handshake ──▶ TunnelSession
//!                                 │                        │
//!                            Connect (dial)          relay() ──▶ SessionReport
//! ```
//!
//! # Design Decisions
//! - Dialing is behind the `Connect` trait so the handshake can be tested
//!   without sockets
//! - Each relay direction owns its reader, its writer and its capture
//!   buffer; the only shared state is the idle clock

pub mod dial;
pub mod error;
pub mod handshake;
pub mod hijack;
pub mod relay;
pub mod session;

pub use dial::{Connect, DialStrategy, Dialer, TargetAddr, TLS_PORT};
pub use error::{is_peer_gone, Direction, TunnelError};
pub use handshake::Tunneler;
pub use hijack::{Hijack, Hijacked};
pub use relay::{relay, DirectionReport, RelayConfig, RelayReport, Termination};
pub use session::{SessionReport, SessionState, TunnelSession};
