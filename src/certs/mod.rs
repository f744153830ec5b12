//! Key material subsystem.
//!
//! # Data Flow
//! ```text
//! CertConfig
//!     → store.rs (one slot per identity, generated on first access)
//!     → generate.rs (rcgen self-signed certificate + key, PEM encoded)
//!     → net/tls.rs (rustls server configs for the proxy and mTLS listeners)
//! ```
//!
//! # Design Decisions
//! - Two identities: the proxy's own listener and a mutual-TLS pair that
//!   also carries the client-auth usage
//! - Generated once per store; the global store lives for the process
//! - Tests build private stores instead of touching the global one

pub mod generate;
pub mod store;

pub use generate::{generate, CertError, CertPair, CertParams, KeyAlgorithm};
pub use store::CertStore;
