//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! All subsystems emit `tracing` events with structured fields
//! (session_id, target, direction, bytes, error)
//!     → logging.rs (EnvFilter + fmt layer to stdout)
//! ```
//!
//! # Design Decisions
//! - `RUST_LOG` overrides the configured level
//! - Relay payload captures are only emitted at trace level

pub mod logging;

pub use logging::init_logging;
