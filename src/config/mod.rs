//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML)
//!     → loader.rs (parse & deserialize)
//!     → validation.rs (semantic checks)
//!     → CLI flag overrides (main.rs)
//!     → ProxyConfig (validated, immutable)
//!     → cloned into each listener
//! ```
//!
//! # Design Decisions
//! - Config is immutable once loaded
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks

pub mod loader;
pub mod schema;
pub mod validation;

pub use loader::{load_config, parse_config, ConfigError};
pub use schema::ProxyConfig;
pub use schema::{CertConfig, HttpListenerConfig, HttpsListenerConfig, ObservabilityConfig, TunnelConfig};
pub use validation::{validate_config, ValidationError};
