//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate bind addresses and value ranges
//! - Reject unknown key algorithms and log formats
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: ProxyConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::net::SocketAddr;

use crate::certs::KeyAlgorithm;
use crate::config::schema::ProxyConfig;

/// Largest relay read buffer; one is allocated per direction per session.
pub const MAX_CHUNK_SIZE: usize = 1024 * 1024;

/// A single semantic problem in a configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    /// Dotted path of the offending field.
    pub field: &'static str,
    /// What is wrong with it.
    pub message: String,
}

impl ValidationError {
    fn new(field: &'static str, message: impl Into<String>) -> Self {
        Self {
            field,
            message: message.into(),
        }
    }
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

impl std::error::Error for ValidationError {}

/// Check a parsed configuration, collecting every problem found.
pub fn validate_config(config: &ProxyConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    let addresses = [
        ("http.bind_address", &config.http.bind_address),
        ("https.bind_address", &config.https.bind_address),
        ("tunnel.bind_address", &config.tunnel.bind_address),
    ];
    for (field, value) in addresses {
        if value.parse::<SocketAddr>().is_err() {
            errors.push(ValidationError::new(
                field,
                format!("'{}' is not a socket address", value),
            ));
        }
    }

    let tunnel = &config.tunnel;
    if tunnel.max_sessions == 0 {
        errors.push(ValidationError::new("tunnel.max_sessions", "must be greater than 0"));
    }
    if tunnel.chunk_size == 0 || tunnel.chunk_size > MAX_CHUNK_SIZE {
        errors.push(ValidationError::new(
            "tunnel.chunk_size",
            format!("must be between 1 and {} bytes", MAX_CHUNK_SIZE),
        ));
    }
    if tunnel.max_head_bytes < 1024 {
        errors.push(ValidationError::new("tunnel.max_head_bytes", "must be at least 1024"));
    }
    if tunnel.connect_timeout_secs == 0 {
        errors.push(ValidationError::new(
            "tunnel.connect_timeout_secs",
            "must be greater than 0",
        ));
    }
    if tunnel.head_timeout_secs == 0 {
        errors.push(ValidationError::new("tunnel.head_timeout_secs", "must be greater than 0"));
    }

    let certs = &config.certs;
    if certs.proxy_hosts.trim().is_empty() {
        errors.push(ValidationError::new("certs.proxy_hosts", "must name at least one host"));
    }
    if certs.mtls_hosts.trim().is_empty() {
        errors.push(ValidationError::new("certs.mtls_hosts", "must name at least one host"));
    }
    if certs.valid_for_hours == 0 {
        errors.push(ValidationError::new("certs.valid_for_hours", "must be greater than 0"));
    }
    if certs.key_algorithm.parse::<KeyAlgorithm>().is_err() {
        errors.push(ValidationError::new(
            "certs.key_algorithm",
            format!("unsupported algorithm '{}'", certs.key_algorithm),
        ));
    }

    let log_format = config.observability.log_format.as_str();
    if log_format != "full" && log_format != "compact" {
        errors.push(ValidationError::new(
            "observability.log_format",
            format!("expected 'full' or 'compact', got '{}'", log_format),
        ));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
