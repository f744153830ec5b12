//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the proxy.
//! All types derive Serde traits for deserialization from config files.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Root configuration for the tunnel proxy.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct ProxyConfig {
    /// Plain HTTP echo listener.
    pub http: HttpListenerConfig,

    /// Mutual-TLS echo listener.
    pub https: HttpsListenerConfig,

    /// CONNECT tunnel listener and relay tuning.
    pub tunnel: TunnelConfig,

    /// Generated key material.
    pub certs: CertConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

/// Plain HTTP listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct HttpListenerConfig {
    /// Bind address (e.g., "0.0.0.0:8080").
    pub bind_address: String,
}

impl Default for HttpListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8080".to_string(),
        }
    }
}

/// Mutual-TLS listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct HttpsListenerConfig {
    /// Bind address (e.g., "0.0.0.0:8443").
    pub bind_address: String,

    /// Require the client certificate to chain to the generated mTLS certificate.
    /// When false any client certificate is accepted.
    pub verify_client_cert: bool,
}

impl Default for HttpsListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8443".to_string(),
            verify_client_cert: false,
        }
    }
}

/// CONNECT tunnel configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TunnelConfig {
    /// Bind address for the CONNECT listener.
    pub bind_address: String,

    /// Serve the CONNECT listener over TLS using the generated proxy identity.
    pub tls: bool,

    /// Dial port 443 targets over TLS. When false every target is dialed as plain TCP.
    pub tls_dial_heuristic: bool,

    /// Maximum concurrent tunnel sessions (backpressure).
    pub max_sessions: usize,

    /// Target dial timeout in seconds.
    pub connect_timeout_secs: u64,

    /// Close a session after this many seconds without traffic in either direction.
    /// Zero disables the idle timeout.
    pub idle_timeout_secs: u64,

    /// Read buffer size per relay direction.
    pub chunk_size: usize,

    /// Bytes captured per direction for trace logging.
    pub capture_bytes: usize,

    /// Largest accepted request head.
    pub max_head_bytes: usize,

    /// Seconds a new connection has to finish its TLS handshake and send
    /// its request head.
    pub head_timeout_secs: u64,
}

impl Default for TunnelConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:3128".to_string(),
            tls: false,
            tls_dial_heuristic: true,
            max_sessions: 10_000,
            connect_timeout_secs: 10,
            idle_timeout_secs: 0,
            chunk_size: 16 * 1024,
            capture_bytes: 256,
            max_head_bytes: 32 * 1024,
            head_timeout_secs: 10,
        }
    }
}

impl TunnelConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn head_timeout(&self) -> Duration {
        Duration::from_secs(self.head_timeout_secs)
    }

    pub fn idle_timeout(&self) -> Option<Duration> {
        match self.idle_timeout_secs {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        }
    }
}

/// Key material generation settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CertConfig {
    /// Comma-separated hostnames and IPs for the proxy's own listener certificate.
    pub proxy_hosts: String,

    /// Comma-separated hostnames and IPs for the mutual-TLS identity.
    pub mtls_hosts: String,

    /// Certificate lifetime in hours.
    pub valid_for_hours: u64,

    /// Key algorithm: "P256", "P384" or "ED25519".
    pub key_algorithm: String,
}

impl Default for CertConfig {
    fn default() -> Self {
        Self {
            proxy_hosts: "gateway-proxy,knative-proxy,ingress-proxy".to_string(),
            mtls_hosts: "localhost".to_string(),
            valid_for_hours: 24,
            key_algorithm: "P256".to_string(),
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Log line format ("full" or "compact").
    pub log_format: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: "full".to_string(),
        }
    }
}
