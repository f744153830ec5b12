//! TLS configuration for listeners and outbound dials.

use std::sync::Arc;

use axum_server::tls_rustls::RustlsConfig;
use rustls::client::danger::HandshakeSignatureValid;
use rustls::crypto::{CryptoProvider, WebPkiSupportedAlgorithms};
use rustls::pki_types::{CertificateDer, PrivateKeyDer, UnixTime};
use rustls::server::danger::{ClientCertVerified, ClientCertVerifier};
use rustls::server::{ServerConnection, WebPkiClientVerifier};
use rustls::{ClientConfig, DigitallySignedStruct, DistinguishedName, RootCertStore, ServerConfig, SignatureScheme};

use crate::certs::CertPair;

/// Crypto provider shared by every TLS config this crate builds.
pub fn crypto_provider() -> Arc<CryptoProvider> {
    Arc::new(rustls::crypto::ring::default_provider())
}

fn invalid_data(e: impl std::fmt::Display) -> std::io::Error {
    std::io::Error::new(std::io::ErrorKind::InvalidData, e.to_string())
}

/// Decode a PEM certificate chain and private key.
pub fn load_identity(
    pair: &CertPair,
) -> Result<(Vec<CertificateDer<'static>>, PrivateKeyDer<'static>), std::io::Error> {
    let certs = rustls_pemfile::certs(&mut pair.cert_pem.as_bytes()).collect::<Result<Vec<_>, _>>()?;
    if certs.is_empty() {
        return Err(invalid_data("no certificate found in PEM"));
    }
    let key = rustls_pemfile::private_key(&mut pair.key_pem.as_bytes())?
        .ok_or_else(|| invalid_data("no private key found in PEM"))?;
    Ok((certs, key))
}

/// Server config for the CONNECT listener. No client authentication.
pub fn server_config(pair: &CertPair) -> Result<ServerConfig, std::io::Error> {
    let (certs, key) = load_identity(pair)?;
    ServerConfig::builder_with_provider(crypto_provider())
        .with_safe_default_protocol_versions()
        .map_err(invalid_data)?
        .with_no_client_auth()
        .with_single_cert(certs, key)
        .map_err(invalid_data)
}

/// Server config for the mutual-TLS listener.
///
/// A client certificate is always required. With `verify_client` it must
/// chain to the mTLS certificate itself; otherwise any certificate whose
/// handshake signature checks out is accepted.
pub fn mtls_server_config(pair: &CertPair, verify_client: bool) -> Result<ServerConfig, std::io::Error> {
    let (certs, key) = load_identity(pair)?;
    let provider = crypto_provider();

    let verifier: Arc<dyn ClientCertVerifier> = if verify_client {
        let mut roots = RootCertStore::empty();
        for cert in &certs {
            roots.add(cert.clone()).map_err(invalid_data)?;
        }
        WebPkiClientVerifier::builder_with_provider(Arc::new(roots), provider.clone())
            .build()
            .map_err(invalid_data)?
    } else {
        Arc::new(AnyClientCert::new(provider.signature_verification_algorithms))
    };

    ServerConfig::builder_with_provider(provider)
        .with_safe_default_protocol_versions()
        .map_err(invalid_data)?
        .with_client_cert_verifier(verifier)
        .with_single_cert(certs, key)
        .map_err(invalid_data)
}

/// Wrap a server config for `axum-server`.
pub fn axum_tls_config(config: ServerConfig) -> RustlsConfig {
    RustlsConfig::from_config(Arc::new(config))
}

/// Client config trusting the bundled web PKI roots.
pub fn default_client_config() -> Result<ClientConfig, std::io::Error> {
    let roots = RootCertStore {
        roots: webpki_roots::TLS_SERVER_ROOTS.to_vec(),
    };
    client_config_with_roots(roots)
}

/// Client config trusting exactly `roots`.
pub fn client_config_with_roots(roots: RootCertStore) -> Result<ClientConfig, std::io::Error> {
    Ok(ClientConfig::builder_with_provider(crypto_provider())
        .with_safe_default_protocol_versions()
        .map_err(invalid_data)?
        .with_root_certificates(roots)
        .with_no_client_auth())
}

/// Negotiated parameters of an inbound TLS connection, for logging.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TlsInfo {
    pub handshake_complete: bool,
    pub version: Option<String>,
    pub cipher_suite: Option<String>,
    pub alpn: Option<String>,
}

impl TlsInfo {
    pub fn from_connection(conn: &ServerConnection) -> Self {
        Self {
            handshake_complete: !conn.is_handshaking(),
            version: conn.protocol_version().map(|v| format!("{:?}", v)),
            cipher_suite: conn.negotiated_cipher_suite().map(|s| format!("{:?}", s.suite())),
            alpn: conn
                .alpn_protocol()
                .map(|p| String::from_utf8_lossy(p).into_owned()),
        }
    }
}

/// Requires a client certificate but does not check its chain.
#[derive(Debug)]
struct AnyClientCert {
    algorithms: WebPkiSupportedAlgorithms,
}

impl AnyClientCert {
    fn new(algorithms: WebPkiSupportedAlgorithms) -> Self {
        Self { algorithms }
    }
}

impl ClientCertVerifier for AnyClientCert {
    fn root_hint_subjects(&self) -> &[DistinguishedName] {
        &[]
    }

    fn verify_client_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _now: UnixTime,
    ) -> Result<ClientCertVerified, rustls::Error> {
        Ok(ClientCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls12_signature(message, cert, dss, &self.algorithms)
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls13_signature(message, cert, dss, &self.algorithms)
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.algorithms.supported_schemes()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::certs::{generate, CertParams};

    #[test]
    fn builds_listener_configs() {
        let pair = generate(&CertParams::new("localhost").with_client_auth()).unwrap();
        assert!(server_config(&pair).is_ok());
        assert!(mtls_server_config(&pair, true).is_ok());
        assert!(mtls_server_config(&pair, false).is_ok());
    }

    #[test]
    fn rejects_garbage_pem() {
        let pair = CertPair {
            cert_pem: "not a certificate".into(),
            key_pem: String::new(),
        };
        let err = server_config(&pair).unwrap_err();
        assert_eq!(err.kind(), std::io::ErrorKind::InvalidData);
    }

    #[test]
    fn default_client_config_has_roots() {
        assert!(default_client_config().is_ok());
    }
}
