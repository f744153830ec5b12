//! Self-signed certificate generation.

use std::net::IpAddr;
use std::str::FromStr;
use std::time::Duration;

use rand::RngCore;
use rcgen::{
    BasicConstraints, CertificateParams, DistinguishedName, DnType, ExtendedKeyUsagePurpose, IsCa,
    KeyPair, KeyUsagePurpose, SanType, SerialNumber, SignatureAlgorithm,
};
use thiserror::Error;
use time::OffsetDateTime;

/// Default certificate lifetime.
pub const DEFAULT_VALID_FOR: Duration = Duration::from_secs(24 * 60 * 60);
/// Backdate applied to `not_before` when no start time is given.
const NOT_BEFORE_OFFSET_SECS: i64 = 60;
const ORGANIZATION: &str = "Acme Co";

/// Errors raised while generating key material.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CertError {
    #[error("missing required host list")]
    MissingHosts,

    #[error("unsupported key algorithm: {0}")]
    UnsupportedAlgorithm(String),

    #[error("invalid host name '{0}'")]
    InvalidHost(String),

    #[error("certificate generation failed: {0}")]
    Generation(String),
}

impl From<rcgen::Error> for CertError {
    fn from(e: rcgen::Error) -> Self {
        CertError::Generation(e.to_string())
    }
}

/// Key algorithm for generated certificates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum KeyAlgorithm {
    #[default]
    EcdsaP256,
    EcdsaP384,
    Ed25519,
}

impl KeyAlgorithm {
    fn signature_algorithm(self) -> &'static SignatureAlgorithm {
        match self {
            KeyAlgorithm::EcdsaP256 => &rcgen::PKCS_ECDSA_P256_SHA256,
            KeyAlgorithm::EcdsaP384 => &rcgen::PKCS_ECDSA_P384_SHA384,
            KeyAlgorithm::Ed25519 => &rcgen::PKCS_ED25519,
        }
    }
}

impl FromStr for KeyAlgorithm {
    type Err = CertError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "" | "P256" => Ok(KeyAlgorithm::EcdsaP256),
            "P384" => Ok(KeyAlgorithm::EcdsaP384),
            "ED25519" => Ok(KeyAlgorithm::Ed25519),
            _ => Err(CertError::UnsupportedAlgorithm(s.to_string())),
        }
    }
}

/// Parameters for a generated certificate.
#[derive(Debug, Clone)]
pub struct CertParams {
    /// Comma-separated hostnames and IPs to generate a certificate for.
    pub hosts: String,
    /// Start of validity; defaults to one minute ago.
    pub valid_from: Option<OffsetDateTime>,
    /// Validity duration.
    pub valid_for: Duration,
    /// Whether this cert should be its own certificate authority.
    pub is_ca: bool,
    pub key_algorithm: KeyAlgorithm,
    /// Extended key usages in addition to server auth.
    pub additional_usages: Vec<ExtendedKeyUsagePurpose>,
}

impl CertParams {
    pub fn new(hosts: impl Into<String>) -> Self {
        Self {
            hosts: hosts.into(),
            valid_from: None,
            valid_for: DEFAULT_VALID_FOR,
            is_ca: false,
            key_algorithm: KeyAlgorithm::default(),
            additional_usages: Vec::new(),
        }
    }

    pub fn with_client_auth(mut self) -> Self {
        self.additional_usages.push(ExtendedKeyUsagePurpose::ClientAuth);
        self
    }
}

/// A PEM-encoded certificate and its private key.
#[derive(Clone, PartialEq, Eq)]
pub struct CertPair {
    pub cert_pem: String,
    pub key_pem: String,
}

impl std::fmt::Debug for CertPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CertPair")
            .field("cert_pem", &self.cert_pem)
            .field("key_pem", &"<redacted>")
            .finish()
    }
}

/// Generate a self-signed certificate and key.
pub fn generate(params: &CertParams) -> Result<CertPair, CertError> {
    let hosts: Vec<&str> = params
        .hosts
        .split(',')
        .map(str::trim)
        .filter(|h| !h.is_empty())
        .collect();
    if hosts.is_empty() {
        return Err(CertError::MissingHosts);
    }

    let mut cert_params = CertificateParams::default();

    let mut serial = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut serial);
    serial[0] &= 0x7f;
    cert_params.serial_number = Some(SerialNumber::from_slice(&serial));

    let mut dn = DistinguishedName::new();
    dn.push(DnType::OrganizationName, ORGANIZATION);
    cert_params.distinguished_name = dn;

    let not_before = params
        .valid_from
        .unwrap_or_else(|| OffsetDateTime::now_utc() - time::Duration::seconds(NOT_BEFORE_OFFSET_SECS));
    cert_params.not_before = not_before;
    cert_params.not_after = not_before + time::Duration::seconds(params.valid_for.as_secs() as i64);

    cert_params.key_usages = vec![
        KeyUsagePurpose::KeyEncipherment,
        KeyUsagePurpose::DigitalSignature,
    ];
    cert_params.extended_key_usages = vec![ExtendedKeyUsagePurpose::ServerAuth];
    cert_params
        .extended_key_usages
        .extend(params.additional_usages.iter().cloned());

    for host in hosts {
        let san = match host.parse::<IpAddr>() {
            Ok(ip) => SanType::IpAddress(ip),
            Err(_) => SanType::DnsName(
                host.try_into()
                    .map_err(|_| CertError::InvalidHost(host.to_string()))?,
            ),
        };
        cert_params.subject_alt_names.push(san);
    }

    if params.is_ca {
        cert_params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
        cert_params.key_usages.push(KeyUsagePurpose::KeyCertSign);
    }

    let key_pair = KeyPair::generate_for(params.key_algorithm.signature_algorithm())?;
    let cert = cert_params.self_signed(&key_pair)?;

    Ok(CertPair {
        cert_pem: cert.pem(),
        key_pem: key_pair.serialize_pem(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generates_parseable_pem() {
        let pair = generate(&CertParams::new("localhost,127.0.0.1")).unwrap();
        assert!(pair.cert_pem.starts_with("-----BEGIN CERTIFICATE-----"));

        let certs: Vec<_> = rustls_pemfile::certs(&mut pair.cert_pem.as_bytes())
            .collect::<Result<_, _>>()
            .unwrap();
        assert_eq!(certs.len(), 1);

        let key = rustls_pemfile::private_key(&mut pair.key_pem.as_bytes()).unwrap();
        assert!(key.is_some());
    }

    #[test]
    fn each_call_yields_a_fresh_key() {
        let params = CertParams::new("localhost");
        let a = generate(&params).unwrap();
        let b = generate(&params).unwrap();
        assert_ne!(a.key_pem, b.key_pem);
        assert_ne!(a.cert_pem, b.cert_pem);
    }

    #[test]
    fn empty_hosts_are_rejected() {
        assert_eq!(generate(&CertParams::new(" , ")).unwrap_err(), CertError::MissingHosts);
    }

    #[test]
    fn key_algorithm_names() {
        assert_eq!("p384".parse::<KeyAlgorithm>().unwrap(), KeyAlgorithm::EcdsaP384);
        assert_eq!("ED25519".parse::<KeyAlgorithm>().unwrap(), KeyAlgorithm::Ed25519);
        assert!(matches!(
            "P521".parse::<KeyAlgorithm>(),
            Err(CertError::UnsupportedAlgorithm(_))
        ));
    }

    #[test]
    fn ca_and_client_auth_variants_generate() {
        let mut params = CertParams::new("localhost").with_client_auth();
        params.is_ca = true;
        params.key_algorithm = KeyAlgorithm::Ed25519;
        assert!(generate(&params).is_ok());
    }

    #[test]
    fn debug_hides_private_key() {
        let pair = generate(&CertParams::new("localhost")).unwrap();
        let rendered = format!("{:?}", pair);
        assert!(!rendered.contains("PRIVATE KEY"));
    }
}
