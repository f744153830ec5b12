//! Generate-once cache for the process's key material.

use std::sync::OnceLock;
use std::time::Duration;

use crate::certs::generate::{generate, CertError, CertPair, CertParams};
use crate::config::CertConfig;

static GLOBAL: OnceLock<CertStore> = OnceLock::new();

/// Holds the proxy listener identity and the mutual-TLS identity.
///
/// Each pair is generated on first access and reused afterwards. A failed
/// generation is cached as well, so every caller observes the same outcome.
#[derive(Debug)]
pub struct CertStore {
    proxy_params: CertParams,
    mtls_params: CertParams,
    proxy: OnceLock<Result<CertPair, CertError>>,
    mtls: OnceLock<Result<CertPair, CertError>>,
}

impl CertStore {
    pub fn new(proxy_params: CertParams, mtls_params: CertParams) -> Self {
        Self {
            proxy_params,
            mtls_params,
            proxy: OnceLock::new(),
            mtls: OnceLock::new(),
        }
    }

    /// Build a store from configuration. The mutual-TLS pair always carries
    /// the client-auth usage.
    pub fn from_config(config: &CertConfig) -> Result<Self, CertError> {
        let key_algorithm = config.key_algorithm.parse()?;
        let valid_for = Duration::from_secs(config.valid_for_hours * 60 * 60);

        let mut proxy = CertParams::new(config.proxy_hosts.clone());
        proxy.key_algorithm = key_algorithm;
        proxy.valid_for = valid_for;

        let mut mtls = CertParams::new(config.mtls_hosts.clone()).with_client_auth();
        mtls.key_algorithm = key_algorithm;
        mtls.valid_for = valid_for;

        Ok(Self::new(proxy, mtls))
    }

    /// The process-wide store. Uses [`CertStore::install_global`]'s value if one
    /// was installed before first use, defaults otherwise.
    pub fn global() -> &'static CertStore {
        GLOBAL.get_or_init(|| {
            let defaults = CertConfig::default();
            CertStore::new(
                CertParams::new(defaults.proxy_hosts),
                CertParams::new(defaults.mtls_hosts).with_client_auth(),
            )
        })
    }

    /// Install the process-wide store. Fails with the rejected store if the
    /// global was already initialized.
    pub fn install_global(store: CertStore) -> Result<&'static CertStore, CertStore> {
        GLOBAL.set(store)?;
        Ok(Self::global())
    }

    /// Identity for the proxy's own TLS listener.
    pub fn proxy_identity(&self) -> Result<&CertPair, CertError> {
        self.proxy
            .get_or_init(|| {
                tracing::debug!(hosts = %self.proxy_params.hosts, "Generating proxy certificate");
                generate(&self.proxy_params)
            })
            .as_ref()
            .map_err(Clone::clone)
    }

    /// Identity for the mutual-TLS listener and its test clients.
    pub fn mtls_identity(&self) -> Result<&CertPair, CertError> {
        self.mtls
            .get_or_init(|| {
                tracing::debug!(hosts = %self.mtls_params.hosts, "Generating mTLS certificate");
                generate(&self.mtls_params)
            })
            .as_ref()
            .map_err(Clone::clone)
    }

    /// Forget both generated pairs; the next access generates new ones.
    pub fn reset(&mut self) {
        self.proxy.take();
        self.mtls.take();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identity_is_generated_once() {
        let store = CertStore::from_config(&CertConfig::default()).unwrap();
        let first = store.mtls_identity().unwrap().clone();
        let second = store.mtls_identity().unwrap();
        assert_eq!(&first, second);
    }

    #[test]
    fn proxy_and_mtls_identities_differ() {
        let store = CertStore::from_config(&CertConfig::default()).unwrap();
        assert_ne!(
            store.proxy_identity().unwrap().cert_pem,
            store.mtls_identity().unwrap().cert_pem
        );
    }

    #[test]
    fn reset_regenerates() {
        let mut store = CertStore::from_config(&CertConfig::default()).unwrap();
        let before = store.proxy_identity().unwrap().clone();
        store.reset();
        let after = store.proxy_identity().unwrap();
        assert_ne!(&before, after);
    }

    #[test]
    fn failure_is_cached() {
        let store = CertStore::new(CertParams::new(""), CertParams::new("localhost"));
        assert_eq!(store.proxy_identity().unwrap_err(), CertError::MissingHosts);
        assert_eq!(store.proxy_identity().unwrap_err(), CertError::MissingHosts);
        assert!(store.mtls_identity().is_ok());
    }

    #[test]
    fn bad_algorithm_in_config() {
        let mut config = CertConfig::default();
        config.key_algorithm = "RSA".into();
        assert!(CertStore::from_config(&config).is_err());
    }

    #[test]
    fn global_is_stable() {
        let a = CertStore::global() as *const CertStore;
        let b = CertStore::global() as *const CertStore;
        assert_eq!(a, b);
    }
}
