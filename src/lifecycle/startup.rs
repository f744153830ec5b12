//! Startup orchestration.
//!
//! # Responsibilities
//! - Resolve the key material every TLS listener needs
//! - Bind the echo, mutual-TLS and tunnel listeners
//! - Spawn one task per listener, each subscribed to shutdown
//!
//! # Design Decisions
//! - Fail fast: key material and every bind are resolved before any
//!   listener starts serving
//! - Listeners bind from config, so tests can pass port 0 and read the
//!   real addresses back from [`Running::addrs`]

use std::net::SocketAddr;

use thiserror::Error;
use tokio::net::TcpListener;
use tokio::task::JoinSet;

use crate::certs::{CertError, CertStore};
use crate::config::ProxyConfig;
use crate::http::{serve_http, serve_https, TunnelServer};
use crate::lifecycle::Shutdown;
use crate::net::tls::{axum_tls_config, mtls_server_config};
use crate::net::{Listener, ListenerError};

#[derive(Debug, Error)]
pub enum StartupError {
    #[error("failed to bind {name} listener on {address}: {source}")]
    Bind {
        name: &'static str,
        address: String,
        #[source]
        source: std::io::Error,
    },

    #[error("key material: {0}")]
    Certs(#[from] CertError),

    #[error("I/O error during startup: {0}")]
    Io(std::io::Error),

    #[error(transparent)]
    Listener(#[from] ListenerError),
}

/// Addresses the listeners actually bound.
#[derive(Debug, Clone, Copy)]
pub struct BoundAddrs {
    pub http: SocketAddr,
    pub https: SocketAddr,
    pub tunnel: SocketAddr,
}

/// Listener tasks started by [`start`].
pub struct Running {
    pub addrs: BoundAddrs,
    tasks: JoinSet<(&'static str, std::io::Result<()>)>,
}

impl Running {
    /// Wait for every listener to stop. Returns the first listener error.
    pub async fn wait(mut self) -> std::io::Result<()> {
        let mut first_error = None;
        while let Some(joined) = self.tasks.join_next().await {
            match joined {
                Ok((name, Ok(()))) => tracing::debug!(listener = name, "Listener stopped"),
                Ok((name, Err(e))) => {
                    tracing::error!(listener = name, error = %e, "Listener failed");
                    first_error.get_or_insert(e);
                }
                Err(e) => {
                    tracing::error!(error = %e, "Listener task panicked");
                    first_error.get_or_insert(std::io::Error::other(e));
                }
            }
        }
        first_error.map_or(Ok(()), Err)
    }
}

async fn bind_tokio(name: &'static str, address: &str) -> Result<TcpListener, StartupError> {
    TcpListener::bind(address).await.map_err(|source| StartupError::Bind {
        name,
        address: address.to_string(),
        source,
    })
}

/// Bind every listener and start serving.
pub async fn start(
    config: &ProxyConfig,
    certs: &'static CertStore,
    shutdown: &Shutdown,
) -> Result<Running, StartupError> {
    let mtls_identity = certs.mtls_identity()?;
    let https_tls = mtls_server_config(mtls_identity, config.https.verify_client_cert).map_err(StartupError::Io)?;
    let tunnel_server = TunnelServer::new(&config.tunnel, certs).map_err(StartupError::Io)?;

    let http_listener = bind_tokio("http", &config.http.bind_address).await?;
    let https_listener = bind_tokio("https", &config.https.bind_address)
        .await?
        .into_std()
        .map_err(StartupError::Io)?;
    let tunnel_listener = Listener::bind(&config.tunnel.bind_address, config.tunnel.max_sessions).await?;

    let addrs = BoundAddrs {
        http: http_listener.local_addr().map_err(StartupError::Io)?,
        https: https_listener.local_addr().map_err(StartupError::Io)?,
        tunnel: tunnel_listener.local_addr().map_err(StartupError::Io)?,
    };

    let mut tasks = JoinSet::new();
    let http_shutdown = shutdown.subscribe();
    tasks.spawn(async move { ("http", serve_http(http_listener, certs, http_shutdown).await) });

    let https_shutdown = shutdown.subscribe();
    let https_tls = axum_tls_config(https_tls);
    tasks.spawn(async move { ("https", serve_https(https_listener, https_tls, certs, https_shutdown).await) });

    let tunnel_shutdown = shutdown.subscribe();
    tasks.spawn(async move { ("tunnel", tunnel_server.run(tunnel_listener, tunnel_shutdown).await) });

    tracing::info!(
        http = %addrs.http,
        https = %addrs.https,
        tunnel = %addrs.tunnel,
        verify_client_cert = config.https.verify_client_cert,
        tunnel_tls = config.tunnel.tls,
        "All listeners started"
    );

    Ok(Running { addrs, tasks })
}
