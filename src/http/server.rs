//! CONNECT listener.
//!
//! # Responsibilities
//! - Accept connections under the `max_sessions` bound
//! - Optionally terminate TLS with the proxy identity
//! - Parse one request head per connection and hand it to the tunneler
//! - Answer pre-hijack failures with a framed error response
//! - Drain live sessions on shutdown
//!
//! # Design Decisions
//! - One task per connection; the relay runs inside that task
//! - Every non-CONNECT request is rejected, so the listener never needs a
//!   general HTTP stack

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::http::StatusCode;
use rustls::ServerConfig;
use tokio::net::TcpStream;
use tokio::sync::broadcast;
use tokio_rustls::TlsAcceptor;

use crate::certs::CertStore;
use crate::config::TunnelConfig;
use crate::http::request::HttpConn;
use crate::net::tls::server_config;
use crate::net::{Listener, ListenerError, MaybeTlsStream, SessionGuard, SessionTracker};
use crate::tunnel::{Connect, Dialer, Tunneler};

/// How long shutdown waits for live sessions to end.
pub const DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Serves CONNECT tunnels on a bounded listener.
pub struct TunnelServer<D = Dialer> {
    tunneler: Arc<Tunneler<D>>,
    acceptor: Option<TlsAcceptor>,
    max_sessions: usize,
    max_head_bytes: usize,
    head_timeout: Duration,
    sessions: SessionTracker,
    drain_timeout: Duration,
}

impl TunnelServer<Dialer> {
    /// Server dialing with the web PKI roots. With `config.tls` the
    /// listener is TLS, using the proxy identity from `certs`.
    pub fn new(config: &TunnelConfig, certs: &CertStore) -> std::io::Result<Self> {
        let dialer = Dialer::new(config.connect_timeout())?;
        let server = Self::with_connector(dialer, config);
        if !config.tls {
            return Ok(server);
        }
        let identity = certs.proxy_identity().map_err(std::io::Error::other)?;
        Ok(server.with_tls(server_config(identity)?))
    }
}

impl<D> TunnelServer<D>
where
    D: Connect + 'static,
{
    pub fn with_connector(connector: D, config: &TunnelConfig) -> Self {
        Self {
            tunneler: Arc::new(Tunneler::new(connector, config)),
            acceptor: None,
            max_sessions: config.max_sessions,
            max_head_bytes: config.max_head_bytes,
            head_timeout: config.head_timeout(),
            sessions: SessionTracker::new(),
            drain_timeout: DRAIN_TIMEOUT,
        }
    }

    /// Terminate TLS on accepted connections.
    pub fn with_tls(mut self, config: ServerConfig) -> Self {
        self.acceptor = Some(TlsAcceptor::from(Arc::new(config)));
        self
    }

    /// Deadline for the TLS handshake and for the request head.
    pub fn with_head_timeout(mut self, timeout: Duration) -> Self {
        self.head_timeout = timeout;
        self
    }

    pub fn with_drain_timeout(mut self, timeout: Duration) -> Self {
        self.drain_timeout = timeout;
        self
    }

    /// Handle on the live-session count.
    pub fn sessions(&self) -> SessionTracker {
        self.sessions.clone()
    }

    pub fn max_sessions(&self) -> usize {
        self.max_sessions
    }

    /// Accept until `shutdown` fires, then wait for live sessions to drain.
    pub async fn run(self, listener: Listener, mut shutdown: broadcast::Receiver<()>) -> std::io::Result<()> {
        let addr = listener.local_addr()?;
        tracing::info!(
            address = %addr,
            tls = self.acceptor.is_some(),
            max_sessions = listener.max_connections(),
            "Tunnel listener starting"
        );

        loop {
            tokio::select! {
                accepted = listener.accept() => match accepted {
                    Ok((stream, peer_addr, permit)) => {
                        let guard = self.sessions.track();
                        let tunneler = Arc::clone(&self.tunneler);
                        let acceptor = self.acceptor.clone();
                        let limits = HeadLimits {
                            max_bytes: self.max_head_bytes,
                            timeout: self.head_timeout,
                        };
                        tokio::spawn(async move {
                            let _permit = permit;
                            handle_connection(tunneler, acceptor, stream, peer_addr, guard, limits).await;
                        });
                    }
                    Err(ListenerError::Closed) => break,
                    Err(e) => {
                        tracing::warn!(error = %e, "Accept failed");
                        tokio::time::sleep(Duration::from_millis(10)).await;
                    }
                },
                _ = shutdown.recv() => {
                    tracing::info!(address = %addr, "Tunnel listener shutting down");
                    break;
                }
            }
        }

        drop(listener);
        if self.sessions.wait_for_drain(self.drain_timeout).await {
            tracing::info!("Tunnel sessions drained");
        } else {
            tracing::warn!(
                active = self.sessions.active_count(),
                "Sessions still active after drain timeout"
            );
        }
        Ok(())
    }
}

/// Bounds on what a connection may do before it has a request head.
#[derive(Debug, Clone, Copy)]
struct HeadLimits {
    max_bytes: usize,
    timeout: Duration,
}

async fn handle_connection<D: Connect>(
    tunneler: Arc<Tunneler<D>>,
    acceptor: Option<TlsAcceptor>,
    stream: TcpStream,
    peer_addr: SocketAddr,
    guard: SessionGuard,
    limits: HeadLimits,
) {
    let id = guard.id();
    let stream = match acceptor {
        Some(acceptor) => match tokio::time::timeout(limits.timeout, acceptor.accept(stream)).await {
            Ok(Ok(tls)) => MaybeTlsStream::from(tls),
            Ok(Err(e)) => {
                tracing::debug!(session_id = %id, peer_addr = %peer_addr, error = %e, "TLS handshake failed");
                return;
            }
            Err(_) => {
                tracing::debug!(session_id = %id, peer_addr = %peer_addr, "TLS handshake timed out");
                return;
            }
        },
        None => MaybeTlsStream::from(stream),
    };

    let tls = stream.tls_info();
    let mut conn = HttpConn::new(stream, limits.max_bytes)
        .with_peer_addr(peer_addr)
        .with_tls(tls);

    let head = match tokio::time::timeout(limits.timeout, conn.read_head()).await {
        Ok(Ok(head)) => head,
        Ok(Err(e)) => {
            tracing::debug!(session_id = %id, peer_addr = %peer_addr, error = %e, "Bad request head");
            if let Some(status) = e.status() {
                let _ = conn.respond_error(status, &e.to_string()).await;
            }
            return;
        }
        Err(_) => {
            tracing::debug!(session_id = %id, peer_addr = %peer_addr, "Request head timed out");
            let _ = conn
                .respond_error(StatusCode::BAD_REQUEST, "request head timeout")
                .await;
            return;
        }
    };

    match tunneler.serve(id, &head, &mut conn).await {
        Ok(report) => tracing::debug!(
            session_id = %id,
            clean = report.relay.client_to_target.is_clean() && report.relay.target_to_client.is_clean(),
            idle_timed_out = report.relay.idle_timed_out,
            "Session closed"
        ),
        Err(e) => match e.status() {
            Some(status) if !conn.is_hijacked() => {
                if let Err(write_err) = conn.respond_error(status, &e.to_string()).await {
                    tracing::debug!(session_id = %id, error = %write_err, "Failed to write error response");
                }
            }
            _ => tracing::warn!(session_id = %id, error = %e, "Session failed after hijack"),
        },
    }

    drop(guard);
}
