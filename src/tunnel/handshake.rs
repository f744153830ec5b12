//! CONNECT handshake: validate, dial, hijack, acknowledge.
//!
//! # Data Flow
//! ```text
//! RequestHead ──▶ method check ──▶ parse authority ──▶ dial target
//!                     │ 400              │ raw fallback      │ 500
//!                     ▼                  ▼                   ▼
//!                  rejected        plain dial of       rejected, client
//!                                  literal string      never hijacked
//!
//! dial ok ──▶ hijack client ──▶ write "HTTP/1.1 200 OK\r\n\r\n" ──▶ TunnelSession
//! ```
//!
//! # Design Decisions
//! - The target is dialed before the client is hijacked, so a dial
//!   failure can still be answered with a framed HTTP error
//! - The success line is written straight to the raw stream; nothing
//!   after it is HTTP

use std::time::Instant;

use tokio::io::AsyncWriteExt;

use crate::config::TunnelConfig;
use crate::http::request::RequestHead;
use crate::http::response::CONNECT_ESTABLISHED;
use crate::net::SessionId;
use crate::tunnel::dial::{Connect, DialStrategy, Dialer, TargetAddr};
use crate::tunnel::error::TunnelError;
use crate::tunnel::hijack::Hijack;
use crate::tunnel::relay::RelayConfig;
use crate::tunnel::session::{SessionReport, SessionState, TunnelSession};

/// Turns CONNECT requests into running tunnel sessions.
#[derive(Clone)]
pub struct Tunneler<D = Dialer> {
    connector: D,
    tls_heuristic: bool,
    relay: RelayConfig,
}

impl<D: Connect> Tunneler<D> {
    pub fn new(connector: D, config: &TunnelConfig) -> Self {
        Self {
            connector,
            tls_heuristic: config.tls_dial_heuristic,
            relay: RelayConfig::from(config),
        }
    }

    pub fn relay_config(&self) -> &RelayConfig {
        &self.relay
    }

    /// Run the handshake for one request.
    ///
    /// On `Err`, [`TunnelError::status`] tells whether the connection is
    /// still framed and which status to answer with.
    pub async fn handshake<H>(
        &self,
        id: SessionId,
        head: &RequestHead,
        conn: &mut H,
    ) -> Result<TunnelSession<H::Io, D::Stream>, TunnelError>
    where
        H: Hijack + Send,
    {
        let started = Instant::now();

        if head.method != axum::http::Method::CONNECT {
            tracing::debug!(session_id = %id, method = %head.method, "Rejecting non-CONNECT request");
            return Err(TunnelError::not_connect());
        }

        match &head.tls {
            Some(tls) => tracing::debug!(
                session_id = %id,
                handshake_complete = tls.handshake_complete,
                version = tls.version.as_deref().unwrap_or("-"),
                cipher_suite = tls.cipher_suite.as_deref().unwrap_or("-"),
                alpn = tls.alpn.as_deref().unwrap_or("-"),
                "Inbound TLS"
            ),
            None => tracing::debug!(session_id = %id, "Inbound connection has no TLS"),
        }

        let target = TargetAddr::parse(&head.target);
        if let TargetAddr::Raw(raw) = &target {
            tracing::warn!(session_id = %id, authority = %raw, "Unparseable CONNECT authority, dialing as given");
        }
        let strategy = DialStrategy::select(&target, self.tls_heuristic);

        tracing::debug!(
            session_id = %id,
            target = %target,
            state = %SessionState::Dialing,
            "Session state"
        );
        let target_conn = self
            .connector
            .connect(&target, strategy)
            .await
            .map_err(|source| {
                tracing::warn!(session_id = %id, target = %target, error = %source, "Target unreachable");
                TunnelError::TargetUnreachable {
                    target: target.to_string(),
                    source,
                }
            })?;

        let mut client = conn.hijack()?;
        client.io.write_all(CONNECT_ESTABLISHED).await?;
        client.io.flush().await?;

        tracing::info!(
            session_id = %id,
            target = %target,
            tls = strategy.is_tls(),
            "Accepting CONNECT to {}",
            target
        );

        Ok(TunnelSession::established(
            id,
            target,
            strategy.is_tls(),
            client,
            target_conn,
            started,
        ))
    }

    /// Handshake, then relay until both directions end.
    pub async fn serve<H>(&self, id: SessionId, head: &RequestHead, conn: &mut H) -> Result<SessionReport, TunnelError>
    where
        H: Hijack + Send,
    {
        let session = self.handshake(id, head, conn).await?;
        Ok(session.run(&self.relay).await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tunnel::Hijacked;
    use axum::http::{Method, StatusCode};
    use bytes::Bytes;
    use std::io;
    use std::sync::Mutex;
    use tokio::io::{duplex, AsyncReadExt, DuplexStream};

    struct MockConnector {
        dialed: Mutex<Vec<(TargetAddr, DialStrategy)>>,
        target: Mutex<Option<DuplexStream>>,
    }

    impl MockConnector {
        fn new(target: Option<DuplexStream>) -> Self {
            Self {
                dialed: Mutex::new(Vec::new()),
                target: Mutex::new(target),
            }
        }

        fn dialed(&self) -> Vec<(TargetAddr, DialStrategy)> {
            self.dialed.lock().unwrap().clone()
        }
    }

    impl Connect for &MockConnector {
        type Stream = DuplexStream;

        async fn connect(&self, target: &TargetAddr, strategy: DialStrategy) -> io::Result<DuplexStream> {
            self.dialed.lock().unwrap().push((target.clone(), strategy));
            self.target
                .lock()
                .unwrap()
                .take()
                .ok_or_else(|| io::Error::new(io::ErrorKind::ConnectionRefused, "connection refused"))
        }
    }

    struct MockConn {
        io: Option<DuplexStream>,
        buffered: Bytes,
        hijacks: usize,
        unsupported: bool,
    }

    impl MockConn {
        fn new(io: DuplexStream) -> Self {
            Self {
                io: Some(io),
                buffered: Bytes::new(),
                hijacks: 0,
                unsupported: false,
            }
        }
    }

    impl Hijack for MockConn {
        type Io = DuplexStream;

        fn hijack(&mut self) -> Result<Hijacked<DuplexStream>, TunnelError> {
            if self.unsupported {
                return Err(TunnelError::HijackUnsupported("not a raw connection".into()));
            }
            self.hijacks += 1;
            let io = self
                .io
                .take()
                .ok_or_else(|| TunnelError::HijackUnsupported("already hijacked".into()))?;
            Ok(Hijacked {
                io,
                buffered: std::mem::take(&mut self.buffered),
            })
        }
    }

    fn connect_head(target: &str) -> RequestHead {
        RequestHead::new(Method::CONNECT, target)
    }

    #[tokio::test]
    async fn non_connect_is_rejected_before_dialing() {
        let connector = MockConnector::new(None);
        let tunneler = Tunneler::new(&connector, &TunnelConfig::default());
        let (_client, proxy_side) = duplex(64);
        let mut conn = MockConn::new(proxy_side);

        let err = tunneler
            .handshake(SessionId::new(), &RequestHead::new(Method::GET, "/"), &mut conn)
            .await
            .unwrap_err();

        assert!(matches!(err, TunnelError::InvalidMethod(_)));
        assert_eq!(err.to_string(), "not CONNECT request");
        assert_eq!(err.status(), Some(StatusCode::BAD_REQUEST));
        assert!(connector.dialed().is_empty());
        assert_eq!(conn.hijacks, 0);
    }

    #[tokio::test]
    async fn dial_failure_leaves_client_unhijacked() {
        let connector = MockConnector::new(None);
        let tunneler = Tunneler::new(&connector, &TunnelConfig::default());
        let (mut client, proxy_side) = duplex(64);
        let mut conn = MockConn::new(proxy_side);

        let err = tunneler
            .handshake(SessionId::new(), &connect_head("db.internal:5432"), &mut conn)
            .await
            .unwrap_err();

        assert!(matches!(err, TunnelError::TargetUnreachable { .. }));
        assert_eq!(err.to_string(), "can't connect: connection refused");
        assert_eq!(err.status(), Some(StatusCode::INTERNAL_SERVER_ERROR));
        assert_eq!(conn.hijacks, 0);

        drop(conn);
        let mut received = Vec::new();
        client.read_to_end(&mut received).await.unwrap();
        assert!(received.is_empty());
    }

    #[tokio::test]
    async fn port_443_is_dialed_with_tls_and_acknowledged() {
        let (proxy_target, mut target) = duplex(1024);
        let connector = MockConnector::new(Some(proxy_target));
        let tunneler = Tunneler::new(&connector, &TunnelConfig::default());
        let (mut client, proxy_client) = duplex(1024);
        let mut conn = MockConn::new(proxy_client);
        conn.buffered = Bytes::from_static(b"early");

        let session = tunneler
            .handshake(SessionId::new(), &connect_head("example.com:443"), &mut conn)
            .await
            .unwrap();

        assert_eq!(session.state(), SessionState::Established);
        assert!(session.target_is_tls());
        assert_eq!(session.client_buffered(), b"early");
        assert_eq!(
            connector.dialed(),
            vec![(
                TargetAddr::HostPort { host: "example.com".into(), port: 443 },
                DialStrategy::Tls
            )]
        );

        let mut line = vec![0u8; CONNECT_ESTABLISHED.len()];
        client.read_exact(&mut line).await.unwrap();
        assert_eq!(line, CONNECT_ESTABLISHED);

        let relay_config = tunneler.relay_config().clone();
        let running = tokio::spawn(async move { session.run(&relay_config).await });

        client.write_all(b"ping").await.unwrap();
        let mut upstream = [0u8; 9];
        target.read_exact(&mut upstream).await.unwrap();
        assert_eq!(&upstream, b"earlyping");

        target.write_all(b"pong").await.unwrap();
        let mut downstream = [0u8; 4];
        client.read_exact(&mut downstream).await.unwrap();
        assert_eq!(&downstream, b"pong");

        drop(client);
        drop(target);
        let report = running.await.unwrap();
        assert_eq!(report.state, SessionState::Closed);
        assert_eq!(report.relay.client_to_target.bytes, 9);
        assert_eq!(report.relay.target_to_client.bytes, 4);
    }

    #[tokio::test]
    async fn heuristic_off_dials_plain_and_raw_authority_is_kept() {
        let (proxy_target, _target) = duplex(64);
        let connector = MockConnector::new(Some(proxy_target));
        let config = TunnelConfig {
            tls_dial_heuristic: false,
            ..TunnelConfig::default()
        };
        let tunneler = Tunneler::new(&connector, &config);
        let (_client, proxy_client) = duplex(64);
        let mut conn = MockConn::new(proxy_client);

        let session = tunneler
            .handshake(SessionId::new(), &connect_head("example.com"), &mut conn)
            .await
            .unwrap();

        assert!(!session.target_is_tls());
        assert_eq!(
            connector.dialed(),
            vec![(TargetAddr::Raw("example.com".into()), DialStrategy::Plain)]
        );
    }

    #[tokio::test]
    async fn hijack_failure_is_a_server_error() {
        let (proxy_target, _target) = duplex(64);
        let connector = MockConnector::new(Some(proxy_target));
        let tunneler = Tunneler::new(&connector, &TunnelConfig::default());
        let (_client, proxy_client) = duplex(64);
        let mut conn = MockConn::new(proxy_client);
        conn.unsupported = true;

        let err = tunneler
            .handshake(SessionId::new(), &connect_head("example.com:80"), &mut conn)
            .await
            .unwrap_err();

        assert!(matches!(err, TunnelError::HijackUnsupported(_)));
        assert_eq!(err.status(), Some(StatusCode::INTERNAL_SERVER_ERROR));
    }
}
