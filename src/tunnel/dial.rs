//! Target address parsing and outbound dialing.
//!
//! The dial strategy is a pure function of the destination port: 443 is
//! dialed over TLS, every other port as plain TCP. No content sniffing.

use std::future::Future;
use std::io;
use std::sync::Arc;
use std::time::Duration;

use rustls::pki_types::ServerName;
use rustls::ClientConfig;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio_rustls::TlsConnector;

use crate::net::tls::default_client_config;
use crate::net::MaybeTlsStream;

/// Conventional TLS port.
pub const TLS_PORT: u16 = 443;

/// A CONNECT request-target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TargetAddr {
    /// `host:port` (or `[v6]:port`) with a numeric port.
    HostPort { host: String, port: u16 },
    /// An authority that could not be split. Dialed as-is over plain TCP,
    /// for compatibility with clients that relied on that behaviour.
    Raw(String),
}

impl TargetAddr {
    pub fn parse(authority: &str) -> Self {
        let raw = || TargetAddr::Raw(authority.to_string());

        let (host, port) = if let Some(rest) = authority.strip_prefix('[') {
            match rest.split_once("]:") {
                Some(parts) => parts,
                None => return raw(),
            }
        } else {
            match authority.rsplit_once(':') {
                Some((host, _)) if host.contains(':') => return raw(),
                Some(parts) => parts,
                None => return raw(),
            }
        };

        if host.is_empty() {
            return raw();
        }
        match port.parse::<u16>() {
            Ok(port) => TargetAddr::HostPort {
                host: host.to_string(),
                port,
            },
            Err(_) => raw(),
        }
    }

    pub fn host(&self) -> &str {
        match self {
            TargetAddr::HostPort { host, .. } => host,
            TargetAddr::Raw(raw) => raw,
        }
    }

    pub fn port(&self) -> Option<u16> {
        match self {
            TargetAddr::HostPort { port, .. } => Some(*port),
            TargetAddr::Raw(_) => None,
        }
    }
}

impl std::fmt::Display for TargetAddr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TargetAddr::HostPort { host, port } if host.contains(':') => write!(f, "[{}]:{}", host, port),
            TargetAddr::HostPort { host, port } => write!(f, "{}:{}", host, port),
            TargetAddr::Raw(raw) => f.write_str(raw),
        }
    }
}

/// Transport security used to reach the target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DialStrategy {
    Plain,
    Tls,
}

impl DialStrategy {
    /// Port 443 selects TLS; anything else, or no parseable port, is plain.
    pub fn for_port(port: Option<u16>) -> Self {
        match port {
            Some(TLS_PORT) => DialStrategy::Tls,
            _ => DialStrategy::Plain,
        }
    }

    /// Strategy for `target`. With the heuristic disabled every target is plain.
    pub fn select(target: &TargetAddr, tls_heuristic: bool) -> Self {
        if tls_heuristic {
            Self::for_port(target.port())
        } else {
            DialStrategy::Plain
        }
    }

    pub fn is_tls(self) -> bool {
        self == DialStrategy::Tls
    }
}

/// Opens outbound connections to tunnel targets.
pub trait Connect: Send + Sync {
    type Stream: AsyncRead + AsyncWrite + Unpin + Send + 'static;

    fn connect(
        &self,
        target: &TargetAddr,
        strategy: DialStrategy,
    ) -> impl Future<Output = io::Result<Self::Stream>> + Send;
}

/// Dials targets over TCP, adding a TLS client handshake for [`DialStrategy::Tls`].
#[derive(Clone)]
pub struct Dialer {
    tls: TlsConnector,
    connect_timeout: Duration,
}

impl Dialer {
    /// Dialer trusting the bundled web PKI roots.
    pub fn new(connect_timeout: Duration) -> io::Result<Self> {
        Ok(Self::with_client_config(default_client_config()?, connect_timeout))
    }

    pub fn with_client_config(config: ClientConfig, connect_timeout: Duration) -> Self {
        Self {
            tls: TlsConnector::from(Arc::new(config)),
            connect_timeout,
        }
    }

    async fn dial(&self, target: &TargetAddr, strategy: DialStrategy) -> io::Result<MaybeTlsStream> {
        let tcp = match target {
            TargetAddr::HostPort { host, port } => TcpStream::connect((host.as_str(), *port)).await?,
            TargetAddr::Raw(raw) => TcpStream::connect(raw.as_str()).await?,
        };
        tcp.set_nodelay(true).ok();

        match strategy {
            DialStrategy::Plain => Ok(MaybeTlsStream::Plain(tcp)),
            DialStrategy::Tls => {
                let server_name = ServerName::try_from(target.host().to_string())
                    .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;
                let tls = self.tls.connect(server_name, tcp).await?;
                Ok(MaybeTlsStream::from(tls))
            }
        }
    }
}

impl Connect for Dialer {
    type Stream = MaybeTlsStream;

    async fn connect(&self, target: &TargetAddr, strategy: DialStrategy) -> io::Result<MaybeTlsStream> {
        tracing::debug!(target = %target, tls = strategy.is_tls(), "Dialing target");
        tokio::time::timeout(self.connect_timeout, self.dial(target, strategy))
            .await
            .map_err(|_| io::Error::new(io::ErrorKind::TimedOut, "connect timed out"))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    #[test]
    fn parses_host_and_port() {
        assert_eq!(
            TargetAddr::parse("example.com:443"),
            TargetAddr::HostPort { host: "example.com".into(), port: 443 }
        );
        assert_eq!(
            TargetAddr::parse("[::1]:8443"),
            TargetAddr::HostPort { host: "::1".into(), port: 8443 }
        );
        assert_eq!(TargetAddr::parse("[::1]:8443").to_string(), "[::1]:8443");
    }

    #[test]
    fn malformed_authority_falls_back_to_raw() {
        for authority in ["example.com", "example.com:https", ":443", "::1:443", "[::1]", "host:99999"] {
            assert_eq!(TargetAddr::parse(authority), TargetAddr::Raw(authority.to_string()));
            assert_eq!(TargetAddr::parse(authority).to_string(), authority);
        }
    }

    #[test]
    fn port_443_selects_tls() {
        assert_eq!(DialStrategy::for_port(Some(443)), DialStrategy::Tls);
        for port in [80, 8080, 8443, 9999, 4430] {
            assert_eq!(DialStrategy::for_port(Some(port)), DialStrategy::Plain);
        }
        assert_eq!(DialStrategy::for_port(None), DialStrategy::Plain);
    }

    #[test]
    fn heuristic_can_be_disabled() {
        let target = TargetAddr::parse("example.com:443");
        assert_eq!(DialStrategy::select(&target, true), DialStrategy::Tls);
        assert_eq!(DialStrategy::select(&target, false), DialStrategy::Plain);
        assert_eq!(
            DialStrategy::select(&TargetAddr::parse("example.com"), true),
            DialStrategy::Plain
        );
    }

    #[tokio::test]
    async fn plain_dial_reaches_listener() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            socket.write_all(b"hello").await.unwrap();
        });

        let dialer = Dialer::new(Duration::from_secs(2)).unwrap();
        let mut stream = dialer
            .connect(&TargetAddr::parse(&addr.to_string()), DialStrategy::Plain)
            .await
            .unwrap();
        assert!(!stream.is_tls());

        let mut buf = [0u8; 5];
        stream.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"hello");
    }

    #[tokio::test]
    async fn refused_dial_is_an_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let dialer = Dialer::new(Duration::from_secs(2)).unwrap();
        let result = dialer
            .connect(&TargetAddr::parse(&addr.to_string()), DialStrategy::Plain)
            .await;
        assert!(result.is_err());
    }
}
