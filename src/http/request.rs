//! Hijackable HTTP/1.1 connection.
//!
//! # Responsibilities
//! - Read one request head with `httparse`, bounded by `max_head_bytes`
//! - Keep any bytes read past the head for whoever hijacks the connection
//! - Hand the raw stream out exactly once
//!
//! # Design Decisions
//! - No body handling: the tunnel listener only serves CONNECT, and any
//!   other request is answered with an error and closed
//! - Error responses are written while the connection is still framed

use std::net::SocketAddr;

use axum::http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode};
use bytes::BytesMut;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::http::response::error_response;
use crate::net::TlsInfo;
use crate::tunnel::{Hijack, Hijacked, TunnelError};

const MAX_HEADERS: usize = 64;

/// A parsed request line and headers.
#[derive(Debug, Clone)]
pub struct RequestHead {
    pub method: Method,
    /// Request-target; `host:port` for CONNECT.
    pub target: String,
    /// HTTP/1.x minor version.
    pub version: u8,
    pub headers: HeaderMap,
    /// Negotiated TLS parameters when the inbound connection is TLS.
    pub tls: Option<TlsInfo>,
    pub peer_addr: Option<SocketAddr>,
}

impl RequestHead {
    /// Head for a request built in code rather than read off a socket.
    pub fn new(method: Method, target: impl Into<String>) -> Self {
        Self {
            method,
            target: target.into(),
            version: 1,
            headers: HeaderMap::new(),
            tls: None,
            peer_addr: None,
        }
    }
}

/// An inbound connection still under HTTP framing.
#[derive(Debug)]
pub struct HttpConn<S> {
    io: Option<S>,
    buf: BytesMut,
    max_head_bytes: usize,
    peer_addr: Option<SocketAddr>,
    tls: Option<TlsInfo>,
}

impl<S> HttpConn<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    pub fn new(io: S, max_head_bytes: usize) -> Self {
        Self {
            io: Some(io),
            buf: BytesMut::with_capacity(8 * 1024),
            max_head_bytes,
            peer_addr: None,
            tls: None,
        }
    }

    pub fn with_peer_addr(mut self, peer_addr: SocketAddr) -> Self {
        self.peer_addr = Some(peer_addr);
        self
    }

    pub fn with_tls(mut self, tls: Option<TlsInfo>) -> Self {
        self.tls = tls;
        self
    }

    pub fn is_hijacked(&self) -> bool {
        self.io.is_none()
    }

    /// Read and parse the next request head.
    pub async fn read_head(&mut self) -> Result<RequestHead, TunnelError> {
        loop {
            if let Some(head) = self.parse_buffered()? {
                return Ok(head);
            }
            if self.buf.len() >= self.max_head_bytes {
                return Err(TunnelError::MalformedRequest("request head too large".into()));
            }

            let io = self
                .io
                .as_mut()
                .ok_or_else(|| TunnelError::HijackUnsupported("connection already hijacked".into()))?;
            let n = io.read_buf(&mut self.buf).await?;
            if n == 0 {
                return Err(TunnelError::MalformedRequest("unexpected EOF".into()));
            }
        }
    }

    fn parse_buffered(&mut self) -> Result<Option<RequestHead>, TunnelError> {
        let mut headers = [httparse::EMPTY_HEADER; MAX_HEADERS];
        let mut req = httparse::Request::new(&mut headers);
        let head_len = match req.parse(&self.buf) {
            Ok(httparse::Status::Complete(len)) => len,
            Ok(httparse::Status::Partial) => return Ok(None),
            Err(e) => return Err(TunnelError::MalformedRequest(e.to_string())),
        };

        let method = req
            .method
            .ok_or_else(|| TunnelError::MalformedRequest("missing method".into()))?;
        let method = Method::from_bytes(method.as_bytes())
            .map_err(|e| TunnelError::MalformedRequest(e.to_string()))?;
        let target = req
            .path
            .ok_or_else(|| TunnelError::MalformedRequest("missing request-target".into()))?
            .to_string();

        let mut header_map = HeaderMap::with_capacity(req.headers.len());
        for header in req.headers.iter() {
            let name = HeaderName::from_bytes(header.name.as_bytes())
                .map_err(|e| TunnelError::MalformedRequest(e.to_string()))?;
            let value = HeaderValue::from_bytes(header.value)
                .map_err(|e| TunnelError::MalformedRequest(e.to_string()))?;
            header_map.append(name, value);
        }
        let version = req.version.unwrap_or(1);

        let _ = self.buf.split_to(head_len);

        Ok(Some(RequestHead {
            method,
            target,
            version,
            headers: header_map,
            tls: self.tls.clone(),
            peer_addr: self.peer_addr,
        }))
    }

    /// Answer with an error response and close the connection.
    pub async fn respond_error(&mut self, status: StatusCode, message: &str) -> std::io::Result<()> {
        let io = self.io.as_mut().ok_or_else(|| {
            std::io::Error::new(std::io::ErrorKind::NotConnected, "connection already hijacked")
        })?;
        io.write_all(&error_response(status, message)).await?;
        io.flush().await?;
        io.shutdown().await
    }
}

impl<S> Hijack for HttpConn<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    type Io = S;

    fn hijack(&mut self) -> Result<Hijacked<S>, TunnelError> {
        let io = self
            .io
            .take()
            .ok_or_else(|| TunnelError::HijackUnsupported("connection already hijacked".into()))?;
        let buffered = std::mem::take(&mut self.buf).freeze();
        Ok(Hijacked { io, buffered })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::duplex;

    #[tokio::test]
    async fn parses_connect_head_split_across_reads() {
        let (mut client, server) = duplex(1024);
        let mut conn = HttpConn::new(server, 32 * 1024);

        let reader = tokio::spawn(async move {
            let head = conn.read_head().await.unwrap();
            (head, conn)
        });
        client.write_all(b"CONNECT example.com:443 HT").await.unwrap();
        tokio::task::yield_now().await;
        client
            .write_all(b"TP/1.1\r\nHost: example.com:443\r\n\r\n")
            .await
            .unwrap();

        let (head, conn) = reader.await.unwrap();
        assert_eq!(head.method, Method::CONNECT);
        assert_eq!(head.target, "example.com:443");
        assert_eq!(head.version, 1);
        assert_eq!(head.headers["host"], "example.com:443");
        assert!(!conn.is_hijacked());
    }

    #[tokio::test]
    async fn read_ahead_is_handed_to_hijacker() {
        let (mut client, server) = duplex(1024);
        client
            .write_all(b"CONNECT db:5432 HTTP/1.1\r\n\r\nhello")
            .await
            .unwrap();

        let mut conn = HttpConn::new(server, 32 * 1024);
        conn.read_head().await.unwrap();

        let hijacked = conn.hijack().unwrap();
        assert_eq!(&hijacked.buffered[..], b"hello");
        assert!(conn.is_hijacked());
        assert!(matches!(conn.hijack(), Err(TunnelError::HijackUnsupported(_))));
    }

    #[tokio::test]
    async fn oversized_head_is_rejected() {
        let (mut client, server) = duplex(4096);
        let mut conn = HttpConn::new(server, 1024);
        let junk = format!("GET / HTTP/1.1\r\nX-Junk: {}\r\n", "a".repeat(2000));
        tokio::spawn(async move {
            let _ = client.write_all(junk.as_bytes()).await;
            tokio::time::sleep(std::time::Duration::from_secs(1)).await;
        });

        let err = conn.read_head().await.unwrap_err();
        assert!(matches!(err, TunnelError::MalformedRequest(_)));
    }

    #[tokio::test]
    async fn garbage_and_eof_are_malformed() {
        let (mut client, server) = duplex(1024);
        let mut conn = HttpConn::new(server, 1024);
        client.write_all(b"\x01\x02 nonsense\r\n\r\n").await.unwrap();
        assert!(matches!(conn.read_head().await, Err(TunnelError::MalformedRequest(_))));

        let (client, server) = duplex(1024);
        let mut conn = HttpConn::new(server, 1024);
        drop(client);
        assert!(matches!(conn.read_head().await, Err(TunnelError::MalformedRequest(_))));
    }

    #[tokio::test]
    async fn error_response_then_close() {
        let (mut client, server) = duplex(1024);
        let mut conn = HttpConn::new(server, 1024);
        conn.respond_error(StatusCode::BAD_REQUEST, "not CONNECT request")
            .await
            .unwrap();

        let mut response = String::new();
        client.read_to_string(&mut response).await.unwrap();
        assert!(response.starts_with("HTTP/1.1 400 Bad Request\r\n"));
        assert!(response.ends_with("\r\n\r\nnot CONNECT request\n"));
    }
}
