//! Plain-or-TLS byte streams.

use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};

use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::TcpStream;
use tokio_rustls::TlsStream;

use crate::net::tls::TlsInfo;

/// A TCP connection, optionally wrapped in TLS (client or server side).
#[derive(Debug)]
pub enum MaybeTlsStream {
    Plain(TcpStream),
    Tls(Box<TlsStream<TcpStream>>),
}

impl MaybeTlsStream {
    pub fn is_tls(&self) -> bool {
        matches!(self, MaybeTlsStream::Tls(_))
    }

    /// Negotiated parameters when this is the server side of a TLS connection.
    pub fn tls_info(&self) -> Option<TlsInfo> {
        match self {
            MaybeTlsStream::Tls(tls) => match tls.as_ref() {
                TlsStream::Server(server) => Some(TlsInfo::from_connection(server.get_ref().1)),
                TlsStream::Client(_) => None,
            },
            MaybeTlsStream::Plain(_) => None,
        }
    }
}

impl From<TcpStream> for MaybeTlsStream {
    fn from(stream: TcpStream) -> Self {
        MaybeTlsStream::Plain(stream)
    }
}

impl From<tokio_rustls::server::TlsStream<TcpStream>> for MaybeTlsStream {
    fn from(stream: tokio_rustls::server::TlsStream<TcpStream>) -> Self {
        MaybeTlsStream::Tls(Box::new(TlsStream::Server(stream)))
    }
}

impl From<tokio_rustls::client::TlsStream<TcpStream>> for MaybeTlsStream {
    fn from(stream: tokio_rustls::client::TlsStream<TcpStream>) -> Self {
        MaybeTlsStream::Tls(Box::new(TlsStream::Client(stream)))
    }
}

impl AsyncRead for MaybeTlsStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match self.get_mut() {
            MaybeTlsStream::Plain(s) => Pin::new(s).poll_read(cx, buf),
            MaybeTlsStream::Tls(s) => Pin::new(s.as_mut()).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for MaybeTlsStream {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        data: &[u8],
    ) -> Poll<io::Result<usize>> {
        match self.get_mut() {
            MaybeTlsStream::Plain(s) => Pin::new(s).poll_write(cx, data),
            MaybeTlsStream::Tls(s) => Pin::new(s.as_mut()).poll_write(cx, data),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            MaybeTlsStream::Plain(s) => Pin::new(s).poll_flush(cx),
            MaybeTlsStream::Tls(s) => Pin::new(s.as_mut()).poll_flush(cx),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            MaybeTlsStream::Plain(s) => Pin::new(s).poll_shutdown(cx),
            MaybeTlsStream::Tls(s) => Pin::new(s.as_mut()).poll_shutdown(cx),
        }
    }
}
