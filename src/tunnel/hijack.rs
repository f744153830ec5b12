use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncWrite};

use crate::tunnel::error::TunnelError;

/// A raw connection taken over from the HTTP layer.
#[derive(Debug)]
pub struct Hijacked<Io> {
    pub io: Io,
    /// Bytes the HTTP layer read past the request head.
    pub buffered: Bytes,
}

/// Hands out exclusive raw ownership of an inbound connection.
///
/// Succeeds at most once. After a successful hijack the caller owns the
/// stream and the HTTP layer must not write to it again.
pub trait Hijack {
    type Io: AsyncRead + AsyncWrite + Unpin + Send + 'static;

    fn hijack(&mut self) -> Result<Hijacked<Self::Io>, TunnelError>;
}
