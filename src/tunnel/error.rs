use axum::http::StatusCode;
use std::io;
use thiserror::Error;

/// One of the two byte streams in a tunnel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    ClientToTarget,
    TargetToClient,
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Direction::ClientToTarget => write!(f, "client->target"),
            Direction::TargetToClient => write!(f, "target->client"),
        }
    }
}

/// Failures of a tunnel session.
#[derive(Error, Debug)]
pub enum TunnelError {
    #[error("{0}")]
    InvalidMethod(String),

    #[error("malformed request: {0}")]
    MalformedRequest(String),

    #[error("can't connect: {source}")]
    TargetUnreachable {
        target: String,
        #[source]
        source: io::Error,
    },

    #[error("hijack unsupported: {0}")]
    HijackUnsupported(String),

    #[error("relay {direction} failed: {source}")]
    RelayIo {
        direction: Direction,
        #[source]
        source: io::Error,
    },

    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

impl TunnelError {
    pub fn not_connect() -> Self {
        TunnelError::InvalidMethod("not CONNECT request".to_string())
    }

    /// Status for the error response, while the connection is still HTTP.
    ///
    /// `None` once the connection has left HTTP framing.
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            TunnelError::InvalidMethod(_) | TunnelError::MalformedRequest(_) => Some(StatusCode::BAD_REQUEST),
            TunnelError::TargetUnreachable { .. } | TunnelError::HijackUnsupported(_) => {
                Some(StatusCode::INTERNAL_SERVER_ERROR)
            }
            TunnelError::RelayIo { .. } | TunnelError::Io(_) => None,
        }
    }
}

/// Errors that mean the peer went away rather than something broke.
pub fn is_peer_gone(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::BrokenPipe
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::UnexpectedEof
            | io::ErrorKind::WriteZero
    )
}
