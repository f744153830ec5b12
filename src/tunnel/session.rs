//! Per-request tunnel session.
//!
//! ```text
//! DIALING ──dial ok + hijack──▶ ESTABLISHED ──▶ RELAYING ──both directions ended──▶ CLOSED
//!    │
//!    └── dial/hijack failure: session rejected, never relays
//! ```

use std::time::{Duration, Instant};

use tokio::io::{AsyncRead, AsyncWrite};

use crate::net::SessionId;
use crate::tunnel::dial::TargetAddr;
use crate::tunnel::hijack::Hijacked;
use crate::tunnel::relay::{relay, RelayConfig, RelayReport};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Dialing,
    Established,
    Relaying,
    Closed,
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            SessionState::Dialing => "DIALING",
            SessionState::Established => "ESTABLISHED",
            SessionState::Relaying => "RELAYING",
            SessionState::Closed => "CLOSED",
        };
        f.write_str(name)
    }
}

/// An established tunnel: the hijacked client and the dialed target.
///
/// Owns both connections. [`TunnelSession::run`] consumes the session, so
/// each connection is closed exactly once, when the relay returns.
#[derive(Debug)]
pub struct TunnelSession<C, T> {
    id: SessionId,
    target: TargetAddr,
    target_is_tls: bool,
    state: SessionState,
    client: Hijacked<C>,
    target_conn: T,
    started: Instant,
}

/// Summary of a finished session.
#[derive(Debug)]
pub struct SessionReport {
    pub id: SessionId,
    pub target: String,
    pub target_is_tls: bool,
    pub state: SessionState,
    pub relay: RelayReport,
    pub duration: Duration,
}

impl<C, T> TunnelSession<C, T>
where
    C: AsyncRead + AsyncWrite + Unpin,
    T: AsyncRead + AsyncWrite + Unpin,
{
    pub(crate) fn established(
        id: SessionId,
        target: TargetAddr,
        target_is_tls: bool,
        client: Hijacked<C>,
        target_conn: T,
        started: Instant,
    ) -> Self {
        tracing::debug!(
            session_id = %id,
            target = %target,
            state = %SessionState::Established,
            "Session state"
        );
        Self {
            id,
            target,
            target_is_tls,
            state: SessionState::Established,
            client,
            target_conn,
            started,
        }
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn target(&self) -> &TargetAddr {
        &self.target
    }

    pub fn target_is_tls(&self) -> bool {
        self.target_is_tls
    }

    /// Bytes that will be sent to the target before any fresh client reads.
    pub fn client_buffered(&self) -> &[u8] {
        &self.client.buffered
    }

    /// Relay until both directions end, then close both connections.
    pub async fn run(mut self, config: &RelayConfig) -> SessionReport {
        self.state = SessionState::Relaying;
        tracing::debug!(session_id = %self.id, state = %self.state, "Session state");

        let relay = relay(
            self.id,
            self.client.io,
            self.client.buffered,
            self.target_conn,
            config,
        )
        .await;

        let duration = self.started.elapsed();
        tracing::info!(
            session_id = %self.id,
            target = %self.target,
            sent = relay.client_to_target.bytes,
            received = relay.target_to_client.bytes,
            duration_ms = duration.as_millis() as u64,
            "Done proxying"
        );

        SessionReport {
            id: self.id,
            target: self.target.to_string(),
            target_is_tls: self.target_is_tls,
            state: SessionState::Closed,
            relay,
            duration,
        }
    }
}
