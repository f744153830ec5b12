//! Bidirectional byte relay between a hijacked client and its target.
//!
//! Two copy loops run concurrently on the session's task, one per
//! direction. A loop ends when its source reaches end-of-stream, when its
//! destination is gone, or on an I/O error; the other loop keeps going
//! until it ends on its own. Both connections are closed only after both
//! loops have finished.

use std::io;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::config::TunnelConfig;
use crate::net::SessionId;
use crate::tunnel::error::{is_peer_gone, Direction, TunnelError};

/// Relay tuning.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Read buffer size per direction.
    pub chunk_size: usize,
    /// End the session when neither direction has moved data for this long.
    pub idle_timeout: Option<Duration>,
    /// Bytes kept per direction for trace logging.
    pub capture_bytes: usize,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self::from(&TunnelConfig::default())
    }
}

impl From<&TunnelConfig> for RelayConfig {
    fn from(config: &TunnelConfig) -> Self {
        Self {
            chunk_size: config.chunk_size.max(1),
            idle_timeout: config.idle_timeout(),
            capture_bytes: config.capture_bytes,
        }
    }
}

/// How a direction ended without error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    /// Source reached end-of-stream; the destination was flushed and half-closed.
    Eof,
    /// The peer went away (reset, broken pipe, truncated stream).
    PeerClosed,
}

/// Outcome of one relay direction.
#[derive(Debug)]
pub struct DirectionReport {
    pub direction: Direction,
    /// Bytes delivered to the destination.
    pub bytes: u64,
    pub outcome: Result<Termination, TunnelError>,
}

impl DirectionReport {
    pub fn is_clean(&self) -> bool {
        self.outcome.is_ok()
    }
}

/// Outcome of a whole relay.
#[derive(Debug)]
pub struct RelayReport {
    pub client_to_target: DirectionReport,
    pub target_to_client: DirectionReport,
    /// The relay was cut short by the idle timeout.
    pub idle_timed_out: bool,
}

/// Last time either direction moved data, and how much each has delivered.
///
/// Lives outside the copy loops so the totals survive an idle timeout.
#[derive(Debug)]
struct Activity {
    start: Instant,
    last_ms: AtomicU64,
    client_to_target: AtomicU64,
    target_to_client: AtomicU64,
}

impl Activity {
    fn new() -> Self {
        Self {
            start: Instant::now(),
            last_ms: AtomicU64::new(0),
            client_to_target: AtomicU64::new(0),
            target_to_client: AtomicU64::new(0),
        }
    }

    fn counter(&self, direction: Direction) -> &AtomicU64 {
        match direction {
            Direction::ClientToTarget => &self.client_to_target,
            Direction::TargetToClient => &self.target_to_client,
        }
    }

    fn delivered(&self, direction: Direction, n: usize) {
        self.counter(direction).fetch_add(n as u64, Ordering::Relaxed);
    }

    fn bytes(&self, direction: Direction) -> u64 {
        self.counter(direction).load(Ordering::Relaxed)
    }

    fn touch(&self) {
        let now = self.start.elapsed().as_millis() as u64;
        self.last_ms.store(now, Ordering::Relaxed);
    }

    fn idle_for(&self) -> Duration {
        let now = self.start.elapsed().as_millis() as u64;
        Duration::from_millis(now.saturating_sub(self.last_ms.load(Ordering::Relaxed)))
    }
}

/// First bytes seen by one direction. Owned by that direction only.
struct Capture {
    buf: BytesMut,
    limit: usize,
}

impl Capture {
    fn new(limit: usize) -> Self {
        Self {
            buf: BytesMut::with_capacity(limit.min(4096)),
            limit,
        }
    }

    fn record(&mut self, data: &[u8]) {
        let room = self.limit.saturating_sub(self.buf.len());
        self.buf.extend_from_slice(&data[..room.min(data.len())]);
    }

    fn preview(&self) -> String {
        String::from_utf8_lossy(&self.buf).into_owned()
    }
}

fn relay_error(direction: Direction, source: io::Error) -> TunnelError {
    TunnelError::RelayIo { direction, source }
}

/// Copy `src` into `dst` until end-of-stream, forwarding `prefix` first.
async fn pump<R, W>(
    session_id: SessionId,
    direction: Direction,
    src: &mut R,
    dst: &mut W,
    prefix: Bytes,
    config: &RelayConfig,
    activity: &Activity,
) -> DirectionReport
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut capture = Capture::new(config.capture_bytes);
    let mut bytes = 0u64;

    let outcome = async {
        let mut delivered = |chunk: &[u8]| {
            capture.record(chunk);
            bytes += chunk.len() as u64;
            activity.delivered(direction, chunk.len());
        };

        if !prefix.is_empty() {
            match forward(dst, &prefix).await {
                Ok(()) => delivered(&prefix),
                Err(e) if is_peer_gone(&e) => return Ok(Termination::PeerClosed),
                Err(e) => return Err(relay_error(direction, e)),
            }
        }

        let mut buf = vec![0u8; config.chunk_size];
        loop {
            let n = match src.read(&mut buf).await {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) if is_peer_gone(&e) => {
                    half_close(session_id, direction, dst).await;
                    return Ok(Termination::PeerClosed);
                }
                Err(e) => return Err(relay_error(direction, e)),
            };
            activity.touch();

            match forward(dst, &buf[..n]).await {
                Ok(()) => delivered(&buf[..n]),
                Err(e) if is_peer_gone(&e) => return Ok(Termination::PeerClosed),
                Err(e) => return Err(relay_error(direction, e)),
            }
        }

        half_close(session_id, direction, dst).await;
        Ok(Termination::Eof)
    }
    .await;

    match &outcome {
        Ok(termination) => tracing::debug!(
            session_id = %session_id,
            direction = %direction,
            bytes,
            ?termination,
            "Direction finished"
        ),
        Err(e) => tracing::error!(
            session_id = %session_id,
            direction = %direction,
            bytes,
            error = %e,
            "Direction failed"
        ),
    }
    tracing::trace!(
        session_id = %session_id,
        direction = %direction,
        captured = ?capture.preview(),
        "Direction capture"
    );

    DirectionReport {
        direction,
        bytes,
        outcome,
    }
}

/// Tell the destination no more data is coming.
async fn half_close<W: AsyncWrite + Unpin>(session_id: SessionId, direction: Direction, dst: &mut W) {
    if let Err(e) = dst.shutdown().await {
        tracing::debug!(session_id = %session_id, direction = %direction, error = %e, "Half-close failed");
    }
}

/// Write a chunk and push it out of any buffering writer.
async fn forward<W: AsyncWrite + Unpin>(dst: &mut W, chunk: &[u8]) -> io::Result<()> {
    dst.write_all(chunk).await?;
    dst.flush().await
}

async fn idle_watch(activity: &Activity, timeout: Option<Duration>) {
    let Some(timeout) = timeout else {
        return std::future::pending().await;
    };
    loop {
        let idle = activity.idle_for();
        if idle >= timeout {
            return;
        }
        tokio::time::sleep(timeout - idle).await;
    }
}

/// Relay between `client` and `target` until both directions have ended,
/// then close both connections.
///
/// `client_buffered` holds bytes the HTTP layer read past the request head;
/// they reach the target before anything read from `client`.
pub async fn relay<C, T>(
    session_id: SessionId,
    client: C,
    client_buffered: Bytes,
    target: T,
    config: &RelayConfig,
) -> RelayReport
where
    C: AsyncRead + AsyncWrite + Unpin,
    T: AsyncRead + AsyncWrite + Unpin,
{
    let (mut client_read, mut client_write) = tokio::io::split(client);
    let (mut target_read, mut target_write) = tokio::io::split(target);
    let activity = Activity::new();

    let finished = {
        let upstream = pump(
            session_id,
            Direction::ClientToTarget,
            &mut client_read,
            &mut target_write,
            client_buffered,
            config,
            &activity,
        );
        let downstream = pump(
            session_id,
            Direction::TargetToClient,
            &mut target_read,
            &mut client_write,
            Bytes::new(),
            config,
            &activity,
        );

        tokio::select! {
            (up, down) = async { tokio::join!(upstream, downstream) } => Some((up, down)),
            _ = idle_watch(&activity, config.idle_timeout) => None,
        }
    };

    let mut client = client_read.unsplit(client_write);
    let mut target = target_read.unsplit(target_write);
    let _ = client.shutdown().await;
    let _ = target.shutdown().await;
    drop(client);
    drop(target);

    match finished {
        Some((client_to_target, target_to_client)) => RelayReport {
            client_to_target,
            target_to_client,
            idle_timed_out: false,
        },
        None => {
            tracing::info!(session_id = %session_id, "Session idle timeout");
            let timed_out = |direction| DirectionReport {
                direction,
                bytes: activity.bytes(direction),
                outcome: Err(relay_error(
                    direction,
                    io::Error::new(io::ErrorKind::TimedOut, "idle timeout"),
                )),
            };
            RelayReport {
                client_to_target: timed_out(Direction::ClientToTarget),
                target_to_client: timed_out(Direction::TargetToClient),
                idle_timed_out: true,
            }
        }
    }
}
