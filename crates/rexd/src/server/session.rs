//! Per-connection session: handshake, pinger loop, reader loop.
//!
//! Each accepted connection gets its own `ConnectionSession` that:
//! - Waits for the client's `REX REGISTER` frame and answers with the id
//! - Runs a pinger task sending `REX PING` every interval
//! - Runs a reader task consuming frames until EOF, error or `REX CLOSE`
//! - Removes its registry entry and shuts the socket down exactly once
//!
//! # Lifecycle
//!
//! ```text
//! Connecting → Registering → Active → Closing → Closed
//! ```
//!
//! Any terminal event (EOF, write failure, malformed frame, `REX CLOSE`,
//! panic, daemon shutdown) calls [`SessionHandle::close`]. Only the first
//! call takes effect; it cancels the session token, which both loops await
//! alongside their blocking point. `Closed` is absorbing.
//!
//! # Panic-Free Guarantees
//!
//! - No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, `todo!()`
//! - A panic inside either loop surfaces as a `JoinError` at its supervisor
//!   and becomes `CloseReason::Panicked`

use std::fmt;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::io::AsyncWriteExt;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, timeout, Instant, MissedTickBehavior};
use tokio_util::codec::{FramedRead, FramedWrite};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use rex_core::ClientId;
use rex_protocol::{Frame, FrameCodec, FrameError, Verb};

use crate::config::SessionConfig;
use crate::registry::{RegistryError, RegistryHandle};

type FrameWriter = FramedWrite<OwnedWriteHalf, FrameCodec>;
type FrameReader = FramedRead<OwnedReadHalf, FrameCodec>;

// ============================================================================
// State and close reasons
// ============================================================================

/// Lifecycle state of a session. Ordered: transitions only move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum SessionState {
    Connecting,
    Registering,
    Active,
    Closing,
    Closed,
}

/// Why a session ended. Informational only.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    /// Peer closed its write side
    PeerClosed,
    /// Peer sent `REX CLOSE`
    CloseRequested,
    /// A frame write failed or timed out
    WriteFailed,
    /// Reading from the socket failed
    ReadFailed,
    /// Peer violated the framing grammar
    Malformed,
    /// First frame was not `REX REGISTER`
    HandshakeRejected,
    /// No first frame within the handshake deadline
    HandshakeTimeout,
    /// A session loop panicked
    Panicked,
    /// Daemon is shutting down
    Shutdown,
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CloseReason::PeerClosed => "peer closed",
            CloseReason::CloseRequested => "close requested",
            CloseReason::WriteFailed => "write failed",
            CloseReason::ReadFailed => "read failed",
            CloseReason::Malformed => "malformed frame",
            CloseReason::HandshakeRejected => "handshake rejected",
            CloseReason::HandshakeTimeout => "handshake timeout",
            CloseReason::Panicked => "loop panicked",
            CloseReason::Shutdown => "shutdown",
        };
        f.write_str(s)
    }
}

// ============================================================================
// Session handle
// ============================================================================

struct SessionShared {
    remote_addr: SocketAddr,
    writer: Mutex<FrameWriter>,
    write_timeout: Duration,
    state_tx: watch::Sender<SessionState>,
    /// Single-close guard
    closing: AtomicBool,
    close_reason: OnceLock<CloseReason>,
    cancel_token: CancellationToken,
    client_id: OnceLock<ClientId>,
    pings_sent: AtomicU64,
    frames_received: AtomicU64,
}

/// Cheap-to-clone handle to a running session.
///
/// Stored in the registry and shared by the session's own loops.
#[derive(Clone)]
pub struct SessionHandle {
    inner: Arc<SessionShared>,
}

impl SessionHandle {
    pub fn remote_addr(&self) -> SocketAddr {
        self.inner.remote_addr
    }

    /// Id assigned by the handshake, once registered.
    pub fn client_id(&self) -> Option<&ClientId> {
        self.inner.client_id.get()
    }

    pub fn state(&self) -> SessionState {
        *self.inner.state_tx.borrow()
    }

    /// Receiver that observes every state transition.
    pub fn watch_state(&self) -> watch::Receiver<SessionState> {
        self.inner.state_tx.subscribe()
    }

    /// Reason recorded by the first `close` call.
    pub fn close_reason(&self) -> Option<CloseReason> {
        self.inner.close_reason.get().copied()
    }

    pub fn is_closing(&self) -> bool {
        self.inner.closing.load(Ordering::Acquire)
    }

    pub fn pings_sent(&self) -> u64 {
        self.inner.pings_sent.load(Ordering::Relaxed)
    }

    pub fn frames_received(&self) -> u64 {
        self.inner.frames_received.load(Ordering::Relaxed)
    }

    /// Writes one frame.
    ///
    /// Fails with `SessionError::Closed` once the session is closing, and
    /// with `WriteTimeout` if the peer stops draining the socket.
    pub async fn send(&self, frame: Frame) -> Result<(), SessionError> {
        if self.inner.cancel_token.is_cancelled() {
            return Err(SessionError::Closed);
        }

        let write = async {
            let mut writer = self.inner.writer.lock().await;
            match timeout(self.inner.write_timeout, writer.send(frame)).await {
                Ok(Ok(())) => Ok(()),
                Ok(Err(e)) => Err(SessionError::Frame(e)),
                Err(_) => Err(SessionError::WriteTimeout),
            }
        };

        tokio::select! {
            _ = self.inner.cancel_token.cancelled() => Err(SessionError::Closed),
            result = write => result,
        }
    }

    /// Begins closing the session.
    ///
    /// Idempotent and safe to call concurrently from any task: only the
    /// first caller records its reason, moves the state to `Closing` and
    /// cancels both loops. Returns `true` for that caller only.
    pub fn close(&self, reason: CloseReason) -> bool {
        if self
            .inner
            .closing
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return false;
        }

        let _ = self.inner.close_reason.set(reason);
        self.advance(SessionState::Closing);
        self.inner.cancel_token.cancel();

        debug!(
            addr = %self.inner.remote_addr,
            client_id = ?self.client_id(),
            reason = %reason,
            "Session closing"
        );
        true
    }

    /// Waits until the session reaches `Closed`.
    pub async fn closed(&self) {
        let mut rx = self.watch_state();
        let _ = rx.wait_for(|state| *state == SessionState::Closed).await;
    }

    fn cancel_token(&self) -> CancellationToken {
        self.inner.cancel_token.clone()
    }

    /// Moves the state forward. Backward moves and leaving `Closed` are
    /// ignored.
    fn advance(&self, next: SessionState) {
        self.inner.state_tx.send_if_modified(|state| {
            if next > *state {
                *state = next;
                true
            } else {
                false
            }
        });
    }

    /// Shuts the write side down and marks the session `Closed`.
    /// Called once, by the supervisor, after both loops are done.
    async fn finish(&self) {
        {
            let mut writer = self.inner.writer.lock().await;
            if let Err(e) = writer.get_mut().shutdown().await {
                debug!(addr = %self.inner.remote_addr, error = %e, "Socket shutdown failed");
            }
        }
        self.advance(SessionState::Closed);
    }
}

impl fmt::Debug for SessionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionHandle")
            .field("remote_addr", &self.inner.remote_addr)
            .field("client_id", &self.client_id())
            .field("state", &self.state())
            .finish()
    }
}

// ============================================================================
// Connection session
// ============================================================================

/// One accepted TCP connection and its two loops.
pub struct ConnectionSession {
    handle: SessionHandle,
    reader: FrameReader,
    config: SessionConfig,
}

impl ConnectionSession {
    /// Wraps an accepted stream.
    ///
    /// `cancel_token` should be a child of the daemon's token so daemon
    /// shutdown reaches every session, registered or not.
    pub fn new(
        stream: TcpStream,
        remote_addr: SocketAddr,
        config: SessionConfig,
        cancel_token: CancellationToken,
    ) -> Self {
        let (read_half, write_half) = stream.into_split();
        let (state_tx, _) = watch::channel(SessionState::Connecting);

        let shared = SessionShared {
            remote_addr,
            writer: Mutex::new(FramedWrite::new(write_half, FrameCodec::new())),
            write_timeout: config.write_timeout,
            state_tx,
            closing: AtomicBool::new(false),
            close_reason: OnceLock::new(),
            cancel_token,
            client_id: OnceLock::new(),
            pings_sent: AtomicU64::new(0),
            frames_received: AtomicU64::new(0),
        };

        Self {
            handle: SessionHandle {
                inner: Arc::new(shared),
            },
            reader: FramedRead::new(read_half, FrameCodec::new()),
            config,
        }
    }

    pub fn handle(&self) -> SessionHandle {
        self.handle.clone()
    }

    /// Drives the session to completion.
    ///
    /// Returns the assigned id if the handshake succeeded. By the time this
    /// returns the registry entry is gone and the socket is shut down.
    pub async fn serve(self, registry: RegistryHandle) -> Option<ClientId> {
        let ConnectionSession {
            handle,
            mut reader,
            config,
        } = self;
        let addr = handle.remote_addr();

        debug!(addr = %addr, "New client connected");
        handle.advance(SessionState::Registering);

        let client_id =
            match handshake(&handle, &mut reader, &registry, config.handshake_timeout).await {
                Ok(id) => id,
                Err(e) => {
                    warn!(addr = %addr, error = %e, "Handshake failed");
                    handle.close(e.close_reason());
                    handle.finish().await;
                    return None;
                }
            };

        handle.advance(SessionState::Active);
        info!(client_id = %client_id, addr = %addr, "Client registered");

        let pinger = spawn_supervised(
            handle.clone(),
            "pinger",
            run_pinger(handle.clone(), config.ping_interval),
        );
        let reader_task = spawn_supervised(
            handle.clone(),
            "reader",
            run_reader(handle.clone(), reader, client_id.clone()),
        );

        let _ = tokio::join!(pinger, reader_task);

        registry.unregister(&client_id).await;
        handle.finish().await;

        info!(
            client_id = %client_id,
            addr = %addr,
            reason = %handle.close_reason().unwrap_or(CloseReason::Shutdown),
            pings_sent = handle.pings_sent(),
            "Client disconnected"
        );
        Some(client_id)
    }
}

/// Waits for `REX REGISTER`, registers the session and acknowledges with
/// `REX REGISTER <id>`.
async fn handshake(
    handle: &SessionHandle,
    reader: &mut FrameReader,
    registry: &RegistryHandle,
    deadline: Duration,
) -> Result<ClientId, SessionError> {
    let token = handle.cancel_token();

    let first = tokio::select! {
        _ = token.cancelled() => return Err(SessionError::Closed),
        result = timeout(deadline, reader.next()) => result,
    };

    let frame = match first {
        Err(_) => return Err(SessionError::HandshakeTimeout),
        Ok(None) => return Err(SessionError::Eof),
        Ok(Some(Err(e))) => return Err(SessionError::Frame(e)),
        Ok(Some(Ok(frame))) => frame,
    };
    handle.inner.frames_received.fetch_add(1, Ordering::Relaxed);

    if frame.verb() != Verb::Register {
        return Err(SessionError::UnexpectedFrame(
            frame.command_line().to_string(),
        ));
    }

    let client_id = registry
        .register(handle.remote_addr(), handle.clone())
        .await?;
    let _ = handle.inner.client_id.set(client_id.clone());

    if let Err(e) = handle.send(Frame::register_ack(&client_id)).await {
        registry.unregister(&client_id).await;
        return Err(e);
    }

    Ok(client_id)
}

/// Runs `fut` in its own task; a panic closes the session instead of
/// escaping.
fn spawn_supervised<F>(handle: SessionHandle, name: &'static str, fut: F) -> JoinHandle<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let inner = tokio::spawn(fut);
    tokio::spawn(async move {
        if let Err(e) = inner.await {
            error!(
                addr = %handle.remote_addr(),
                client_id = ?handle.client_id(),
                task = name,
                error = %e,
                "Session loop terminated abnormally"
            );
            handle.close(CloseReason::Panicked);
        }
    })
}

/// Sends `REX PING` every `period` until a write fails or the session
/// closes. Never waits for an answer.
async fn run_pinger(handle: SessionHandle, period: Duration) {
    let token = handle.cancel_token();
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = token.cancelled() => {
                handle.close(CloseReason::Shutdown);
                return;
            }
            _ = ticker.tick() => {}
        }

        match handle.send(Frame::ping()).await {
            Ok(()) => {
                handle.inner.pings_sent.fetch_add(1, Ordering::Relaxed);
                debug!(client_id = ?handle.client_id(), "Ping sent");
            }
            Err(SessionError::Closed) => return,
            Err(e) => {
                debug!(client_id = ?handle.client_id(), error = %e, "Failed to send ping");
                handle.close(CloseReason::WriteFailed);
                return;
            }
        }
    }
}

/// Consumes frames until EOF, a read error, `REX CLOSE`, or close.
async fn run_reader(handle: SessionHandle, mut reader: FrameReader, client_id: ClientId) {
    let token = handle.cancel_token();

    loop {
        let next = tokio::select! {
            _ = token.cancelled() => {
                handle.close(CloseReason::Shutdown);
                return;
            }
            next = reader.next() => next,
        };

        let frame = match next {
            None => {
                debug!(client_id = %client_id, "Client sent EOF");
                handle.close(CloseReason::PeerClosed);
                return;
            }
            Some(Err(e)) if e.is_malformed() => {
                warn!(client_id = %client_id, error = %e, "Malformed frame from client");
                handle.close(CloseReason::Malformed);
                return;
            }
            Some(Err(e)) => {
                debug!(client_id = %client_id, error = %e, "Failed to read from client");
                handle.close(CloseReason::ReadFailed);
                return;
            }
            Some(Ok(frame)) => frame,
        };

        handle.inner.frames_received.fetch_add(1, Ordering::Relaxed);

        if let Some(reason) = dispatch(&handle, &client_id, frame).await {
            handle.close(reason);
            return;
        }
    }
}

/// Handles one steady-state frame. Returns a reason when the frame ends
/// the session.
async fn dispatch(handle: &SessionHandle, client_id: &ClientId, frame: Frame) -> Option<CloseReason> {
    match frame.verb() {
        Verb::Register => {
            // Already registered: repeat the acknowledgement, keep the id
            debug!(client_id = %client_id, "Repeated REGISTER, re-acknowledging");
            if handle.send(Frame::register_ack(client_id)).await.is_err() {
                return Some(CloseReason::WriteFailed);
            }
        }
        Verb::Ping => {}
        Verb::Pong => {
            debug!(client_id = %client_id, "Pong received");
        }
        Verb::Close => {
            debug!(client_id = %client_id, "Client requested close");
            return Some(CloseReason::CloseRequested);
        }
        Verb::Unknown(verb) => {
            warn!(client_id = %client_id, verb = %verb, "Ignoring unknown verb");
        }
    }
    None
}

// ============================================================================
// Errors
// ============================================================================

/// Errors that can occur while driving a session.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("Session closed")]
    Closed,

    #[error("Handshake timed out")]
    HandshakeTimeout,

    #[error("Connection closed during handshake")]
    Eof,

    #[error("Unexpected frame during handshake: {0}")]
    UnexpectedFrame(String),

    #[error("Frame error: {0}")]
    Frame(#[from] FrameError),

    #[error("Write timeout")]
    WriteTimeout,

    #[error("Registry error: {0}")]
    Registry(#[from] RegistryError),
}

impl SessionError {
    /// Maps a handshake failure to the reason the session is closed with.
    pub fn close_reason(&self) -> CloseReason {
        match self {
            SessionError::Closed => CloseReason::Shutdown,
            SessionError::HandshakeTimeout => CloseReason::HandshakeTimeout,
            SessionError::Eof => CloseReason::PeerClosed,
            SessionError::UnexpectedFrame(_) | SessionError::Registry(_) => {
                CloseReason::HandshakeRejected
            }
            SessionError::Frame(e) if e.is_malformed() => CloseReason::Malformed,
            SessionError::Frame(_) => CloseReason::ReadFailed,
            SessionError::WriteTimeout => CloseReason::WriteFailed,
        }
    }
}
