//! Heartbeat client.
//!
//! This module provides the `HeartbeatClient` which handles:
//! - Connecting to the daemon over TCP
//! - Sending the `REX REGISTER` request
//! - Reading frames until the daemon goes away or the caller cancels
//!
//! There is no automatic reconnection: when the connection ends, `run`
//! returns and the caller decides what to do.
//!
//! **Panic-Free Policy:** This module follows the project's panic-free guidelines.
//! No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, or `todo!()`.

use std::env;
use std::net::SocketAddr;

use futures::{SinkExt, StreamExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio_util::codec::{FramedRead, FramedWrite};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use rex_core::ClientId;
use rex_protocol::{Frame, FrameCodec, Verb};

use crate::error::{ClientError, Result};

// ============================================================================
// Configuration
// ============================================================================

/// Daemon address used when `REX_ADDR` is not set
pub const DEFAULT_DAEMON_ADDR: &str = "127.0.0.1:8080";

/// Environment variable overriding the daemon address
pub const ADDR_ENV: &str = "REX_ADDR";

/// Configuration for the heartbeat client.
///
/// # Example
///
/// ```rust
/// use rex_client::ClientConfig;
///
/// let config = ClientConfig {
///     addr: "10.0.0.5:8080".to_string(),
///     echo_pong: true,
/// };
/// ```
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Address of the daemon's heartbeat listener.
    pub addr: String,

    /// Answer every `REX PING` with `REX PONG`.
    pub echo_pong: bool,
}

impl ClientConfig {
    /// Default configuration, with the address taken from `REX_ADDR` when
    /// set.
    pub fn from_env() -> Self {
        let addr = env::var(ADDR_ENV).unwrap_or_else(|_| DEFAULT_DAEMON_ADDR.to_string());
        Self {
            addr,
            ..Default::default()
        }
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            addr: DEFAULT_DAEMON_ADDR.to_string(),
            echo_pong: false,
        }
    }
}

// ============================================================================
// Heartbeat Client
// ============================================================================

/// A connection to the heartbeat daemon.
///
/// # Connection Lifecycle
///
/// 1. `connect` dials the daemon
/// 2. `register` writes `REX REGISTER` without waiting for the answer
/// 3. `read_loop` consumes frames; the acknowledgement's id becomes
///    available through `assigned_id`
/// 4. EOF from the daemon or cancellation ends the loop
///
/// # Example
///
/// ```rust,ignore
/// use rex_client::{ClientConfig, HeartbeatClient};
/// use tokio_util::sync::CancellationToken;
///
/// let cancel_token = CancellationToken::new();
/// HeartbeatClient::run(ClientConfig::from_env(), cancel_token).await?;
/// ```
pub struct HeartbeatClient {
    config: ClientConfig,
    local_addr: Option<SocketAddr>,
    reader: FramedRead<OwnedReadHalf, FrameCodec>,
    writer: FramedWrite<OwnedWriteHalf, FrameCodec>,
    assigned_id: Option<ClientId>,
    pings_received: u64,
}

impl HeartbeatClient {
    /// Dials the daemon.
    ///
    /// # Errors
    ///
    /// `ClientError::Dial` if the TCP connection cannot be established.
    pub async fn connect(config: ClientConfig) -> Result<Self> {
        debug!(addr = %config.addr, "Connecting to daemon");

        let stream = TcpStream::connect(config.addr.as_str())
            .await
            .map_err(|source| ClientError::Dial {
                addr: config.addr.clone(),
                source,
            })?;
        let local_addr = stream.local_addr().ok();
        let (read_half, write_half) = stream.into_split();

        info!(addr = %config.addr, "Connected to daemon");

        Ok(Self {
            config,
            local_addr,
            reader: FramedRead::new(read_half, FrameCodec::new()),
            writer: FramedWrite::new(write_half, FrameCodec::new()),
            assigned_id: None,
            pings_received: 0,
        })
    }

    /// Connects, registers, and reads until the daemon disconnects or
    /// `cancel_token` fires.
    pub async fn run(config: ClientConfig, cancel_token: CancellationToken) -> Result<()> {
        let mut client = Self::connect(config).await?;
        client.register().await?;
        client.read_loop(&cancel_token).await
    }

    /// Sends `REX REGISTER`. The acknowledgement is picked up by
    /// [`read_loop`](Self::read_loop).
    pub async fn register(&mut self) -> Result<()> {
        self.writer.send(Frame::register()).await?;
        debug!("Registration requested");
        Ok(())
    }

    /// Id assigned by the daemon, once the acknowledgement was read.
    pub fn assigned_id(&self) -> Option<&ClientId> {
        self.assigned_id.as_ref()
    }

    pub fn pings_received(&self) -> u64 {
        self.pings_received
    }

    /// Local socket address, as seen by the daemon.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    /// Reads frames until EOF or cancellation.
    ///
    /// # Returns
    ///
    /// * `Ok(())` - The daemon closed the connection, or the caller
    ///   cancelled (a `REX CLOSE` is sent first)
    /// * `Err(ClientError)` - Reading failed or the daemon sent a bad frame
    pub async fn read_loop(&mut self, cancel_token: &CancellationToken) -> Result<()> {
        loop {
            let next = tokio::select! {
                _ = cancel_token.cancelled() => {
                    self.close().await;
                    return Ok(());
                }
                next = self.reader.next() => next,
            };

            match next {
                None => {
                    info!(client_id = ?self.assigned_id, "Daemon closed the connection");
                    return Ok(());
                }
                Some(Err(e)) => {
                    warn!(error = %e, "Failed to read from daemon");
                    return Err(e.into());
                }
                Some(Ok(frame)) => self.handle_frame(frame).await?,
            }
        }
    }

    async fn handle_frame(&mut self, frame: Frame) -> Result<()> {
        match frame.verb() {
            Verb::Ping => {
                self.pings_received = self.pings_received.saturating_add(1);
                if self.config.echo_pong {
                    self.writer.send(Frame::pong()).await?;
                }
            }
            Verb::Register => {
                let raw = frame.first_arg().unwrap_or_default();
                let id = ClientId::parse(raw)
                    .map_err(|_| ClientError::InvalidAck(raw.to_string()))?;
                info!(client_id = %id, "Registered with daemon");
                self.assigned_id = Some(id);
            }
            other => {
                debug!(verb = %other, "Ignoring frame from daemon");
            }
        }
        Ok(())
    }

    /// Says goodbye. Failures only mean the daemon is already gone.
    async fn close(&mut self) {
        if let Err(e) = self.writer.send(Frame::close()).await {
            debug!(error = %e, "Failed to send CLOSE");
        }
        if let Err(e) = SinkExt::<Frame>::close(&mut self.writer).await {
            debug!(error = %e, "Failed to shut down connection");
        }
        info!(client_id = ?self.assigned_id, "Client closed");
    }
}
