//! TCP heartbeat server for the REX daemon.
//!
//! The server:
//! - Listens on a TCP socket for client connections
//! - Spawns a ConnectionSession for each client
//! - Keeps accepting when a single accept fails
//! - Supports graceful shutdown via CancellationToken
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────┐
//! │ HeartbeatServer │
//! │                 │
//! │   TcpListener   │
//! └───────┬─────────┘
//!         │ accept()
//!         ▼
//! ┌─────────────────┐     ┌─────────────────┐
//! │ConnectionSession│────▶│  RegistryHandle │
//! │   (per client)  │     │                 │
//! └─────────────────┘     └─────────────────┘
//!    │           │
//!  pinger      reader
//!  (task)      (task)
//! ```

mod http;
mod session;

pub use http::{HttpPlaceholder, PLACEHOLDER_RESPONSE};
pub use session::{CloseReason, ConnectionSession, SessionError, SessionHandle, SessionState};

use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio::net::TcpListener;
use tokio::time::{sleep, timeout};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::DaemonConfig;
use crate::registry::RegistryHandle;

/// Pause after a transient accept failure (e.g. out of file descriptors)
const ACCEPT_ERROR_BACKOFF: Duration = Duration::from_millis(100);

/// Time given to open sessions to close on shutdown
const SHUTDOWN_GRACE_PERIOD: Duration = Duration::from_secs(2);

/// TCP server that registers clients and probes their liveness.
pub struct HeartbeatServer {
    listener: TcpListener,
    config: DaemonConfig,
    registry: RegistryHandle,
    cancel_token: CancellationToken,
    connection_counter: AtomicU64,
}

impl HeartbeatServer {
    /// Binds the heartbeat listener.
    ///
    /// # Errors
    ///
    /// `ServerError::Bind` if the address cannot be bound.
    pub async fn bind(
        config: DaemonConfig,
        registry: RegistryHandle,
        cancel_token: CancellationToken,
    ) -> Result<Self, ServerError> {
        let listener = TcpListener::bind(config.listen_addr.as_str())
            .await
            .map_err(|e| ServerError::Bind {
                addr: config.listen_addr.clone(),
                error: e.to_string(),
            })?;

        info!(addr = %config.listen_addr, "Heartbeat server listening");

        Ok(Self {
            listener,
            config,
            registry,
            cancel_token,
            connection_counter: AtomicU64::new(0),
        })
    }

    /// Returns the bound address (useful when binding port 0).
    pub fn local_addr(&self) -> Result<SocketAddr, ServerError> {
        self.listener.local_addr().map_err(ServerError::Accept)
    }

    pub fn registry(&self) -> &RegistryHandle {
        &self.registry
    }

    /// Runs the accept loop.
    ///
    /// Returns `Ok(())` after the cancellation token fires and open sessions
    /// were asked to close, or `Err` if the listener itself fails.
    pub async fn run(self) -> Result<(), ServerError> {
        let result = loop {
            tokio::select! {
                _ = self.cancel_token.cancelled() => {
                    info!("Server shutdown requested");
                    break Ok(());
                }

                result = self.listener.accept() => {
                    match result {
                        Ok((stream, addr)) => {
                            let conn_num = self.connection_counter.fetch_add(1, Ordering::Relaxed);
                            debug!(connection = conn_num, addr = %addr, "Accepted connection");
                            self.handle_connection(stream, addr);
                        }
                        Err(e) if is_fatal_accept_error(&e) => {
                            error!(error = %e, "Listener failed");
                            break Err(ServerError::Accept(e));
                        }
                        Err(e) => pause_after_accept_error("heartbeat", &e).await,
                    }
                }
            }
        };

        self.cleanup().await;
        result
    }

    /// Spawns the session task for an accepted connection.
    fn handle_connection(&self, stream: tokio::net::TcpStream, addr: SocketAddr) {
        let session = ConnectionSession::new(
            stream,
            addr,
            self.config.session,
            self.cancel_token.child_token(),
        );
        let registry = self.registry.clone();

        tokio::spawn(async move {
            session.serve(registry).await;
        });
    }

    /// Closes every registered session and waits briefly for them to end.
    async fn cleanup(&self) {
        let registrations = self.registry.all().await;
        let open = registrations.len();

        for registration in &registrations {
            registration.session.close(CloseReason::Shutdown);
        }

        let all_closed = async {
            for registration in &registrations {
                registration.session.closed().await;
            }
        };

        if timeout(SHUTDOWN_GRACE_PERIOD, all_closed).await.is_err() {
            warn!(open, "Some sessions did not close within the grace period");
        }

        info!(closed = open, "Server cleanup complete");
    }
}

/// Accept errors that mean the listener is unusable, as opposed to a
/// per-connection or resource hiccup.
fn is_fatal_accept_error(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::InvalidInput | io::ErrorKind::NotConnected | io::ErrorKind::Unsupported
    )
}

/// Logs a transient accept failure and pauses before the next accept, so
/// running out of file descriptors does not turn into a busy loop.
async fn pause_after_accept_error(listener: &'static str, e: &io::Error) {
    error!(listener, error = %e, "Failed to accept connection");
    sleep(ACCEPT_ERROR_BACKOFF).await;
}

/// Errors that can occur in server operations.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("Failed to bind {addr}: {error}")]
    Bind { addr: String, error: String },

    #[error("Listener error: {0}")]
    Accept(#[source] io::Error),
}
