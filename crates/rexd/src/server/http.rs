//! Placeholder HTTP listener.
//!
//! Answers every request with an empty `200 OK` and closes the connection.
//! It carries no protocol semantics; it only gives health checkers and load
//! balancers something to hit.

use std::net::SocketAddr;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::{pause_after_accept_error, ServerError};

/// Bytes written in reply to any request
pub const PLACEHOLDER_RESPONSE: &[u8] = b"HTTP/1.1 200 OK\r\n\r\n";

/// Largest request head read before answering (8 KiB)
const MAX_REQUEST_SIZE: usize = 8 * 1024;

/// Deadline for a client to send its request head
const REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

/// Second listener of the daemon.
pub struct HttpPlaceholder {
    listener: TcpListener,
    cancel_token: CancellationToken,
}

impl HttpPlaceholder {
    pub async fn bind(addr: &str, cancel_token: CancellationToken) -> Result<Self, ServerError> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| ServerError::Bind {
                addr: addr.to_string(),
                error: e.to_string(),
            })?;

        info!(addr = %addr, "HTTP placeholder listening");

        Ok(Self {
            listener,
            cancel_token,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, ServerError> {
        self.listener.local_addr().map_err(ServerError::Accept)
    }

    /// Accepts until cancelled.
    pub async fn run(self) {
        loop {
            tokio::select! {
                _ = self.cancel_token.cancelled() => {
                    debug!("HTTP placeholder shutting down");
                    return;
                }

                result = self.listener.accept() => {
                    match result {
                        Ok((stream, addr)) => {
                            tokio::spawn(async move {
                                if let Err(e) = respond(stream).await {
                                    debug!(addr = %addr, error = %e, "HTTP placeholder request failed");
                                }
                            });
                        }
                        Err(e) => pause_after_accept_error("http", &e).await,
                    }
                }
            }
        }
    }
}

/// Reads the request head (up to the blank line, EOF, or the size limit)
/// and writes the fixed response.
async fn respond(mut stream: TcpStream) -> std::io::Result<()> {
    let mut head = Vec::with_capacity(512);
    let mut chunk = [0u8; 512];

    let read_head = async {
        loop {
            let n = stream.read(&mut chunk).await?;
            if n == 0 {
                break;
            }
            head.extend_from_slice(chunk.get(..n).unwrap_or_default());
            if head.windows(4).any(|w| w == b"\r\n\r\n") || head.len() >= MAX_REQUEST_SIZE {
                break;
            }
        }
        Ok::<(), std::io::Error>(())
    };

    // A slow client still gets an answer
    if let Ok(result) = timeout(REQUEST_TIMEOUT, read_head).await {
        result?;
    }

    stream.write_all(PLACEHOLDER_RESPONSE).await?;
    stream.shutdown().await
}
