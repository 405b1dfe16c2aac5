//! Error types for the heartbeat client.
//!
//! **Panic-Free Policy:** This module follows the project's panic-free guidelines.
//! No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, or `todo!()`.

use std::io;

use rex_protocol::FrameError;
use thiserror::Error;

// ============================================================================
// Client Error Type
// ============================================================================

/// Heartbeat client errors.
#[derive(Error, Debug)]
pub enum ClientError {
    /// Failed to connect to the daemon.
    ///
    /// Usually the daemon is not running or `REX_ADDR` points elsewhere.
    #[error("Failed to connect to daemon at {addr}: {source}")]
    Dial {
        addr: String,
        #[source]
        source: io::Error,
    },

    /// Reading or writing a frame failed.
    ///
    /// Covers both transport errors and a daemon that violated the framing
    /// grammar.
    #[error("Protocol error: {0}")]
    Frame(#[from] FrameError),

    /// The daemon acknowledged registration with an unusable id.
    #[error("Invalid client id in acknowledgement: {0:?}")]
    InvalidAck(String),
}

// ============================================================================
// Result Type Alias
// ============================================================================

/// Convenience Result type alias for client operations.
pub type Result<T> = std::result::Result<T, ClientError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dial_error_display() {
        let error = ClientError::Dial {
            addr: "127.0.0.1:8080".to_string(),
            source: io::Error::from(io::ErrorKind::ConnectionRefused),
        };
        let display = error.to_string();
        assert!(display.contains("Failed to connect to daemon"));
        assert!(display.contains("127.0.0.1:8080"));
    }

    #[test]
    fn test_frame_error_conversion() {
        let error: ClientError = FrameError::EmptyBodyLine.into();
        assert!(matches!(error, ClientError::Frame(FrameError::EmptyBodyLine)));
    }
}
