//! Framing errors.

use thiserror::Error;

/// Errors raised while decoding or encoding frames.
///
/// Every variant leaves the connection unusable: after a decode error the
/// reader can no longer find the next frame boundary with confidence.
#[derive(Debug, Error)]
pub enum FrameError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Line too long: {len} bytes (max: {max})")]
    LineTooLong { len: usize, max: usize },

    #[error("Too many body lines in frame (max: {max})")]
    TooManyBodyLines { max: usize },

    #[error("Empty line inside frame body")]
    EmptyBodyLine,

    #[error("Frame line is not valid UTF-8")]
    InvalidUtf8,

    #[error("Invalid frame line {line:?}: {reason}")]
    InvalidLine { line: String, reason: &'static str },
}

impl FrameError {
    /// Returns true when the peer violated the framing grammar, as opposed
    /// to the transport failing underneath us.
    pub fn is_malformed(&self) -> bool {
        !matches!(self, FrameError::Io(_))
    }
}
