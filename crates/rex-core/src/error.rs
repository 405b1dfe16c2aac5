//! Identifier error types following panic-free policy.

use thiserror::Error;

/// Errors raised when an identifier received from the wire is not valid.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum IdError {
    /// Identifier has the wrong number of characters
    #[error("Invalid client id length: {len} (expected {expected})")]
    InvalidLength { len: usize, expected: usize },

    /// Identifier contains a character outside the alphabet
    #[error("Invalid character {ch:?} in client id")]
    InvalidCharacter { ch: char },
}

/// Result type for identifier operations.
pub type IdResult<T> = Result<T, IdError>;
