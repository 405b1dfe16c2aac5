//! Client identifiers and their generation.

use std::fmt;

use rand::seq::SliceRandom;

use crate::error::{IdError, IdResult};

/// Characters a generated identifier is drawn from.
pub const ID_ALPHABET: &str = "0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz";

/// Number of characters in a generated identifier.
pub const ID_LENGTH: usize = 6;

/// Opaque identifier assigned to a client at registration time.
///
/// Unique among the clients currently registered with one daemon.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ClientId(String);

impl ClientId {
    /// Creates a ClientId without validating it.
    ///
    /// Used for identifiers produced locally by an [`IdGenerator`].
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Parses an identifier received from a peer.
    ///
    /// The identifier must be exactly [`ID_LENGTH`] characters drawn from
    /// [`ID_ALPHABET`].
    pub fn parse(s: &str) -> IdResult<Self> {
        let len = s.chars().count();
        if len != ID_LENGTH {
            return Err(IdError::InvalidLength {
                len,
                expected: ID_LENGTH,
            });
        }

        if let Some(ch) = s.chars().find(|c| !c.is_ascii_alphanumeric()) {
            return Err(IdError::InvalidCharacter { ch });
        }

        Ok(Self(s.to_string()))
    }

    /// Returns the underlying string reference.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for ClientId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for ClientId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl AsRef<str> for ClientId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Source of fresh client identifiers.
///
/// Implementations must be safe to call from many tasks at once. The
/// registry treats the output as opaque and re-checks uniqueness itself.
pub trait IdGenerator: Send + Sync {
    /// Produces a new identifier.
    fn generate(&self) -> ClientId;
}

/// Random 6-character identifiers over `[0-9A-Za-z]`.
///
/// Uses the thread-local RNG, so concurrent callers never share state.
#[derive(Debug, Default, Clone, Copy)]
pub struct AlphanumericIdGenerator;

impl AlphanumericIdGenerator {
    pub fn new() -> Self {
        Self
    }
}

impl IdGenerator for AlphanumericIdGenerator {
    fn generate(&self) -> ClientId {
        let mut rng = rand::thread_rng();
        let alphabet = ID_ALPHABET.as_bytes();

        let id: String = (0..ID_LENGTH)
            .filter_map(|_| alphabet.choose(&mut rng))
            .map(|&b| char::from(b))
            .collect();

        ClientId(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::Arc;

    #[test]
    fn test_generated_id_shape() {
        let generator = AlphanumericIdGenerator::new();
        for _ in 0..100 {
            let id = generator.generate();
            assert_eq!(id.as_str().len(), ID_LENGTH);
            assert!(id.as_str().chars().all(|c| ID_ALPHABET.contains(c)));
        }
    }

    #[test]
    fn test_generated_ids_vary() {
        let generator = AlphanumericIdGenerator::new();
        let ids: HashSet<_> = (0..50).map(|_| generator.generate()).collect();
        // 62^6 possibilities; 50 draws colliding down to a handful is not plausible
        assert!(ids.len() > 45);
    }

    #[tokio::test]
    async fn test_generator_is_shareable_across_tasks() {
        let generator: Arc<dyn IdGenerator> = Arc::new(AlphanumericIdGenerator::new());

        let mut handles = Vec::new();
        for _ in 0..8 {
            let generator = Arc::clone(&generator);
            handles.push(tokio::spawn(async move { generator.generate() }));
        }

        for handle in handles {
            let id = handle.await.unwrap();
            assert!(ClientId::parse(id.as_str()).is_ok());
        }
    }

    #[test]
    fn test_parse_accepts_valid_id() {
        let id = ClientId::parse("ab3F9k").unwrap();
        assert_eq!(id.as_str(), "ab3F9k");
        assert_eq!(id.to_string(), "ab3F9k");
    }

    #[test]
    fn test_parse_rejects_wrong_length() {
        assert_eq!(
            ClientId::parse("abc"),
            Err(IdError::InvalidLength {
                len: 3,
                expected: ID_LENGTH
            })
        );
        assert!(ClientId::parse("").is_err());
        assert!(ClientId::parse("abcdefg").is_err());
    }

    #[test]
    fn test_parse_rejects_bad_characters() {
        assert_eq!(
            ClientId::parse("ab-F9k"),
            Err(IdError::InvalidCharacter { ch: '-' })
        );
        assert!(ClientId::parse("ab F9k").is_err());
    }
}
