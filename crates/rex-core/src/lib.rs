//! REX Core - Shared identifier types for the heartbeat daemon and client.
//!
//! All code follows the panic-free policy: no `.unwrap()`, `.expect()`,
//! `panic!()`, `unreachable!()`, `todo!()`, or direct indexing `[i]`.

pub mod error;
pub mod id;

pub use error::{IdError, IdResult};
pub use id::{AlphanumericIdGenerator, ClientId, IdGenerator, ID_ALPHABET, ID_LENGTH};
