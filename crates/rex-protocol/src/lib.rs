//! REX Protocol - Wire protocol between the heartbeat daemon and its clients
//!
//! A message is a command line (`REX <VERB>[ <ARG>]*`), zero or more body
//! lines, and a terminator of two empty lines. Every line ends in CRLF.
//!
//! ```text
//! REX REGISTER ab3F9k\r\n
//! \r\n
//! \r\n
//! ```

pub mod codec;
pub mod error;
pub mod frame;

pub use codec::{FrameCodec, MAX_BODY_LINES, MAX_LINE_LENGTH};
pub use error::FrameError;
pub use frame::{Frame, Verb, COMMAND_PREFIX};
