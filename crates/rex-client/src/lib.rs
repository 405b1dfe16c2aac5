//! REX Client - Connects to the heartbeat daemon and stays registered
//!
//! The client dials the daemon, announces itself with `REX REGISTER`, and
//! then only reads: pings are discarded (or answered when configured), the
//! acknowledgement's id is remembered, everything else is logged.
//!
//! **Panic-Free Policy:** No `.unwrap()`, `.expect()`, `panic!()`,
//! `unreachable!()`, or `todo!()` outside of tests.

pub mod client;
pub mod error;

pub use client::{ClientConfig, HeartbeatClient, DEFAULT_DAEMON_ADDR};
pub use error::{ClientError, Result};
