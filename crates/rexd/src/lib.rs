//! REX Daemon - Client registry and liveness prober
//!
//! This crate provides the core infrastructure for the REX daemon:
//! - `registry` - Client registry actor mapping ids to live sessions
//! - `server` - TCP heartbeat server, per-connection sessions, HTTP placeholder
//! - `config` - Daemon configuration and defaults
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                         rexd daemon                         │
//! ├─────────────────────────────────────────────────────────────┤
//! │                                                             │
//! │  ┌─────────────────┐   register/   ┌─────────────────────┐  │
//! │  │ HeartbeatServer │──unregister──▶│   RegistryActor     │  │
//! │  │  (TcpListener)  │               │ (id → registration) │  │
//! │  └────────┬────────┘               └─────────────────────┘  │
//! │           │ accept()                                        │
//! │           ▼                                                 │
//! │  ┌─────────────────────────────────────────┐                │
//! │  │ ConnectionSession (per client)          │                │
//! │  │   handshake → pinger task + reader task │                │
//! │  └─────────────────────────────────────────┘                │
//! │                                                             │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Panic-Free Guarantees
//!
//! - No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, `todo!()`
//!   in production code
//! - All fallible operations return `Result` or `Option`
//! - A panic inside a session loop is caught at its task boundary and
//!   turned into a session close

pub mod config;
pub mod registry;
pub mod server;
