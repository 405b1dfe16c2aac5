//! Client registry using Actor pattern.
//!
//! The registry is the directory of every client that completed the
//! registration handshake. It receives commands via a tokio mpsc channel and
//! is the single owner of the id → registration map.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────┐     ┌─────────────────┐     ┌──────────────────┐
//! │ ConnectionSession│────▶│  RegistryActor  │────▶│ Broadcast Channel│
//! └──────────────────┘     └─────────────────┘     └──────────────────┘
//!         │                       │                       │
//!         │   RegistryCommand     │   RegistryEvent       │
//!         │   (mpsc channel)      │   (broadcast)         │
//!         ▼                       ▼                       ▼
//!    Register/Unregister    HashMap<ClientId,        Observers (logs,
//!                           ClientRegistration>      tests)
//! ```
//!
//! Commands are processed one at a time, so every operation is
//! linearizable and id generation plus insertion happen atomically.

use std::sync::Arc;

use tokio::sync::{broadcast, mpsc};

use rex_core::{AlphanumericIdGenerator, IdGenerator};

mod actor;
mod commands;
mod handle;
mod registration;

pub use actor::{RegistryActor, MAX_CLIENTS, MAX_ID_ATTEMPTS};
pub use commands::{RegistryCommand, RegistryError, RegistryEvent};
pub use handle::RegistryHandle;
pub use registration::ClientRegistration;

/// Channel buffer sizes
const COMMAND_BUFFER: usize = 256;
const EVENT_BUFFER: usize = 256;

/// Spawn the registry actor and return a handle for interaction.
///
/// Each call creates an independent registry; nothing is process-global.
pub fn spawn_registry(generator: Arc<dyn IdGenerator>) -> RegistryHandle {
    let (cmd_tx, cmd_rx) = mpsc::channel(COMMAND_BUFFER);
    let (event_tx, _) = broadcast::channel(EVENT_BUFFER);

    let actor = RegistryActor::new(cmd_rx, event_tx.clone(), generator);
    tokio::spawn(actor.run());

    RegistryHandle::new(cmd_tx, event_tx)
}

/// Spawn a registry that hands out random 6-character ids.
pub fn spawn_default_registry() -> RegistryHandle {
    spawn_registry(Arc::new(AlphanumericIdGenerator::new()))
}
