//! Registry actor commands, errors, and events.
//!
//! - `RegistryCommand`: Commands sent to the actor
//! - `RegistryError`: Errors that can occur during registry operations
//! - `RegistryEvent`: Events published by the registry for subscribers

use std::net::SocketAddr;

use thiserror::Error;
use tokio::sync::oneshot;

use rex_core::ClientId;

use super::registration::ClientRegistration;
use crate::server::SessionHandle;

// ============================================================================
// Registry Commands
// ============================================================================

/// Commands sent to the registry actor.
///
/// Each command carries a oneshot channel for the response.
#[derive(Debug)]
pub enum RegistryCommand {
    /// Assign a fresh id to a session and insert it.
    ///
    /// # Errors
    /// - `RegistryError::RegistryFull` if at maximum capacity
    /// - `RegistryError::IdSpaceExhausted` if no unused id could be generated
    Register {
        /// Peer address captured at accept time
        remote_addr: SocketAddr,
        /// Session backing the registration
        session: SessionHandle,
        /// Channel to send the assigned id
        respond_to: oneshot::Sender<Result<ClientId, RegistryError>>,
    },

    /// Remove a registration. Absence is not an error.
    Unregister {
        client_id: ClientId,
        /// Receives `true` if an entry was removed
        respond_to: oneshot::Sender<bool>,
    },

    /// Get a single registration by id.
    Lookup {
        client_id: ClientId,
        respond_to: oneshot::Sender<Option<ClientRegistration>>,
    },

    /// Snapshot of every registration.
    GetAll {
        respond_to: oneshot::Sender<Vec<ClientRegistration>>,
    },

    /// Number of registrations.
    Count { respond_to: oneshot::Sender<usize> },
}

// ============================================================================
// Registry Errors
// ============================================================================

/// Errors that can occur during registry operations.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("Registry is full (max: {max})")]
    RegistryFull { max: usize },

    #[error("Could not generate an unused client id after {attempts} attempts")]
    IdSpaceExhausted { attempts: usize },

    #[error("Registry channel closed")]
    ChannelClosed,
}

// ============================================================================
// Registry Events
// ============================================================================

/// Events published when registry membership changes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistryEvent {
    Registered {
        client_id: ClientId,
        remote_addr: SocketAddr,
    },
    Removed {
        client_id: ClientId,
        remote_addr: SocketAddr,
    },
}

impl RegistryEvent {
    pub fn client_id(&self) -> &ClientId {
        match self {
            RegistryEvent::Registered { client_id, .. } => client_id,
            RegistryEvent::Removed { client_id, .. } => client_id,
        }
    }
}
