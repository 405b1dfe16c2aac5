//! Client interface for interacting with the RegistryActor.
//!
//! The `RegistryHandle` provides a cheap-to-clone interface for sending
//! commands to the registry actor and subscribing to membership events.

use std::net::SocketAddr;

use tokio::sync::{broadcast, mpsc, oneshot};

use rex_core::ClientId;

use super::commands::{RegistryCommand, RegistryError, RegistryEvent};
use super::registration::ClientRegistration;
use crate::server::SessionHandle;

/// Handle for interacting with the registry actor.
///
/// Cheap to clone; every method communicates with the actor via channels.
#[derive(Clone)]
pub struct RegistryHandle {
    /// Command sender to the actor
    sender: mpsc::Sender<RegistryCommand>,

    /// Event broadcaster for subscribing to membership changes
    event_sender: broadcast::Sender<RegistryEvent>,
}

impl RegistryHandle {
    pub fn new(
        sender: mpsc::Sender<RegistryCommand>,
        event_sender: broadcast::Sender<RegistryEvent>,
    ) -> Self {
        Self {
            sender,
            event_sender,
        }
    }

    /// Registers a session and returns its newly assigned id.
    ///
    /// # Errors
    ///
    /// - `RegistryError::RegistryFull` if the registry is at maximum capacity
    /// - `RegistryError::IdSpaceExhausted` if no unused id could be generated
    /// - `RegistryError::ChannelClosed` if the actor has shut down
    pub async fn register(
        &self,
        remote_addr: SocketAddr,
        session: SessionHandle,
    ) -> Result<ClientId, RegistryError> {
        let (tx, rx) = oneshot::channel();

        self.sender
            .send(RegistryCommand::Register {
                remote_addr,
                session,
                respond_to: tx,
            })
            .await
            .map_err(|_| RegistryError::ChannelClosed)?;

        rx.await.map_err(|_| RegistryError::ChannelClosed)?
    }

    /// Removes a registration.
    ///
    /// Returns `true` if an entry was removed. Unknown ids and a stopped
    /// actor both yield `false`.
    pub async fn unregister(&self, client_id: &ClientId) -> bool {
        let (tx, rx) = oneshot::channel();

        if self
            .sender
            .send(RegistryCommand::Unregister {
                client_id: client_id.clone(),
                respond_to: tx,
            })
            .await
            .is_err()
        {
            return false;
        }

        rx.await.unwrap_or(false)
    }

    /// Gets a single registration by id.
    pub async fn lookup(&self, client_id: &ClientId) -> Option<ClientRegistration> {
        let (tx, rx) = oneshot::channel();

        self.sender
            .send(RegistryCommand::Lookup {
                client_id: client_id.clone(),
                respond_to: tx,
            })
            .await
            .ok()?;

        rx.await.ok()?
    }

    /// Consistent snapshot of every registration.
    ///
    /// Returns an empty vector if the actor has shut down.
    pub async fn all(&self) -> Vec<ClientRegistration> {
        let (tx, rx) = oneshot::channel();

        if self
            .sender
            .send(RegistryCommand::GetAll { respond_to: tx })
            .await
            .is_err()
        {
            return Vec::new();
        }

        rx.await.unwrap_or_default()
    }

    /// Number of registered clients.
    pub async fn count(&self) -> usize {
        let (tx, rx) = oneshot::channel();

        if self
            .sender
            .send(RegistryCommand::Count { respond_to: tx })
            .await
            .is_err()
        {
            return 0;
        }

        rx.await.unwrap_or(0)
    }

    /// Subscribe to membership events.
    pub fn subscribe(&self) -> broadcast::Receiver<RegistryEvent> {
        self.event_sender.subscribe()
    }

    /// Returns `true` while the actor's command channel is open.
    pub fn is_connected(&self) -> bool {
        !self.sender.is_closed()
    }
}
