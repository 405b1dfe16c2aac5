//! Registry actor - owns all registrations and processes commands.
//!
//! The RegistryActor is the single owner of registry state. It receives
//! commands via an mpsc channel and publishes membership events via
//! broadcast.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info, warn};

use rex_core::{ClientId, IdGenerator};

use super::commands::{RegistryCommand, RegistryError, RegistryEvent};
use super::registration::ClientRegistration;
use crate::server::SessionHandle;

// ============================================================================
// Resource Limits
// ============================================================================

/// Maximum number of clients the registry can hold.
pub const MAX_CLIENTS: usize = 10_000;

/// Attempts at generating an unused id before giving up.
pub const MAX_ID_ATTEMPTS: usize = 16;

// ============================================================================
// Registry Actor
// ============================================================================

/// The registry actor - owns all registration state.
///
/// Commands are processed sequentially in a single task; all mutations
/// happen there.
pub struct RegistryActor {
    /// Command receiver
    receiver: mpsc::Receiver<RegistryCommand>,

    /// Live registrations keyed by id
    clients: HashMap<ClientId, ClientRegistration>,

    /// Event publisher for membership changes
    event_publisher: broadcast::Sender<RegistryEvent>,

    /// Source of fresh ids
    generator: Arc<dyn IdGenerator>,
}

impl RegistryActor {
    pub fn new(
        receiver: mpsc::Receiver<RegistryCommand>,
        event_publisher: broadcast::Sender<RegistryEvent>,
        generator: Arc<dyn IdGenerator>,
    ) -> Self {
        Self {
            receiver,
            clients: HashMap::new(),
            event_publisher,
            generator,
        }
    }

    /// Runs the actor event loop.
    ///
    /// Processes commands until the channel closes (all handles dropped).
    pub async fn run(mut self) {
        debug!("Registry actor starting");

        while let Some(cmd) = self.receiver.recv().await {
            self.handle_command(cmd);
        }

        info!(clients = self.clients.len(), "Registry actor stopped");
    }

    /// Dispatches a command to the appropriate handler.
    fn handle_command(&mut self, cmd: RegistryCommand) {
        match cmd {
            RegistryCommand::Register {
                remote_addr,
                session,
                respond_to,
            } => {
                let result = self.handle_register(remote_addr, session);
                // Ignore send error - caller may have given up
                let _ = respond_to.send(result);
            }
            RegistryCommand::Unregister {
                client_id,
                respond_to,
            } => {
                let removed = self.handle_unregister(&client_id);
                let _ = respond_to.send(removed);
            }
            RegistryCommand::Lookup {
                client_id,
                respond_to,
            } => {
                let _ = respond_to.send(self.clients.get(&client_id).cloned());
            }
            RegistryCommand::GetAll { respond_to } => {
                let _ = respond_to.send(self.clients.values().cloned().collect());
            }
            RegistryCommand::Count { respond_to } => {
                let _ = respond_to.send(self.clients.len());
            }
        }
    }

    // ========================================================================
    // Command Handlers
    // ========================================================================

    fn handle_register(
        &mut self,
        remote_addr: SocketAddr,
        session: SessionHandle,
    ) -> Result<ClientId, RegistryError> {
        if self.clients.len() >= MAX_CLIENTS {
            warn!(
                addr = %remote_addr,
                max = MAX_CLIENTS,
                "Registry is full, rejecting registration"
            );
            return Err(RegistryError::RegistryFull { max: MAX_CLIENTS });
        }

        let client_id = self.generate_unused_id()?;

        self.clients.insert(
            client_id.clone(),
            ClientRegistration::new(client_id.clone(), remote_addr, session),
        );

        debug!(
            client_id = %client_id,
            addr = %remote_addr,
            total = self.clients.len(),
            "Client registered"
        );

        // No subscribers is fine
        let _ = self.event_publisher.send(RegistryEvent::Registered {
            client_id: client_id.clone(),
            remote_addr,
        });

        Ok(client_id)
    }

    fn generate_unused_id(&self) -> Result<ClientId, RegistryError> {
        for attempt in 1..=MAX_ID_ATTEMPTS {
            let candidate = self.generator.generate();
            if !self.clients.contains_key(&candidate) {
                return Ok(candidate);
            }
            debug!(client_id = %candidate, attempt, "Generated id already in use, retrying");
        }

        warn!(attempts = MAX_ID_ATTEMPTS, "Exhausted id generation attempts");
        Err(RegistryError::IdSpaceExhausted {
            attempts: MAX_ID_ATTEMPTS,
        })
    }

    fn handle_unregister(&mut self, client_id: &ClientId) -> bool {
        match self.clients.remove(client_id) {
            Some(registration) => {
                debug!(
                    client_id = %client_id,
                    total = self.clients.len(),
                    "Client unregistered"
                );
                let _ = self.event_publisher.send(RegistryEvent::Removed {
                    client_id: registration.id,
                    remote_addr: registration.remote_addr,
                });
                true
            }
            None => false,
        }
    }
}
