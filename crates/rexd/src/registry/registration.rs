//! Registry entry for one live client.

use std::net::SocketAddr;

use chrono::{DateTime, Utc};

use rex_core::ClientId;

use crate::server::SessionHandle;

/// One registered peer.
///
/// Registry membership and session lifetime are 1:1: the entry is inserted
/// when the handshake completes and removed when the session terminates.
#[derive(Debug, Clone)]
pub struct ClientRegistration {
    /// Identifier assigned at registration
    pub id: ClientId,

    /// Peer address captured at accept time
    pub remote_addr: SocketAddr,

    /// When the handshake completed
    pub registered_at: DateTime<Utc>,

    /// Handle to the session backing this registration
    pub session: SessionHandle,
}

impl ClientRegistration {
    pub fn new(id: ClientId, remote_addr: SocketAddr, session: SessionHandle) -> Self {
        Self {
            id,
            remote_addr,
            registered_at: Utc::now(),
            session,
        }
    }
}
