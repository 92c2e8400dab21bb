//! Participant connections: one network connection's identity and placement.

use std::sync::Arc;

use collab_protocol::{CoreError, Envelope};
use parking_lot::RwLock;
use tracing::debug;

use crate::registry::SessionRegistry;

/// Outbound channel to one client. Implemented by the transport (a sender
/// pumped by the socket's write half) and by test doubles.
pub trait ClientChannel: Send + Sync {
    fn send(&self, envelope: &Envelope);
}

/// Where a connection currently sits: the session's key and, if placed, its
/// role. Deliberately not a pointer to the session — the registry resolves
/// the key on demand.
#[derive(Debug, Clone, PartialEq)]
pub struct Placement {
    pub session_key: String,
    pub role: Option<String>,
}

/// One live network connection's identity and current role placement.
/// Destroyed on disconnect; never outlives the underlying connection.
pub struct ParticipantConnection {
    id: String,
    username: RwLock<Option<String>>,
    placement: RwLock<Option<Placement>>,
    channel: Arc<dyn ClientChannel>,
}

impl ParticipantConnection {
    pub fn new(channel: Arc<dyn ClientChannel>) -> Arc<Self> {
        Self::with_id(uuid::Uuid::new_v4().to_string(), channel)
    }

    pub fn with_id(id: impl Into<String>, channel: Arc<dyn ClientChannel>) -> Arc<Self> {
        Arc::new(Self {
            id: id.into(),
            username: RwLock::new(None),
            placement: RwLock::new(None),
            channel,
        })
    }

    /// Ephemeral identifier assigned at connect time.
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn username(&self) -> Option<String> {
        self.username.read().clone()
    }

    /// The authenticated username, or the ephemeral id before login.
    pub fn identity(&self) -> String {
        self.username().unwrap_or_else(|| self.id.clone())
    }

    pub fn placement(&self) -> Option<Placement> {
        self.placement.read().clone()
    }

    pub fn session_key(&self) -> Option<String> {
        self.placement.read().as_ref().map(|p| p.session_key.clone())
    }

    pub fn role(&self) -> Option<String> {
        self.placement.read().as_ref().and_then(|p| p.role.clone())
    }

    pub fn send(&self, envelope: &Envelope) {
        self.channel.send(envelope);
    }

    pub(crate) fn set_placement(&self, placement: Option<Placement>) {
        *self.placement.write() = placement;
    }

    /// Attach an authenticated identity to this connection.
    ///
    /// If the connection's current session's project is still owned by the
    /// connection's ephemeral id, ownership is transferred: the project is
    /// renamed through the collision-avoiding renamer scoped to `username`,
    /// then reassigned. The transfer is serialized with session renames.
    pub fn login(
        self: &Arc<Self>,
        username: &str,
        registry: &SessionRegistry,
    ) -> Result<(), CoreError> {
        if username.is_empty() {
            return Err(CoreError::bad_request("Username must not be empty"));
        }
        debug!(connection = %self.id, %username, "login");
        *self.username.write() = Some(username.to_string());

        if let Some(session) = registry.session_for(self) {
            session.adopt_owner(&self.id, username);
        }
        Ok(())
    }

    /// Detach from any session and clear placement.
    pub fn leave(self: &Arc<Self>, registry: &SessionRegistry) {
        if let Some(session) = registry.session_for(self) {
            session.remove(self);
        }
        self.set_placement(None);
    }
}

impl std::fmt::Debug for ParticipantConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ParticipantConnection")
            .field("id", &self.id)
            .field("username", &*self.username.read())
            .field("placement", &*self.placement.read())
            .finish()
    }
}
