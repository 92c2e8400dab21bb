//! Per-invocation context handed to service actions.

use std::sync::Arc;

use collab_protocol::{public_role_id, CoreError};
use collab_session::{ParticipantConnection, Session};
use parking_lot::Mutex;
use serde_json::Value;
use tracing::warn;

/// The caller and (when resolved) session of one invocation, plus a
/// single-shot reply slot. A reply written here wins over the action's
/// returned value; at most one of the two reaches the caller.
pub struct InvocationContext {
    caller: Arc<ParticipantConnection>,
    session: Option<Arc<Session>>,
    reply: Mutex<Option<Value>>,
}

impl InvocationContext {
    pub fn new(caller: Arc<ParticipantConnection>, session: Option<Arc<Session>>) -> Self {
        Self {
            caller,
            session,
            reply: Mutex::new(None),
        }
    }

    pub fn caller(&self) -> &Arc<ParticipantConnection> {
        &self.caller
    }

    pub fn session(&self) -> Option<&Arc<Session>> {
        self.session.as_ref()
    }

    /// The caller's session, or `Unauthorized` when it has none.
    pub fn require_session(&self) -> Result<&Arc<Session>, CoreError> {
        self.session.as_ref().ok_or_else(CoreError::no_session)
    }

    /// Write the invocation's reply. First write wins.
    pub fn reply(&self, value: Value) {
        let mut slot = self.reply.lock();
        if slot.is_some() {
            warn!(caller = %self.caller.id(), "duplicate reply dropped");
            return;
        }
        *slot = Some(value);
    }

    pub(crate) fn take_reply(&self) -> Option<Value> {
        self.reply.lock().take()
    }

    /// The caller's public role id, `{role}@{sessionName}@{owner}`.
    pub fn public_role_id(&self) -> Result<String, CoreError> {
        let session = self.require_session()?;
        let role = self
            .caller
            .role()
            .ok_or_else(|| CoreError::bad_request("Connection is not placed at a role"))?;
        Ok(public_role_id(&role, &session.name(), &session.owner()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use collab_protocol::{Envelope, ErrorKind};
    use collab_session::ClientChannel;
    use serde_json::json;

    struct NullChannel;
    impl ClientChannel for NullChannel {
        fn send(&self, _envelope: &Envelope) {}
    }

    #[test]
    fn first_reply_wins() {
        let caller = ParticipantConnection::with_id("c1", Arc::new(NullChannel));
        let ctx = InvocationContext::new(caller, None);
        ctx.reply(json!(1));
        ctx.reply(json!(2));
        assert_eq!(ctx.take_reply(), Some(json!(1)));
        assert_eq!(ctx.take_reply(), None);
    }

    #[test]
    fn require_session_without_one_is_unauthorized() {
        let caller = ParticipantConnection::with_id("c1", Arc::new(NullChannel));
        let ctx = InvocationContext::new(caller, None);
        assert_eq!(ctx.require_session().unwrap_err().kind, ErrorKind::Unauthorized);
    }
}
