//! Cross-session addressing: expose the caller's public role id.

use collab_protocol::CoreError;

use crate::{Args, InvocationContext, Outcome, Scope, Service, ServiceDescriptor};

/// Stateless lookup of the caller's `{role}@{sessionName}@{owner}` id, used
/// by clients to address messages to a role in another session.
pub struct PublicRoles {
    descriptor: ServiceDescriptor,
}

impl PublicRoles {
    pub fn new() -> Self {
        Self {
            descriptor: ServiceDescriptor::new("public-roles", Scope::Shared)
                .action("getPublicRoleId", vec![]),
        }
    }
}

impl Default for PublicRoles {
    fn default() -> Self {
        Self::new()
    }
}

impl Service for PublicRoles {
    fn descriptor(&self) -> &ServiceDescriptor {
        &self.descriptor
    }

    async fn invoke(
        &self,
        ctx: &InvocationContext,
        action: &str,
        _args: &Args,
    ) -> Result<Outcome, CoreError> {
        match action {
            "getPublicRoleId" => Ok(Outcome::Value(ctx.public_role_id()?.into())),
            _ => Err(CoreError::unknown_action("public-roles", action)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use collab_protocol::{Envelope, ErrorKind};
    use collab_session::memory::{MemoryMessageLog, MemoryProjects};
    use collab_session::{ClientChannel, ParticipantConnection, ProjectStore, SessionRegistry};
    use serde_json::json;
    use std::sync::Arc;
    use std::time::Duration;

    struct NullChannel;
    impl ClientChannel for NullChannel {
        fn send(&self, _envelope: &Envelope) {}
    }

    #[tokio::test]
    async fn returns_the_caller_public_role_id() {
        let registry =
            SessionRegistry::with_grace(Arc::new(MemoryMessageLog::new()), Duration::from_secs(60));
        let projects = MemoryProjects::new();
        let conn = ParticipantConnection::with_id("alice", Arc::new(NullChannel));

        let session = registry
            .create(&conn, "proj", projects.create("alice", "proj"), false)
            .unwrap();
        session.create_role("role1").unwrap();
        session.add(&registry, &conn, "role1").unwrap();

        let service = PublicRoles::new();
        let args = Args::bind(service.descriptor().lookup("getPublicRoleId").unwrap(), vec![])
            .unwrap();
        let ctx = InvocationContext::new(conn.clone(), Some(session));
        let outcome = service.invoke(&ctx, "getPublicRoleId", &args).await.unwrap();
        match outcome {
            Outcome::Value(value) => assert_eq!(value, json!("role1@proj@alice")),
            Outcome::Handled => panic!("expected a value"),
        }
    }

    #[tokio::test]
    async fn fails_without_a_session() {
        let conn = ParticipantConnection::with_id("alice", Arc::new(NullChannel));
        let service = PublicRoles::new();
        let args = Args::bind(service.descriptor().lookup("getPublicRoleId").unwrap(), vec![])
            .unwrap();
        let ctx = InvocationContext::new(conn, None);
        let err = service.invoke(&ctx, "getPublicRoleId", &args).await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::Unauthorized);
    }
}
