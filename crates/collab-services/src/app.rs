//! Application wiring: one explicit bundle of the server's collaborators.

use std::sync::Arc;
use std::time::Duration;

use collab_session::auth::LoginTokens;
use collab_session::memory::{MemoryMessageLog, MemoryProjects, MemoryUserStore};
use collab_session::{MessageLog, ProjectStore, SessionRegistry, UserStore};

use crate::broker::{ServiceBroker, ServiceBrokerBuilder};
use crate::builtin::{PublicRoles, WordGuess};

/// Everything the transport and binary need, built once at startup and
/// passed explicitly. There are no ambient globals.
pub struct AppContext {
    pub registry: Arc<SessionRegistry>,
    pub broker: Arc<ServiceBroker>,
    pub projects: Arc<dyn ProjectStore>,
    pub users: Arc<dyn UserStore>,
    pub messages: Arc<dyn MessageLog>,
    pub tokens: LoginTokens,
}

impl AppContext {
    /// Memory-backed context with the built-in services registered.
    pub fn new(idle_grace: Duration) -> Arc<Self> {
        let messages: Arc<dyn MessageLog> = Arc::new(MemoryMessageLog::new());
        let registry = SessionRegistry::with_grace(messages.clone(), idle_grace);
        let broker = ServiceBrokerBuilder::new()
            .shared(PublicRoles::new())
            .per_session(WordGuess::new)
            .build(&registry);

        Arc::new(Self {
            registry,
            broker,
            projects: MemoryProjects::new(),
            users: MemoryUserStore::new(),
            messages,
            tokens: LoginTokens::new(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn built_ins_are_registered() {
        let app = AppContext::new(Duration::from_secs(60));
        let names: Vec<_> = app.broker.descriptors().into_iter().map(|d| d.name).collect();
        assert_eq!(names, ["public-roles", "word-guess"]);
    }
}
