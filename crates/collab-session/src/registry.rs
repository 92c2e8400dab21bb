//! Session registry — creates, looks up, and garbage-collects sessions.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use collab_protocol::CoreError;
use parking_lot::RwLock;
use tracing::{debug, info};

use crate::connection::ParticipantConnection;
use crate::project::{MessageLog, ProjectHandle};
use crate::session::Session;

const DEFAULT_GRACE: Duration = Duration::from_secs(10);

/// Guarantees at most one live session per key. A short grace period after
/// creation, a scheduled check reclaims sessions nobody ever joined
/// (ephemeral/preview sessions abandoned mid-join).
pub struct SessionRegistry {
    sessions: RwLock<HashMap<String, Arc<Session>>>,
    close_listeners: RwLock<Vec<Arc<dyn Fn(&str) + Send + Sync>>>,
    messages: Arc<dyn MessageLog>,
    grace: Duration,
}

impl SessionRegistry {
    pub fn new(messages: Arc<dyn MessageLog>) -> Arc<Self> {
        Self::with_grace(messages, DEFAULT_GRACE)
    }

    pub fn with_grace(messages: Arc<dyn MessageLog>, grace: Duration) -> Arc<Self> {
        Arc::new(Self {
            sessions: RwLock::new(HashMap::new()),
            close_listeners: RwLock::new(Vec::new()),
            messages,
            grace,
        })
    }

    /// Session key for an owner identity and project name.
    pub fn session_key(owner: &str, name: &str) -> String {
        format!("{owner}/{name}")
    }

    /// Create a session keyed by the owner connection's identity and `name`.
    pub fn create(
        self: &Arc<Self>,
        owner_conn: &Arc<ParticipantConnection>,
        name: &str,
        project: Arc<dyn ProjectHandle>,
        replace: bool,
    ) -> Result<Arc<Session>, CoreError> {
        let owner = owner_conn.identity();
        let key = Self::session_key(&owner, name);
        self.create_with_key(&key, &owner, name, project, replace)
    }

    /// Create a session under an explicit key (previews use generated ids).
    ///
    /// Fails with `Conflict` when a live, occupied session already holds the
    /// key and `replace` is false. An unoccupied session under the key is
    /// superseded: closed, then replaced — never silently orphaned.
    pub fn create_with_key(
        self: &Arc<Self>,
        key: &str,
        owner: &str,
        name: &str,
        project: Arc<dyn ProjectHandle>,
        replace: bool,
    ) -> Result<Arc<Session>, CoreError> {
        let session = Session::new(key, name, owner, project, self.messages.clone());

        let weak_reg = Arc::downgrade(self);
        let weak_sess = Arc::downgrade(&session);
        session.set_destroy_hook(Box::new(move || {
            if let (Some(registry), Some(session)) = (weak_reg.upgrade(), weak_sess.upgrade()) {
                registry.reclaim(&session);
            }
        }));

        let superseded = {
            let mut sessions = self.sessions.write();
            if let Some(existing) = sessions.get(key) {
                if existing.occupant_count() > 0 && !replace {
                    return Err(CoreError::conflict(format!(
                        "A live session already exists for {key}"
                    )));
                }
            }
            let old = sessions.remove(key);
            sessions.insert(key.to_string(), session.clone());
            old
        };

        // Close the superseded session outside the map lock; its destroy
        // hook no longer matches the map entry, so the new session survives.
        if let Some(old) = superseded {
            info!(session = %key, "superseding existing session");
            old.close();
        }

        info!(session = %key, %owner, "session created");
        self.schedule_idle_check(&session);
        Ok(session)
    }

    pub fn lookup(&self, key: &str) -> Option<Arc<Session>> {
        self.sessions.read().get(key).cloned()
    }

    /// The live session the connection currently belongs to, if any.
    pub fn session_for(&self, conn: &ParticipantConnection) -> Option<Arc<Session>> {
        let key = conn.session_key()?;
        self.lookup(&key)
    }

    pub fn len(&self) -> usize {
        self.sessions.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.read().is_empty()
    }

    /// Register a listener fired with the session key whenever a session is
    /// destroyed. The service broker uses this to drop per-session instances.
    pub fn on_close(&self, listener: Arc<dyn Fn(&str) + Send + Sync>) {
        self.close_listeners.write().push(listener);
    }

    /// Close every session (server shutdown).
    pub fn close_all(&self) {
        let sessions: Vec<_> = {
            let mut map = self.sessions.write();
            map.drain().map(|(_, s)| s).collect()
        };
        for session in sessions {
            session.close();
        }
    }

    // ── Internal ──────────────────────────────────────────────────────────

    /// Destroy-hook target: detach the session from the map (only if it is
    /// still the registered one) and notify close listeners.
    fn reclaim(&self, session: &Arc<Session>) {
        let key = session.key().to_string();
        let removed = {
            let mut sessions = self.sessions.write();
            match sessions.get(&key) {
                Some(current) if Arc::ptr_eq(current, session) => {
                    sessions.remove(&key);
                    true
                }
                _ => false,
            }
        };
        if removed {
            debug!(session = %key, "session detached from registry");
        }
        let listeners: Vec<_> = self.close_listeners.read().clone();
        for listener in listeners {
            listener(&key);
        }
    }

    fn schedule_idle_check(self: &Arc<Self>, session: &Arc<Session>) {
        let weak_reg = Arc::downgrade(self);
        let weak_sess = Arc::downgrade(session);
        let grace = self.grace;
        tokio::spawn(async move {
            tokio::time::sleep(grace).await;
            let (Some(registry), Some(session)) = (weak_reg.upgrade(), weak_sess.upgrade())
            else {
                return;
            };
            let still_registered = registry
                .lookup(session.key())
                .map(|current| Arc::ptr_eq(&current, &session))
                .unwrap_or(false);
            if still_registered && session.occupant_count() == 0 {
                info!(session = %session.key(), "reclaiming idle session");
                session.close();
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::ClientChannel;
    use crate::memory::{MemoryMessageLog, MemoryProjects};
    use crate::project::ProjectStore;
    use collab_protocol::{Envelope, ErrorKind};
    use parking_lot::Mutex;

    #[derive(Default)]
    struct Recorder {
        sent: Mutex<Vec<Envelope>>,
    }

    impl ClientChannel for Recorder {
        fn send(&self, envelope: &Envelope) {
            self.sent.lock().push(envelope.clone());
        }
    }

    fn conn(id: &str) -> (Arc<ParticipantConnection>, Arc<Recorder>) {
        let recorder = Arc::new(Recorder::default());
        (ParticipantConnection::with_id(id, recorder.clone()), recorder)
    }

    fn registry_with_grace(grace: Duration) -> (Arc<SessionRegistry>, Arc<MemoryProjects>) {
        let messages = Arc::new(MemoryMessageLog::new());
        (SessionRegistry::with_grace(messages, grace), MemoryProjects::new())
    }

    #[tokio::test]
    async fn conflict_on_occupied_key() {
        let (registry, projects) = registry_with_grace(Duration::from_secs(60));
        let (p1, _) = conn("p1");

        let s1 = registry
            .create(&p1, "proj", projects.create("p1", "proj"), false)
            .unwrap();
        s1.create_role("main").unwrap();
        s1.add(&registry, &p1, "main").unwrap();

        let err = registry
            .create(&p1, "proj", projects.create("p1", "proj"), false)
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::Conflict);
        assert!(Arc::ptr_eq(&registry.lookup("p1/proj").unwrap(), &s1));
    }

    #[tokio::test]
    async fn unoccupied_session_is_superseded_not_orphaned() {
        let (registry, projects) = registry_with_grace(Duration::from_secs(60));
        let (p1, _) = conn("p1");

        let s1 = registry
            .create(&p1, "proj", projects.create("p1", "proj"), false)
            .unwrap();
        let s2 = registry
            .create(&p1, "proj", projects.create("p1", "proj"), false)
            .unwrap();

        assert!(s1.is_defunct());
        assert!(!s2.is_defunct());
        assert!(Arc::ptr_eq(&registry.lookup("p1/proj").unwrap(), &s2));
    }

    #[tokio::test]
    async fn replace_closes_occupied_session() {
        let (registry, projects) = registry_with_grace(Duration::from_secs(60));
        let (p1, r1) = conn("p1");

        let s1 = registry
            .create(&p1, "proj", projects.create("p1", "proj"), false)
            .unwrap();
        s1.create_role("main").unwrap();
        s1.add(&registry, &p1, "main").unwrap();

        let s2 = registry
            .create(&p1, "proj", projects.create("p1", "proj"), true)
            .unwrap();
        assert!(s1.is_defunct());
        assert!(r1.sent.lock().iter().any(|e| matches!(e, Envelope::SessionClosed)));
        assert!(p1.placement().is_none());
        assert!(Arc::ptr_eq(&registry.lookup("p1/proj").unwrap(), &s2));
    }

    #[tokio::test]
    async fn idle_sweep_reclaims_never_joined_sessions() {
        let (registry, projects) = registry_with_grace(Duration::from_millis(20));
        let (p1, _) = conn("p1");

        let session = registry
            .create(&p1, "proj", projects.create("p1", "proj"), false)
            .unwrap();
        assert!(registry.lookup("p1/proj").is_some());

        tokio::time::sleep(Duration::from_millis(120)).await;
        assert!(session.is_defunct());
        assert!(registry.lookup("p1/proj").is_none());
    }

    #[tokio::test]
    async fn idle_sweep_spares_occupied_sessions() {
        let (registry, projects) = registry_with_grace(Duration::from_millis(20));
        let (p1, _) = conn("p1");

        let session = registry
            .create(&p1, "proj", projects.create("p1", "proj"), false)
            .unwrap();
        session.create_role("main").unwrap();
        session.add(&registry, &p1, "main").unwrap();

        tokio::time::sleep(Duration::from_millis(120)).await;
        assert!(!session.is_defunct());
        assert!(registry.lookup("p1/proj").is_some());
    }

    #[tokio::test]
    async fn close_listener_fires_with_key() {
        let (registry, projects) = registry_with_grace(Duration::from_secs(60));
        let (p1, _) = conn("p1");
        let closed: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
        let sink = closed.clone();
        registry.on_close(Arc::new(move |key| sink.lock().push(key.to_string())));

        let session = registry
            .create(&p1, "proj", projects.create("p1", "proj"), false)
            .unwrap();
        session.close();

        assert_eq!(closed.lock().as_slice(), ["p1/proj".to_string()]);
        assert!(registry.is_empty());
    }
}
