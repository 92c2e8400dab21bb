//! Service broker — resolves instances and dispatches invocations.

use std::collections::HashMap;
use std::sync::Arc;

use collab_protocol::CoreError;
use collab_session::{ParticipantConnection, Session, SessionRegistry};
use dashmap::DashMap;
use futures_util::FutureExt;
use serde_json::Value;
use tracing::{debug, error, info};

use crate::context::InvocationContext;
use crate::descriptor::{Scope, ServiceDescriptor};
use crate::{Args, Outcome, Service, ServiceDyn};

type Factory = Box<dyn Fn() -> Arc<dyn ServiceDyn> + Send + Sync>;

enum ServiceEntry {
    Shared(Arc<dyn ServiceDyn>),
    PerSession {
        descriptor: ServiceDescriptor,
        factory: Factory,
    },
}

impl ServiceEntry {
    fn descriptor(&self) -> &ServiceDescriptor {
        match self {
            Self::Shared(service) => service.descriptor_dyn(),
            Self::PerSession { descriptor, .. } => descriptor,
        }
    }
}

/// Registers service instances and factories, then builds the immutable
/// broker. Registration happens once at startup.
#[derive(Default)]
pub struct ServiceBrokerBuilder {
    services: HashMap<String, ServiceEntry>,
}

impl ServiceBrokerBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register one process-wide instance.
    pub fn shared<S: Service + 'static>(mut self, service: S) -> Self {
        debug_assert_eq!(service.descriptor().scope, Scope::Shared);
        let name = service.descriptor().name.clone();
        info!(service = %name, "registering shared service");
        self.services.insert(name, ServiceEntry::Shared(Arc::new(service)));
        self
    }

    /// Register a factory producing one instance per live session.
    ///
    /// The factory runs once here to snapshot the descriptor, then lazily on
    /// each session's first invocation.
    pub fn per_session<S, F>(mut self, factory: F) -> Self
    where
        S: Service + 'static,
        F: Fn() -> S + Send + Sync + 'static,
    {
        let descriptor = factory().descriptor().clone();
        debug_assert_eq!(descriptor.scope, Scope::PerSession);
        info!(service = %descriptor.name, "registering per-session service");
        let factory: Factory = Box::new(move || Arc::new(factory()));
        self.services.insert(
            descriptor.name.clone(),
            ServiceEntry::PerSession { descriptor, factory },
        );
        self
    }

    /// Build the broker and hook per-session instance eviction into the
    /// registry's close notifications.
    pub fn build(self, registry: &Arc<SessionRegistry>) -> Arc<ServiceBroker> {
        let broker = Arc::new(ServiceBroker {
            services: self.services,
            instances: DashMap::new(),
            registry: registry.clone(),
        });
        let weak = Arc::downgrade(&broker);
        registry.on_close(Arc::new(move |session_key| {
            if let Some(broker) = weak.upgrade() {
                broker.evict(session_key);
            }
        }));
        broker
    }
}

/// Dispatches invocations to the right service instance.
///
/// Shared services have one instance for the process. Per-session services
/// get one instance per live session, created lazily on first invocation and
/// evicted when the session closes.
pub struct ServiceBroker {
    services: HashMap<String, ServiceEntry>,
    /// Per-session instances keyed by (service name, session key).
    instances: DashMap<(String, String), Arc<dyn ServiceDyn>>,
    registry: Arc<SessionRegistry>,
}

impl ServiceBroker {
    /// Invoke `service/action` on behalf of `conn` with raw positional args.
    ///
    /// `Ok(None)` means the result was deliberately discarded: the caller's
    /// session closed while a per-session action was in flight, so there is
    /// no one left to answer meaningfully.
    pub async fn invoke(
        &self,
        service: &str,
        action: &str,
        conn: &Arc<ParticipantConnection>,
        raw_args: Vec<Value>,
    ) -> Result<Option<Value>, CoreError> {
        let entry = self
            .services
            .get(service)
            .ok_or_else(|| CoreError::unknown_service(service))?;
        let spec = entry
            .descriptor()
            .lookup(action)
            .ok_or_else(|| CoreError::unknown_action(service, action))?;
        let args = Args::bind(spec, raw_args)?;

        let (instance, session) = self.resolve(entry, service, conn)?;
        let per_session = matches!(entry, ServiceEntry::PerSession { .. });

        debug!(%service, %action, caller = %conn.id(), "invoking");
        let ctx = InvocationContext::new(conn.clone(), session.clone());
        let outcome = match std::panic::AssertUnwindSafe(instance.invoke_dyn(&ctx, action, &args))
            .catch_unwind()
            .await
        {
            Ok(result) => result?,
            Err(_) => {
                error!(%service, %action, "action panicked");
                return Err(CoreError::internal(format!(
                    "{service}/{action} failed unexpectedly"
                )));
            }
        };

        // The session may have closed while the action ran; its instance is
        // already evicted, so the result has nowhere meaningful to go.
        if per_session && session.as_ref().is_some_and(|s| s.is_defunct()) {
            debug!(%service, %action, "session closed mid-invocation, result discarded");
            return Ok(None);
        }

        match ctx.take_reply() {
            Some(value) => Ok(Some(value)),
            None => match outcome {
                Outcome::Value(value) => Ok(Some(value)),
                Outcome::Handled => Err(CoreError::internal(format!(
                    "{service}/{action} produced no response"
                ))),
            },
        }
    }

    /// All registered descriptors, sorted by service name.
    pub fn descriptors(&self) -> Vec<ServiceDescriptor> {
        let mut all: Vec<_> = self.services.values().map(|e| e.descriptor().clone()).collect();
        all.sort_by(|a, b| a.name.cmp(&b.name));
        all
    }

    // ── Internal ──────────────────────────────────────────────────────────

    fn resolve(
        &self,
        entry: &ServiceEntry,
        service: &str,
        conn: &ParticipantConnection,
    ) -> Result<(Arc<dyn ServiceDyn>, Option<Arc<Session>>), CoreError> {
        match entry {
            ServiceEntry::Shared(instance) => {
                Ok((instance.clone(), self.registry.session_for(conn)))
            }
            ServiceEntry::PerSession { factory, .. } => {
                let session = self
                    .registry
                    .session_for(conn)
                    .ok_or_else(CoreError::no_session)?;
                let key = (service.to_string(), session.key().to_string());
                let instance = self
                    .instances
                    .entry(key)
                    .or_insert_with(|| factory())
                    .value()
                    .clone();
                Ok((instance, Some(session)))
            }
        }
    }

    fn evict(&self, session_key: &str) {
        self.instances.retain(|(_, key), _| key != session_key);
    }
}
