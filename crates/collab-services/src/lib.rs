//! Service implementations and the broker that dispatches to them.
//!
//! Each service implements the [`Service`] trait and declares its actions in
//! a [`ServiceDescriptor`]. Services are registered with a [`ServiceBroker`]
//! which resolves the right instance (a process-wide one, or one scoped to
//! the caller's session) and dispatches invocations by service name.

pub mod app;
pub mod args;
pub mod broker;
pub mod builtin;
pub mod context;
pub mod descriptor;

use std::future::Future;
use std::pin::Pin;

use collab_protocol::CoreError;
use serde_json::Value;

pub use app::AppContext;
pub use args::Args;
pub use broker::{ServiceBroker, ServiceBrokerBuilder};
pub use context::InvocationContext;
pub use descriptor::{ActionSpec, ParamSpec, Scope, ServiceDescriptor};

/// What an action produced.
#[derive(Debug)]
pub enum Outcome {
    /// A JSON value for the broker to return to the caller.
    Value(Value),
    /// The action answered through the context's reply slot.
    Handled,
}

/// Trait implemented by all services.
///
/// An invocation receives the caller's context, the action name (already
/// validated against the descriptor), and positionally-bound arguments.
pub trait Service: Send + Sync {
    /// The descriptor declaring this service's name, scope, and actions.
    fn descriptor(&self) -> &ServiceDescriptor;

    /// Handle one action invocation.
    fn invoke(
        &self,
        ctx: &InvocationContext,
        action: &str,
        args: &Args,
    ) -> impl Future<Output = Result<Outcome, CoreError>> + Send;
}

/// Object-safe wrapper for the Service trait.
pub trait ServiceDyn: Send + Sync {
    fn descriptor_dyn(&self) -> &ServiceDescriptor;
    fn invoke_dyn<'a>(
        &'a self,
        ctx: &'a InvocationContext,
        action: &'a str,
        args: &'a Args,
    ) -> Pin<Box<dyn Future<Output = Result<Outcome, CoreError>> + Send + 'a>>;
}

impl<T: Service> ServiceDyn for T {
    fn descriptor_dyn(&self) -> &ServiceDescriptor {
        self.descriptor()
    }

    fn invoke_dyn<'a>(
        &'a self,
        ctx: &'a InvocationContext,
        action: &'a str,
        args: &'a Args,
    ) -> Pin<Box<dyn Future<Output = Result<Outcome, CoreError>> + Send + 'a>> {
        Box::pin(self.invoke(ctx, action, args))
    }
}
