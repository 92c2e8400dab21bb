//! Service descriptors — the declared surface of a service.
//!
//! Descriptors are built once at registration and immutable after. The
//! broker uses them to validate actions and bind arguments; the transport
//! serves them as the service index.

use serde::Serialize;

/// Instance lifetime of a service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Scope {
    /// One instance for the whole process; must tolerate concurrent callers.
    Shared,
    /// One instance per live session, created lazily on first invocation and
    /// dropped when the session closes.
    PerSession,
}

/// One declared parameter of an action.
#[derive(Debug, Clone, Serialize)]
pub struct ParamSpec {
    pub name: String,
    pub optional: bool,
}

impl ParamSpec {
    pub fn required(name: impl Into<String>) -> Self {
        Self { name: name.into(), optional: false }
    }

    pub fn optional(name: impl Into<String>) -> Self {
        Self { name: name.into(), optional: true }
    }
}

/// One invocable action with its ordered parameter list.
#[derive(Debug, Clone, Serialize)]
pub struct ActionSpec {
    pub name: String,
    pub params: Vec<ParamSpec>,
}

/// The full declared surface of a service.
#[derive(Debug, Clone, Serialize)]
pub struct ServiceDescriptor {
    pub name: String,
    pub scope: Scope,
    pub actions: Vec<ActionSpec>,
}

impl ServiceDescriptor {
    pub fn new(name: impl Into<String>, scope: Scope) -> Self {
        Self {
            name: name.into(),
            scope,
            actions: Vec::new(),
        }
    }

    /// Declare an action. Builder-style, used at service construction.
    pub fn action(mut self, name: impl Into<String>, params: Vec<ParamSpec>) -> Self {
        self.actions.push(ActionSpec { name: name.into(), params });
        self
    }

    pub fn lookup(&self, action: &str) -> Option<&ActionSpec> {
        self.actions.iter().find(|a| a.name == action)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_finds_declared_actions_only() {
        let descriptor = ServiceDescriptor::new("demo", Scope::Shared)
            .action("ping", vec![])
            .action("echo", vec![ParamSpec::required("text")]);

        assert!(descriptor.lookup("ping").is_some());
        assert_eq!(descriptor.lookup("echo").unwrap().params.len(), 1);
        assert!(descriptor.lookup("missing").is_none());
    }

    #[test]
    fn scope_serializes_kebab_case() {
        assert_eq!(serde_json::to_value(Scope::PerSession).unwrap(), "per-session");
        assert_eq!(serde_json::to_value(Scope::Shared).unwrap(), "shared");
    }
}
