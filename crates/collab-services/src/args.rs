//! Positional argument binding.
//!
//! Clients send raw positional values; the broker binds them onto the
//! action's declared parameter names before the service sees them. Optional
//! parameters left unsupplied bind to `Null`.

use collab_protocol::CoreError;
use serde_json::Value;

use crate::descriptor::ActionSpec;

/// Arguments bound by position onto declared parameter names.
#[derive(Debug, Clone)]
pub struct Args {
    bound: Vec<(String, Value)>,
}

impl Args {
    /// Bind raw positional values onto `spec`'s parameters.
    ///
    /// A required parameter that is absent (or explicitly null) and any
    /// excess values both fail with `BadRequest`.
    pub fn bind(spec: &ActionSpec, raw: Vec<Value>) -> Result<Self, CoreError> {
        if raw.len() > spec.params.len() {
            return Err(CoreError::bad_request(format!(
                "{} takes at most {} arguments (got {})",
                spec.name,
                spec.params.len(),
                raw.len()
            )));
        }

        let mut raw = raw.into_iter();
        let mut bound = Vec::with_capacity(spec.params.len());
        for param in &spec.params {
            let value = raw.next().unwrap_or(Value::Null);
            if value.is_null() && !param.optional {
                return Err(CoreError::bad_request(format!(
                    "{} is missing required argument \"{}\"",
                    spec.name, param.name
                )));
            }
            bound.push((param.name.clone(), value));
        }
        Ok(Self { bound })
    }

    /// The bound value for a parameter, `Null` if it was never declared.
    pub fn get(&self, name: &str) -> &Value {
        self.bound
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v)
            .unwrap_or(&Value::Null)
    }

    pub fn str_arg(&self, name: &str) -> Result<&str, CoreError> {
        self.get(name)
            .as_str()
            .ok_or_else(|| CoreError::bad_request(format!("\"{name}\" must be a string")))
    }

    pub fn i64_arg(&self, name: &str) -> Result<i64, CoreError> {
        self.get(name)
            .as_i64()
            .ok_or_else(|| CoreError::bad_request(format!("\"{name}\" must be an integer")))
    }
}
