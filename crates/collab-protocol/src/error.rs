//! Error kinds shared by the session layer and the service broker.
//!
//! The boundary layer is responsible for turning these kinds into transport
//! responses; the core only promises one of the enumerated kinds plus a
//! human-readable message.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Enumerated failure categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ErrorKind {
    /// Unknown session key, role, service, or action.
    NotFound,
    /// Edit attempted by a non-owner/non-collaborator, or a stateful-service
    /// resolution attempted with no active session.
    Unauthorized,
    /// Malformed or missing invocation arguments; operation on a role or
    /// session that doesn't exist in the request's own terms.
    BadRequest,
    /// Creating a session under a key that already has a live, occupied session.
    Conflict,
    /// An action handler raised an unexpected failure.
    Internal,
}

/// A categorized error with a human-readable message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Error)]
#[error("{kind:?}: {message}")]
pub struct CoreError {
    pub kind: ErrorKind,
    pub message: String,
}

impl CoreError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::NotFound, message)
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Unauthorized, message)
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::BadRequest, message)
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Conflict, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Internal, message)
    }

    pub fn unknown_service(name: &str) -> Self {
        Self::not_found(format!("Unknown service: {name}"))
    }

    pub fn unknown_action(service: &str, action: &str) -> Self {
        Self::not_found(format!("Unknown action: {service}/{action}"))
    }

    /// Stateful-service resolution with no active session. Distinct from
    /// [`CoreError::unknown_service`].
    pub fn no_session() -> Self {
        Self::unauthorized("Connection has no active session")
    }
}
