//! Collaboration protocol types.
//!
//! Wire-format types shared by the session layer, the service broker, and the
//! transport. This crate is the single source of truth for the message
//! envelope, the client request schema, and the error kinds.

pub mod envelope;
pub mod error;
pub mod request;

pub use envelope::{Envelope, RecordedMessage, EVERYONE};
pub use error::{CoreError, ErrorKind};
pub use request::{ClientRequest, ServerReply};

/// Public identifier for cross-session addressing of a role.
///
/// Format: `"{roleName}@{sessionName}@{ownerIdentity}"`.
pub fn public_role_id(role: &str, session_name: &str, owner: &str) -> String {
    format!("{role}@{session_name}@{owner}")
}
