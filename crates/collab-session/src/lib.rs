//! Session coordination layer.
//!
//! Tracks which participant connections occupy which named roles of a
//! collaborative session, keeps every participant's view of that topology
//! consistent after every change, and manages ownership transfer from an
//! anonymous connection identity to an authenticated one.
//!
//! Storage and identity collaborators (projects, users, message logs) are
//! consumed through the traits in [`project`]; [`memory`] provides in-memory
//! reference implementations.

pub mod auth;
pub mod connection;
pub mod memory;
pub mod project;
pub mod registry;
pub mod session;

pub use connection::{ClientChannel, ParticipantConnection, Placement};
pub use project::{MessageLog, ProjectHandle, ProjectStore, UserRecord, UserStore};
pub use registry::SessionRegistry;
pub use session::Session;

/// Current time in milliseconds since the Unix epoch.
pub(crate) fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
