//! Collaborator interfaces consumed by the session layer.
//!
//! Durable storage is out of scope here; these traits describe the surface
//! the session coordinator relies on. See [`crate::memory`] for the in-memory
//! implementations used by the server binary and the tests.

use std::sync::Arc;

use collab_protocol::{Envelope, RecordedMessage};

/// Handle to one stored project. A session holds exactly one for its
/// lifetime; the handle's identity never changes, only its name/owner may.
pub trait ProjectHandle: Send + Sync {
    fn id(&self) -> String;
    fn name(&self) -> String;
    fn owner(&self) -> String;

    fn set_owner(&self, identity: &str);
    fn set_name(&self, name: &str);

    /// Collision-avoiding rename scoped to `identity`: returns `base` if that
    /// name is free for the identity, otherwise `base(2)`, `base(3)`, ...
    fn get_new_name(&self, identity: &str, base: &str) -> String;

    fn create_role(&self, role: &str);
    fn rename_role(&self, old: &str, new: &str);
    fn delete_role(&self, role: &str);

    /// Open a recording window for `connection_id`, returning its start time
    /// (ms). Starting while a window is already open returns the earlier
    /// start unchanged.
    fn start_recording_messages(&self, connection_id: &str) -> i64;

    /// Close the window for `connection_id`, returning its start time, or
    /// `None` when no window is open for it.
    fn stop_recording_messages(&self, connection_id: &str) -> Option<i64>;

    /// Whether any recording window is currently open.
    fn recording(&self) -> bool;
}

/// Project directory: create/look up project handles by id.
pub trait ProjectStore: Send + Sync {
    fn create(&self, owner: &str, name: &str) -> Arc<dyn ProjectHandle>;
    fn get(&self, id: &str) -> Option<Arc<dyn ProjectHandle>>;
    fn delete(&self, id: &str);
}

/// Stored identity record.
#[derive(Debug, Clone, PartialEq)]
pub struct UserRecord {
    pub username: String,
    pub email: Option<String>,
    /// Password hash as supplied by the client at signup. Verified by
    /// equality; hashing mechanics live outside the core.
    pub hash: Option<String>,
}

/// Identity storage.
pub trait UserStore: Send + Sync {
    fn get(&self, username: &str) -> Option<UserRecord>;
    fn save(&self, record: &UserRecord);
}

/// Append-only log of messages recorded during trace windows.
pub trait MessageLog: Send + Sync {
    fn record(&self, project_id: &str, message: &Envelope, at: i64);

    /// Messages for `project_id` with `start <= time < end`, in record order.
    fn get(&self, project_id: &str, start: i64, end: i64) -> Vec<RecordedMessage>;
}
