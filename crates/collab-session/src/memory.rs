//! In-memory reference implementations of the storage collaborators.
//!
//! Used by the server binary and the test suites. A deployment backed by
//! durable storage supplies its own [`ProjectStore`]/[`UserStore`]/
//! [`MessageLog`] implementations.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use collab_protocol::{Envelope, RecordedMessage};
use parking_lot::Mutex;

use crate::now_ms;
use crate::project::{MessageLog, ProjectHandle, ProjectStore, UserRecord, UserStore};

/// Per-identity index of taken project names, shared by all projects of one
/// store so `get_new_name` sees renames immediately.
type NameIndex = Arc<Mutex<HashMap<String, BTreeSet<String>>>>;

pub struct MemoryProjects {
    index: NameIndex,
    projects: Mutex<HashMap<String, Arc<MemoryProject>>>,
}

impl MemoryProjects {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            index: Arc::new(Mutex::new(HashMap::new())),
            projects: Mutex::new(HashMap::new()),
        })
    }
}

impl ProjectStore for MemoryProjects {
    fn create(&self, owner: &str, name: &str) -> Arc<dyn ProjectHandle> {
        let project = Arc::new(MemoryProject {
            id: uuid::Uuid::new_v4().to_string(),
            state: Mutex::new(ProjectState {
                name: name.to_string(),
                owner: owner.to_string(),
                roles: BTreeSet::new(),
            }),
            windows: Mutex::new(HashMap::new()),
            index: self.index.clone(),
        });
        self.index
            .lock()
            .entry(owner.to_string())
            .or_default()
            .insert(name.to_string());
        self.projects.lock().insert(project.id.clone(), project.clone());
        project
    }

    fn get(&self, id: &str) -> Option<Arc<dyn ProjectHandle>> {
        self.projects
            .lock()
            .get(id)
            .cloned()
            .map(|p| p as Arc<dyn ProjectHandle>)
    }

    fn delete(&self, id: &str) {
        if let Some(project) = self.projects.lock().remove(id) {
            let st = project.state.lock();
            if let Some(names) = self.index.lock().get_mut(&st.owner) {
                names.remove(&st.name);
            }
        }
    }
}

struct ProjectState {
    name: String,
    owner: String,
    roles: BTreeSet<String>,
}

pub struct MemoryProject {
    id: String,
    state: Mutex<ProjectState>,
    /// Open trace windows: connection id → start time (ms).
    windows: Mutex<HashMap<String, i64>>,
    index: NameIndex,
}

impl ProjectHandle for MemoryProject {
    fn id(&self) -> String {
        self.id.clone()
    }

    fn name(&self) -> String {
        self.state.lock().name.clone()
    }

    fn owner(&self) -> String {
        self.state.lock().owner.clone()
    }

    fn set_owner(&self, identity: &str) {
        let mut st = self.state.lock();
        let mut index = self.index.lock();
        if let Some(names) = index.get_mut(&st.owner) {
            names.remove(&st.name);
        }
        index
            .entry(identity.to_string())
            .or_default()
            .insert(st.name.clone());
        st.owner = identity.to_string();
    }

    fn set_name(&self, name: &str) {
        let mut st = self.state.lock();
        let mut index = self.index.lock();
        if let Some(names) = index.get_mut(&st.owner) {
            names.remove(&st.name);
        }
        index
            .entry(st.owner.clone())
            .or_default()
            .insert(name.to_string());
        st.name = name.to_string();
    }

    fn get_new_name(&self, identity: &str, base: &str) -> String {
        let index = self.index.lock();
        let taken = index.get(identity);
        let free = |name: &str| taken.is_none_or(|names| !names.contains(name));
        if free(base) {
            return base.to_string();
        }
        let mut n = 2;
        loop {
            let candidate = format!("{base}({n})");
            if free(&candidate) {
                return candidate;
            }
            n += 1;
        }
    }

    fn create_role(&self, role: &str) {
        self.state.lock().roles.insert(role.to_string());
    }

    fn rename_role(&self, old: &str, new: &str) {
        let mut st = self.state.lock();
        if st.roles.remove(old) {
            st.roles.insert(new.to_string());
        }
    }

    fn delete_role(&self, role: &str) {
        self.state.lock().roles.remove(role);
    }

    fn start_recording_messages(&self, connection_id: &str) -> i64 {
        *self
            .windows
            .lock()
            .entry(connection_id.to_string())
            .or_insert_with(now_ms)
    }

    fn stop_recording_messages(&self, connection_id: &str) -> Option<i64> {
        self.windows.lock().remove(connection_id)
    }

    fn recording(&self) -> bool {
        !self.windows.lock().is_empty()
    }
}

#[derive(Default)]
pub struct MemoryUserStore {
    users: Mutex<HashMap<String, UserRecord>>,
}

impl MemoryUserStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }
}

impl UserStore for MemoryUserStore {
    fn get(&self, username: &str) -> Option<UserRecord> {
        self.users.lock().get(username).cloned()
    }

    fn save(&self, record: &UserRecord) {
        self.users.lock().insert(record.username.clone(), record.clone());
    }
}

#[derive(Default)]
pub struct MemoryMessageLog {
    entries: Mutex<HashMap<String, Vec<RecordedMessage>>>,
}

impl MemoryMessageLog {
    pub fn new() -> Self {
        Self::default()
    }
}

impl MessageLog for MemoryMessageLog {
    fn record(&self, project_id: &str, message: &Envelope, at: i64) {
        self.entries
            .lock()
            .entry(project_id.to_string())
            .or_default()
            .push(RecordedMessage { time: at, message: message.clone() });
    }

    fn get(&self, project_id: &str, start: i64, end: i64) -> Vec<RecordedMessage> {
        self.entries
            .lock()
            .get(project_id)
            .map(|messages| {
                messages
                    .iter()
                    .filter(|m| m.time >= start && m.time < end)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }
}
