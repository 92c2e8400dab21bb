//! One collaborative editing context: role table, owner, collaborators,
//! linked project, and broadcasting.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use collab_protocol::{CoreError, Envelope, RecordedMessage, EVERYONE};
use parking_lot::{Mutex, RwLock};
use tracing::{debug, info};

use crate::connection::{ParticipantConnection, Placement};
use crate::project::{MessageLog, ProjectHandle};
use crate::registry::SessionRegistry;
use crate::now_ms;

struct RoleEntry {
    name: String,
    occupants: Vec<Arc<ParticipantConnection>>,
}

struct RoomState {
    /// Role table in declared/insertion order. Order is display order only.
    roles: Vec<RoleEntry>,
    /// Session members whose role was removed out from under them.
    unplaced: Vec<Arc<ParticipantConnection>>,
    collaborators: BTreeSet<String>,
    defunct: bool,
}

impl RoomState {
    fn recipients(&self) -> Vec<Arc<ParticipantConnection>> {
        self.roles
            .iter()
            .flat_map(|r| r.occupants.iter().cloned())
            .chain(self.unplaced.iter().cloned())
            .collect()
    }

    fn snapshot(&self) -> BTreeMap<String, Vec<String>> {
        self.roles
            .iter()
            .map(|r| {
                let ids = r.occupants.iter().map(|c| c.identity()).collect();
                (r.name.clone(), ids)
            })
            .collect()
    }

    /// Remove `conn` from wherever it sits. Returns
    /// `(removed from a role, removed from anywhere)`.
    fn detach(&mut self, conn: &ParticipantConnection) -> (bool, bool) {
        for entry in &mut self.roles {
            let before = entry.occupants.len();
            entry.occupants.retain(|c| c.id() != conn.id());
            if entry.occupants.len() != before {
                return (true, true);
            }
        }
        let before = self.unplaced.len();
        self.unplaced.retain(|c| c.id() != conn.id());
        (false, self.unplaced.len() != before)
    }
}

/// A collaborative session.
///
/// All role-table mutations are serialized through one mutex; the broadcast
/// snapshot is computed under that mutex and fanned out after it is released,
/// so every occupant observes mutation-plus-snapshot as a single step.
pub struct Session {
    key: String,
    name: RwLock<String>,
    owner: RwLock<String>,
    project: Arc<dyn ProjectHandle>,
    messages: Arc<dyn MessageLog>,
    state: Mutex<RoomState>,
    on_destroy: Mutex<Option<Box<dyn FnOnce() + Send>>>,
}

impl Session {
    pub fn new(
        key: impl Into<String>,
        name: impl Into<String>,
        owner: impl Into<String>,
        project: Arc<dyn ProjectHandle>,
        messages: Arc<dyn MessageLog>,
    ) -> Arc<Self> {
        Arc::new(Self {
            key: key.into(),
            name: RwLock::new(name.into()),
            owner: RwLock::new(owner.into()),
            project,
            messages,
            state: Mutex::new(RoomState {
                roles: Vec::new(),
                unplaced: Vec::new(),
                collaborators: BTreeSet::new(),
                defunct: false,
            }),
            on_destroy: Mutex::new(None),
        })
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn name(&self) -> String {
        self.name.read().clone()
    }

    pub fn owner(&self) -> String {
        self.owner.read().clone()
    }

    pub fn project(&self) -> &Arc<dyn ProjectHandle> {
        &self.project
    }

    pub fn is_defunct(&self) -> bool {
        self.state.lock().defunct
    }

    pub(crate) fn set_destroy_hook(&self, hook: Box<dyn FnOnce() + Send>) {
        *self.on_destroy.lock() = Some(hook);
    }

    // ── Occupancy ─────────────────────────────────────────────────────────

    /// Place `conn` at `role`, evicting it from any role it currently
    /// occupies in this or another session, then broadcast the new topology
    /// to every occupant.
    pub fn add(
        &self,
        registry: &SessionRegistry,
        conn: &Arc<ParticipantConnection>,
        role: &str,
    ) -> Result<(), CoreError> {
        // Eviction from another session is a separate lock domain, so do it
        // before taking this session's lock.
        if let Some(placement) = conn.placement() {
            if placement.session_key != self.key {
                match registry.lookup(&placement.session_key) {
                    Some(old) => old.remove(conn),
                    None => conn.set_placement(None),
                }
            }
        }

        let (snapshot, recipients) = {
            let mut st = self.state.lock();
            if st.defunct {
                return Err(CoreError::not_found(format!("Session {} is closed", self.key)));
            }
            let idx = st
                .roles
                .iter()
                .position(|r| r.name == role)
                .ok_or_else(|| CoreError::not_found(format!("Unknown role: {role}")))?;
            st.detach(conn);
            st.roles[idx].occupants.push(conn.clone());
            conn.set_placement(Some(Placement {
                session_key: self.key.clone(),
                role: Some(role.to_string()),
            }));
            (st.snapshot(), st.recipients())
        };
        debug!(session = %self.key, connection = %conn.id(), %role, "occupant added");
        self.fan_out(&Envelope::RoomRoles { occupants: snapshot }, &recipients);
        Ok(())
    }

    /// Remove `conn` from its current role. No-op if the connection is not
    /// in this session; broadcasts only when the topology changed.
    pub fn remove(&self, conn: &Arc<ParticipantConnection>) {
        let broadcast = {
            let mut st = self.state.lock();
            if st.defunct {
                return;
            }
            let (from_role, removed) = st.detach(conn);
            if removed {
                conn.set_placement(None);
            }
            from_role.then(|| (st.snapshot(), st.recipients()))
        };
        if let Some((snapshot, recipients)) = broadcast {
            debug!(session = %self.key, connection = %conn.id(), "occupant removed");
            self.fan_out(&Envelope::RoomRoles { occupants: snapshot }, &recipients);
        }
    }

    // ── Role table ────────────────────────────────────────────────────────

    pub fn create_role(&self, name: &str) -> Result<(), CoreError> {
        let (snapshot, recipients) = {
            let mut st = self.state.lock();
            if st.defunct {
                return Err(CoreError::not_found(format!("Session {} is closed", self.key)));
            }
            if st.roles.iter().any(|r| r.name == name) {
                return Err(CoreError::conflict(format!("Role already exists: {name}")));
            }
            st.roles.push(RoleEntry { name: name.to_string(), occupants: Vec::new() });
            (st.snapshot(), st.recipients())
        };
        self.project.create_role(name);
        self.fan_out(&Envelope::RoomRoles { occupants: snapshot }, &recipients);
        Ok(())
    }

    /// Remove a role. Its occupants stay session members with no role.
    pub fn remove_role(&self, name: &str) -> Result<(), CoreError> {
        let (snapshot, recipients) = {
            let mut st = self.state.lock();
            let idx = st
                .roles
                .iter()
                .position(|r| r.name == name)
                .ok_or_else(|| CoreError::not_found(format!("Unknown role: {name}")))?;
            let entry = st.roles.remove(idx);
            for occupant in entry.occupants {
                occupant.set_placement(Some(Placement {
                    session_key: self.key.clone(),
                    role: None,
                }));
                st.unplaced.push(occupant);
            }
            (st.snapshot(), st.recipients())
        };
        self.project.delete_role(name);
        self.fan_out(&Envelope::RoomRoles { occupants: snapshot }, &recipients);
        Ok(())
    }

    /// Rename a role, preserving its occupants and its position in the
    /// display order. Project role metadata is kept consistent.
    pub fn rename_role(&self, old: &str, new: &str) -> Result<(), CoreError> {
        let (snapshot, recipients) = {
            let mut st = self.state.lock();
            if st.roles.iter().any(|r| r.name == new) {
                return Err(CoreError::conflict(format!("Role already exists: {new}")));
            }
            let idx = st
                .roles
                .iter()
                .position(|r| r.name == old)
                .ok_or_else(|| CoreError::not_found(format!("Unknown role: {old}")))?;
            st.roles[idx].name = new.to_string();
            for occupant in &st.roles[idx].occupants {
                occupant.set_placement(Some(Placement {
                    session_key: self.key.clone(),
                    role: Some(new.to_string()),
                }));
            }
            (st.snapshot(), st.recipients())
        };
        self.project.rename_role(old, new);
        self.fan_out(&Envelope::RoomRoles { occupants: snapshot }, &recipients);
        Ok(())
    }

    /// First role in declared order with no occupants.
    pub fn unoccupied_role(&self) -> Option<String> {
        let st = self.state.lock();
        st.roles
            .iter()
            .find(|r| r.occupants.is_empty())
            .map(|r| r.name.clone())
    }

    pub fn role_names(&self) -> Vec<String> {
        self.state.lock().roles.iter().map(|r| r.name.clone()).collect()
    }

    pub fn has_role(&self, name: &str) -> bool {
        self.state.lock().roles.iter().any(|r| r.name == name)
    }

    pub fn occupants_at(&self, role: &str) -> Vec<Arc<ParticipantConnection>> {
        let st = self.state.lock();
        st.roles
            .iter()
            .find(|r| r.name == role)
            .map(|r| r.occupants.clone())
            .unwrap_or_default()
    }

    pub fn occupant_count(&self) -> usize {
        let st = self.state.lock();
        st.roles.iter().map(|r| r.occupants.len()).sum::<usize>() + st.unplaced.len()
    }

    // ── Messaging ─────────────────────────────────────────────────────────

    /// Deliver `message` to every occupant. An unset `dstId` is stamped with
    /// the broadcast sentinel; a set one passes through unchanged. No-op on
    /// a defunct session.
    pub fn send_to_everyone(&self, mut message: Envelope) {
        if let Envelope::Message { dst_id, .. } = &mut message {
            if dst_id.is_none() {
                *dst_id = Some(EVERYONE.to_string());
            }
        }
        let recipients = {
            let st = self.state.lock();
            if st.defunct {
                return;
            }
            st.recipients()
        };
        if self.project.recording() {
            self.messages.record(&self.project.id(), &message, now_ms());
        }
        for conn in recipients {
            conn.send(&message);
        }
    }

    /// Broadcast a single closed notice to every occupant, then run the
    /// destroy hook. Idempotent; all later broadcasts are no-ops.
    pub fn close(&self) {
        let recipients = {
            let mut st = self.state.lock();
            if st.defunct {
                return;
            }
            st.defunct = true;
            let mut all: Vec<Arc<ParticipantConnection>> = Vec::new();
            for entry in &mut st.roles {
                all.append(&mut entry.occupants);
            }
            all.append(&mut st.unplaced);
            all
        };
        info!(session = %self.key, occupants = recipients.len(), "session closed");
        for conn in &recipients {
            conn.send(&Envelope::SessionClosed);
            conn.set_placement(None);
        }
        if let Some(hook) = self.on_destroy.lock().take() {
            hook();
        }
    }

    // ── Permissions ───────────────────────────────────────────────────────

    pub fn is_editable_for(&self, identity: &str) -> bool {
        *self.owner.read() == identity || self.state.lock().collaborators.contains(identity)
    }

    pub fn add_collaborator(&self, identity: &str) {
        self.state.lock().collaborators.insert(identity.to_string());
    }

    /// Idempotent: removing an identity that is not a collaborator is a no-op.
    pub fn remove_collaborator(&self, identity: &str) {
        self.state.lock().collaborators.remove(identity);
    }

    pub fn collaborators(&self) -> Vec<String> {
        self.state.lock().collaborators.iter().cloned().collect()
    }

    // ── Project identity ──────────────────────────────────────────────────

    /// Explicit rename of the linked project (and the session display name).
    pub fn rename(&self, name: &str) -> String {
        let _st = self.state.lock();
        self.project.set_name(name);
        *self.name.write() = name.to_string();
        name.to_string()
    }

    /// Transfer project ownership from `ephemeral_id` to `username` if the
    /// project is still anonymously owned: rename through the
    /// collision-avoiding renamer scoped to `username`, then reassign.
    /// Held under the session lock so it cannot race a concurrent rename.
    pub fn adopt_owner(&self, ephemeral_id: &str, username: &str) {
        let _st = self.state.lock();
        if self.project.owner() != ephemeral_id {
            return;
        }
        let fresh = self.project.get_new_name(username, &self.project.name());
        self.project.set_name(&fresh);
        self.project.set_owner(username);
        *self.name.write() = fresh.clone();
        *self.owner.write() = username.to_string();
        info!(session = %self.key, %username, name = %fresh, "project ownership transferred");
    }

    // ── Network traces ────────────────────────────────────────────────────

    /// Open a trace window for `connection_id`. Idempotent: a second start
    /// returns the first window's start time unchanged.
    pub fn start_trace(&self, connection_id: &str) -> i64 {
        self.project.start_recording_messages(connection_id)
    }

    /// Close the window and return the messages recorded in `[start, now)`,
    /// or `None` when no window is open for `connection_id`.
    pub fn stop_trace(&self, connection_id: &str) -> Option<Vec<RecordedMessage>> {
        let start = self.project.stop_recording_messages(connection_id)?;
        Some(self.messages.get(&self.project.id(), start, now_ms()))
    }

    fn fan_out(&self, envelope: &Envelope, recipients: &[Arc<ParticipantConnection>]) {
        for conn in recipients {
            conn.send(envelope);
        }
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("key", &self.key)
            .field("name", &*self.name.read())
            .field("owner", &*self.owner.read())
            .finish()
    }
}
