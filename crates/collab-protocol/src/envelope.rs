//! Message envelope routed between a session and its occupants.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Broadcast sentinel for `dstId` — the message is delivered to every
/// occupant of the session rather than one addressed role.
pub const EVERYONE: &str = "everyone in room";

/// Envelope broadcast or routed between a session and its occupants.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum Envelope {
    /// User-level message addressed to a role/participant or to everyone.
    Message {
        #[serde(rename = "dstId", default, skip_serializing_if = "Option::is_none")]
        dst_id: Option<String>,
        #[serde(rename = "msgType")]
        msg_type: String,
        content: Value,
    },
    /// Topology snapshot: role name → identities of current occupants.
    /// Sent to every occupant after each occupancy-changing operation.
    RoomRoles {
        occupants: BTreeMap<String, Vec<String>>,
    },
    /// Sent exactly once to every occupant immediately before teardown.
    SessionClosed,
}

impl Envelope {
    pub fn message(msg_type: impl Into<String>, content: Value) -> Self {
        Self::Message {
            dst_id: None,
            msg_type: msg_type.into(),
            content,
        }
    }

    pub fn is_broadcast(&self) -> bool {
        matches!(self, Self::Message { dst_id: Some(dst), .. } if dst == EVERYONE)
    }
}

/// A message captured by a network trace, with its capture time (ms since epoch).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordedMessage {
    pub time: i64,
    pub message: Envelope,
}
