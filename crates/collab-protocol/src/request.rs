//! Client request and server reply schemas for the WebSocket transport.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::envelope::RecordedMessage;
use crate::error::CoreError;

/// Request frame sent by a client over its connection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ClientRequest {
    /// Join (creating if needed) the session named `name` owned by the
    /// caller's identity, optionally at a specific role.
    Join {
        name: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        role: Option<String>,
    },
    /// Detach from the current session.
    Leave,
    /// Attach an authenticated identity to the connection. Explicit
    /// credentials when supplied; otherwise a previously issued remember
    /// token stands in for them.
    Login {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        username: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        hash: Option<String>,
        #[serde(default)]
        remember: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        token: Option<String>,
    },
    /// Create a new account and log the connection in as it.
    SignUp {
        username: String,
        email: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        hash: Option<String>,
    },
    /// Rename the current session's project. Owner or collaborator only.
    Rename {
        name: String,
    },
    /// Route a user message through the current session.
    Message {
        #[serde(rename = "dstId", default, skip_serializing_if = "Option::is_none")]
        dst_id: Option<String>,
        #[serde(rename = "msgType")]
        msg_type: String,
        content: Value,
    },
    /// Invoke a service action through the broker. `args` are positional and
    /// mapped onto the action's declared parameter names.
    Invoke {
        id: u64,
        service: String,
        action: String,
        #[serde(default)]
        args: Vec<Value>,
    },
    /// Open a network trace window for this connection.
    TraceStart,
    /// Close the window and return the messages recorded inside it.
    TraceEnd,
}

/// Reply frame sent by the server outside of session broadcasts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ServerReply {
    /// Sent once when the connection is established.
    Welcome {
        #[serde(rename = "clientId")]
        client_id: String,
        #[serde(rename = "serverVersion")]
        server_version: String,
    },
    /// Response to an `Invoke` request. Exactly one of `result`/`error` is set.
    InvokeReply {
        id: u64,
        #[serde(skip_serializing_if = "Option::is_none")]
        result: Option<Value>,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<CoreError>,
    },
    LoggedIn {
        username: String,
        /// Remember token, minted when the login asked for one.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        token: Option<String>,
    },
    Renamed {
        name: String,
    },
    TraceStarted {
        #[serde(rename = "startTime")]
        start_time: i64,
    },
    TraceMessages {
        messages: Vec<RecordedMessage>,
    },
    /// Failure reply for non-invoke requests.
    Error {
        error: CoreError,
    },
}
