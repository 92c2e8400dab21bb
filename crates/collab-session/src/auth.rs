//! Login resolution policy.
//!
//! Explicit credentials, when supplied, are always validated; a session
//! cookie is consulted only when no explicit username is supplied.

use std::collections::HashMap;

use collab_protocol::CoreError;
use parking_lot::Mutex;

use crate::project::{UserRecord, UserStore};

/// The credentials presented with a login attempt.
#[derive(Debug, Clone, Default)]
pub struct LoginRequest {
    /// Explicitly submitted username, if any.
    pub username: Option<String>,
    /// Password hash submitted alongside the username.
    pub hash: Option<String>,
    /// Username recovered from a previously saved session cookie.
    pub cookie_username: Option<String>,
}

/// Resolve a login attempt to an authenticated username.
pub fn resolve_login(request: &LoginRequest, users: &dyn UserStore) -> Result<String, CoreError> {
    if let Some(username) = &request.username {
        let record = users
            .get(username)
            .ok_or_else(|| CoreError::not_found(format!("Could not find user \"{username}\"")))?;
        if record.hash != request.hash {
            return Err(CoreError::unauthorized("Incorrect password"));
        }
        return Ok(record.username);
    }

    if let Some(username) = &request.cookie_username {
        let record = users
            .get(username)
            .ok_or_else(|| CoreError::not_found(format!("Could not find user \"{username}\"")))?;
        return Ok(record.username);
    }

    Err(CoreError::unauthorized("No login session"))
}

/// Create a new identity record. Usernames beginning with `_` are reserved
/// for ephemeral connection ids.
pub fn signup(
    username: &str,
    email: &str,
    hash: Option<&str>,
    users: &dyn UserStore,
) -> Result<(), CoreError> {
    if username.is_empty() || email.is_empty() {
        return Err(CoreError::bad_request("Both username and email are required"));
    }
    if username.starts_with('_') {
        return Err(CoreError::bad_request("Invalid username"));
    }
    if users.get(username).is_some() {
        return Err(CoreError::conflict(format!("User \"{username}\" already exists")));
    }
    users.save(&UserRecord {
        username: username.to_string(),
        email: Some(email.to_string()),
        hash: hash.map(str::to_string),
    });
    Ok(())
}

/// Server-side remember tokens. A login that asks to be remembered gets a
/// token the client can present later instead of credentials; the resolved
/// username feeds [`LoginRequest::cookie_username`].
#[derive(Default)]
pub struct LoginTokens {
    tokens: Mutex<HashMap<String, String>>,
}

impl LoginTokens {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn issue(&self, username: &str) -> String {
        let token = uuid::Uuid::new_v4().to_string();
        self.tokens.lock().insert(token.clone(), username.to_string());
        token
    }

    pub fn lookup(&self, token: &str) -> Option<String> {
        self.tokens.lock().get(token).cloned()
    }

    pub fn revoke(&self, token: &str) {
        self.tokens.lock().remove(token);
    }
}
