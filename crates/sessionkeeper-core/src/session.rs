//! The session value types.
//!
//! A session is an identifier/secret cookie pair. The identifier is stable;
//! the secret rotates. Neither value is ever parsed.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Characters of the session id shown in logs
const LOG_ID_PREFIX_LEN: usize = 10;

/// An active credential pair, as handed to the rotation client and consumers.
#[derive(Clone, PartialEq, Eq)]
pub struct Session {
    pub session_id: String,
    pub secret_token: String,
}

impl Session {
    pub fn new(session_id: impl Into<String>, secret_token: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            secret_token: secret_token.into(),
        }
    }

    /// Shortened id for log lines; the full value is itself a credential.
    pub fn short_id(&self) -> String {
        short_id(&self.session_id)
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("session_id", &self.short_id())
            .field("secret_token", &"<redacted>")
            .finish()
    }
}

/// A stored row, including inactive sessions.
#[derive(Clone, Serialize)]
pub struct SessionRecord {
    pub session_id: String,
    #[serde(skip_serializing)]
    pub secret_token: String,
    pub active: bool,
    pub updated_at: DateTime<Utc>,
}

impl fmt::Debug for SessionRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionRecord")
            .field("session_id", &short_id(&self.session_id))
            .field("active", &self.active)
            .field("updated_at", &self.updated_at)
            .finish_non_exhaustive()
    }
}

/// Truncate a session id for logging
pub fn short_id(session_id: &str) -> String {
    let prefix: String = session_id.chars().take(LOG_ID_PREFIX_LEN).collect();
    if prefix.len() < session_id.len() {
        format!("{}...", prefix)
    } else {
        prefix
    }
}
