use thiserror::Error;

/// Failures talking to the backing session store.
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Failed to open session store: {0}")]
    Connect(#[source] sqlx::Error),

    #[error("Session store query failed: {0}")]
    Query(#[from] sqlx::Error),

    #[error("Session store misconfigured: {0}")]
    Config(String),

    #[error("Session store holds an unreadable row: {0}")]
    Corrupt(String),
}

/// Reasons a rotation attempt failed without the session being rejected.
///
/// Every variant leaves the session active and eligible for the next cycle.
#[derive(Error, Debug)]
pub enum RefreshError {
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Rotation request timed out")]
    Timeout,

    #[error("Unexpected status {status}: {body}")]
    Status {
        status: reqwest::StatusCode,
        body: String,
    },

    #[error("Rotation succeeded but no new secret was issued")]
    MissingSecret,

    #[error("Credential material cannot be sent: {0}")]
    InvalidCredential(String),

    #[error("Failed to persist rotated secret: {0}")]
    Storage(#[from] StorageError),
}

/// Maximum length for error response bodies in error messages
const MAX_ERROR_BODY_LENGTH: usize = 500;

impl RefreshError {
    /// Truncate a response body to avoid logging excessive data
    fn truncate_body(body: &str) -> String {
        if body.len() <= MAX_ERROR_BODY_LENGTH {
            return body.to_string();
        }
        let mut end = MAX_ERROR_BODY_LENGTH;
        while !body.is_char_boundary(end) {
            end -= 1;
        }
        format!("{}... (truncated, {} total bytes)", &body[..end], body.len())
    }

    pub fn from_status(status: reqwest::StatusCode, body: &str) -> Self {
        RefreshError::Status {
            status,
            body: Self::truncate_body(body),
        }
    }

    /// Map a transport error, keeping timeouts distinguishable in logs.
    pub fn from_transport(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            RefreshError::Timeout
        } else {
            RefreshError::Network(err)
        }
    }
}
