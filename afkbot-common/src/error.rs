// ================================================================
// File: afkbot-common/src/error.rs
// ================================================================

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Not found error: {0}")]
    NotFound(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Raw transport failure (connect / read / send). Retried with
    /// bounded backoff by the reconnect machinery.
    #[error("Transport error: {0}")]
    Transport(String),

    /// Bad credentials. Never auto-retried; the worker parks in a
    /// long cooldown instead.
    #[error("Authentication error: {0}")]
    Auth(String),

    /// The remote detected a duplicate session for the same account.
    #[error("Session conflict: {0}")]
    Conflict(String),

    /// The remote invalidated our auth material; a fresh login is
    /// required before the next connect.
    #[error("Session expired: {0}")]
    SessionExpired(String),

    /// Farming is accepted remotely but the balance stopped moving.
    /// Not fatal: triggers a remote reward-session restart.
    #[error("Farming stuck: {0}")]
    Stuck(String),

    /// A required derived field is missing (e.g. no tenant id).
    /// Fatal for that account's worker.
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid credential type: {0}")]
    InvalidCredentialType(String),

    #[error("Account error: {0}")]
    Account(String),

    #[error("Parse error: {0}")]
    Parse(String),
}

impl From<String> for Error {
    fn from(s: String) -> Self {
        Error::Parse(s)
    }
}

impl From<&str> for Error {
    fn from(s: &str) -> Self {
        Error::Parse(s.to_string())
    }
}

impl Error {
    /// True when the failure means our cached session material is no
    /// longer usable and we must re-authenticate.
    pub fn requires_reauth(&self) -> bool {
        matches!(self, Error::SessionExpired(_) | Error::Auth(_))
    }
}
