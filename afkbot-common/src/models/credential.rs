// File: afkbot-common/src/models/credential.rs

use std::fmt;
use serde::{Deserialize, Serialize};

/// Credential material as stored in the account record. The shape is
/// platform-specific: HyperHub logs in with a password, Overnode rides
/// on a browser cookie, Altare keeps a bearer token plus the login it
/// was minted from so the token can be re-issued.
///
/// Never serialize this into a read-API response; list operations go
/// through `AccountSummary`, which has no credential field at all.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Credential {
    Password {
        email: String,
        password: String,
    },
    Cookie {
        cookie: String,
    },
    Bearer {
        email: String,
        password: String,
        /// "Bearer xxxx" as sent in the Authorization header. May start
        /// out empty; the adapter fills it in on first authenticate.
        token: String,
        /// Platform-derived field. Required before a worker can run.
        tenant_id: String,
    },
}

impl Credential {
    pub fn kind(&self) -> &'static str {
        match self {
            Credential::Password { .. } => "password",
            Credential::Cookie { .. } => "cookie",
            Credential::Bearer { .. } => "bearer",
        }
    }

    /// The platform-unique identity this credential belongs to, where
    /// the credential itself carries one.
    pub fn identity(&self) -> Option<&str> {
        match self {
            Credential::Password { email, .. } => Some(email),
            Credential::Bearer { email, .. } => Some(email),
            Credential::Cookie { .. } => None,
        }
    }
}

// Debug-printing an account must not leak secrets into logs, so the
// Display form carries only the variant name.
impl fmt::Display for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<{} credential>", self.kind())
    }
}
