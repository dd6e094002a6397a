// File: afkbot-common/src/models/account.rs

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::credential::Credential;
use crate::models::platform::Platform;

/// One farmed account as held by the account store. `label` is the
/// platform-unique identity (usually the login email) and is what the
/// dashboard shows; `account_id` is ours.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Account {
    pub account_id: Uuid,
    pub platform: Platform,
    pub label: String,
    pub credential: Credential,
    pub created_at: DateTime<Utc>,
}

/// Payload for `add_account`. The credential may be incomplete (e.g. an
/// Altare bearer with no token yet); the adapter completes it during
/// the add-time authentication pass.
#[derive(Debug, Deserialize, Clone)]
pub struct NewAccount {
    pub label: String,
    pub credential: Credential,
}

/// What `list_accounts` returns. No credential material, ever.
#[derive(Debug, Serialize, Clone, PartialEq)]
pub struct AccountSummary {
    pub account_id: Uuid,
    pub label: String,
    pub balance: f64,
    pub running: bool,
}
