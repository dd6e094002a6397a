// File: afkbot-common/src/traits/repository_traits.rs

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::Error;
use crate::models::account::Account;
use crate::models::platform::Platform;

/// The opaque external account store: one record collection per
/// platform, read/write by id. Durable implementations live outside
/// this workspace; `afkbot-core` ships an in-memory one.
///
/// Implementations must never echo credential material through any
/// side channel (logs, error strings); that is enforced here by
/// convention and in the service layer by construction.
#[async_trait]
pub trait AccountRepository: Send + Sync {
    async fn create(&self, account: &Account) -> Result<(), Error>;
    async fn get(&self, platform: Platform, account_id: Uuid) -> Result<Option<Account>, Error>;
    async fn get_by_label(&self, platform: Platform, label: &str)
        -> Result<Option<Account>, Error>;
    async fn update(&self, account: &Account) -> Result<(), Error>;
    async fn list_for_platform(&self, platform: Platform) -> Result<Vec<Account>, Error>;
    async fn delete(&self, platform: Platform, account_id: Uuid) -> Result<(), Error>;
}
