// File: src/repositories/mod.rs
//
// In-process realization of the account store. Durable stores live
// outside this workspace and implement the same trait; everything here
// only needs read/write-by-id semantics.

use async_trait::async_trait;
use dashmap::DashMap;
use uuid::Uuid;

use afkbot_common::models::account::Account;
use afkbot_common::models::platform::Platform;
use afkbot_common::traits::repository_traits::AccountRepository;
use afkbot_common::Error;

#[derive(Default)]
pub struct MemoryAccountRepository {
    accounts: DashMap<(Platform, Uuid), Account>,
}

impl MemoryAccountRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl AccountRepository for MemoryAccountRepository {
    async fn create(&self, account: &Account) -> Result<(), Error> {
        let key = (account.platform, account.account_id);
        if self.accounts.contains_key(&key) {
            return Err(Error::Account(format!(
                "account {} already exists",
                account.account_id
            )));
        }
        self.accounts.insert(key, account.clone());
        Ok(())
    }

    async fn get(&self, platform: Platform, account_id: Uuid) -> Result<Option<Account>, Error> {
        Ok(self
            .accounts
            .get(&(platform, account_id))
            .map(|a| a.clone()))
    }

    async fn get_by_label(
        &self,
        platform: Platform,
        label: &str,
    ) -> Result<Option<Account>, Error> {
        Ok(self
            .accounts
            .iter()
            .find(|e| e.key().0 == platform && e.value().label == label)
            .map(|e| e.value().clone()))
    }

    async fn update(&self, account: &Account) -> Result<(), Error> {
        let key = (account.platform, account.account_id);
        if !self.accounts.contains_key(&key) {
            return Err(Error::NotFound(format!("account {}", account.account_id)));
        }
        self.accounts.insert(key, account.clone());
        Ok(())
    }

    async fn list_for_platform(&self, platform: Platform) -> Result<Vec<Account>, Error> {
        Ok(self
            .accounts
            .iter()
            .filter(|e| e.key().0 == platform)
            .map(|e| e.value().clone())
            .collect())
    }

    async fn delete(&self, platform: Platform, account_id: Uuid) -> Result<(), Error> {
        match self.accounts.remove(&(platform, account_id)) {
            Some(_) => Ok(()),
            None => Err(Error::NotFound(format!("account {account_id}"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use afkbot_common::models::credential::Credential;
    use chrono::Utc;

    fn account(platform: Platform, label: &str) -> Account {
        Account {
            account_id: Uuid::new_v4(),
            platform,
            label: label.to_string(),
            credential: Credential::Cookie {
                cookie: "sid=abc".into(),
            },
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn create_get_delete_roundtrip() {
        let repo = MemoryAccountRepository::new();
        let acc = account(Platform::Overnode, "user@example.com");

        repo.create(&acc).await.unwrap();
        assert!(repo.create(&acc).await.is_err(), "duplicate id rejected");

        let fetched = repo
            .get(Platform::Overnode, acc.account_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(fetched.label, "user@example.com");

        repo.delete(Platform::Overnode, acc.account_id).await.unwrap();
        assert!(repo
            .get(Platform::Overnode, acc.account_id)
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn label_lookup_is_scoped_to_platform() {
        let repo = MemoryAccountRepository::new();
        repo.create(&account(Platform::HyperHub, "same@label.com"))
            .await
            .unwrap();

        assert!(repo
            .get_by_label(Platform::HyperHub, "same@label.com")
            .await
            .unwrap()
            .is_some());
        assert!(repo
            .get_by_label(Platform::Altare, "same@label.com")
            .await
            .unwrap()
            .is_none());
    }
}
