// File: src/services/control.rs
//
// Control-plane operations consumed by the external presentation layer
// (dashboard, CLI). Composes the account store, the supervisor and the
// log bus; nothing here ever returns credential material.

use std::sync::Arc;

use chrono::Utc;
use uuid::Uuid;

use afkbot_common::models::account::{Account, AccountSummary, NewAccount};
use afkbot_common::models::credential::Credential;
use afkbot_common::models::log::LogSnapshot;
use afkbot_common::models::platform::Platform;
use afkbot_common::traits::repository_traits::AccountRepository;
use afkbot_common::Error;

use crate::eventbus::{LogBus, LogStream};
use crate::platforms::AdapterSession;
use crate::supervisor::Supervisor;

pub struct ControlService {
    repo: Arc<dyn AccountRepository>,
    supervisor: Arc<Supervisor>,
    bus: Arc<LogBus>,
}

impl ControlService {
    pub fn new(repo: Arc<dyn AccountRepository>, supervisor: Arc<Supervisor>) -> Self {
        let bus = supervisor.bus();
        Self {
            repo,
            supervisor,
            bus,
        }
    }

    /// Validate the credential against the live platform, persist the
    /// record, and start farming. An authentication failure leaves no
    /// trace: no record is persisted and no worker is started.
    pub async fn add_account(
        &self,
        platform: Platform,
        new_account: NewAccount,
    ) -> Result<Uuid, Error> {
        if self
            .repo
            .get_by_label(platform, &new_account.label)
            .await?
            .is_some()
        {
            return Err(Error::Account("account already exists".into()));
        }

        let adapter = self
            .supervisor
            .adapter(platform)
            .ok_or_else(|| Error::Config(format!("no adapter for {platform}")))?;

        let session = adapter.authenticate(&new_account.credential).await?;

        let account = Account {
            account_id: Uuid::new_v4(),
            platform,
            label: new_account.label,
            credential: completed_credential(new_account.credential, &session),
            created_at: Utc::now(),
        };
        self.repo.create(&account).await?;
        self.bus
            .append(platform, format!("Account added: {}", account.label));

        self.supervisor.start(&account)?;
        Ok(account.account_id)
    }

    /// Per-account status for the dashboard. Credentials are stripped
    /// by construction: `AccountSummary` has nowhere to put them.
    pub async fn list_accounts(&self, platform: Platform) -> Result<Vec<AccountSummary>, Error> {
        let mut summaries = Vec::new();
        for account in self.repo.list_for_platform(platform).await? {
            let snapshot = self.supervisor.snapshot(platform, account.account_id);
            summaries.push(AccountSummary {
                account_id: account.account_id,
                label: account.label,
                balance: snapshot.as_ref().map(|s| s.balance).unwrap_or(0.0),
                running: snapshot.map(|s| s.running).unwrap_or(false),
            });
        }
        Ok(summaries)
    }

    pub async fn delete_account(&self, platform: Platform, account_id: Uuid) -> Result<(), Error> {
        let account = self
            .repo
            .get(platform, account_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("account {account_id}")))?;

        self.supervisor.remove(platform, account_id);
        self.repo.delete(platform, account_id).await?;
        self.bus
            .append(platform, format!("Account deleted: {}", account.label));
        Ok(())
    }

    /// Returns the new running state.
    pub async fn toggle(&self, platform: Platform, account_id: Uuid) -> Result<bool, Error> {
        let account = self
            .repo
            .get(platform, account_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("account {account_id}")))?;
        self.supervisor.toggle(&account)
    }

    /// Snapshot fallback for consumers that cannot hold a stream open.
    pub fn get_logs(&self, topic: Platform, after_seq: Option<u64>) -> LogSnapshot {
        self.bus.snapshot(topic, after_seq)
    }

    /// Live subscription; emits keep-alive frames when idle.
    pub fn stream_logs(&self, topic: Platform) -> LogStream {
        self.bus.subscribe(topic)
    }

    /// Bring up a worker for every stored account, e.g. at process
    /// start. Individual failures are logged and skipped.
    pub async fn autostart(&self) -> Result<(), Error> {
        for platform in Platform::ALL {
            if self.supervisor.adapter(platform).is_none() {
                continue;
            }
            self.bus.append(platform, "farm manager started");
            for account in self.repo.list_for_platform(platform).await? {
                if let Err(e) = self.supervisor.start(&account) {
                    self.bus.append(
                        platform,
                        format!("[{}] autostart failed: {e}", account.label),
                    );
                }
            }
        }
        Ok(())
    }
}

/// Merge adapter-discovered fields (token, tenant id) back into an
/// incomplete credential so the stored record is self-sufficient.
fn completed_credential(credential: Credential, session: &AdapterSession) -> Credential {
    match credential {
        Credential::Bearer {
            email,
            password,
            token,
            tenant_id,
        } => Credential::Bearer {
            email,
            password,
            token: if token.is_empty() {
                session.token.clone().unwrap_or_default()
            } else {
                token
            },
            tenant_id: if tenant_id.is_empty() {
                session.tenant_id.clone().unwrap_or_default()
            } else {
                tenant_id
            },
        },
        other => other,
    }
}
