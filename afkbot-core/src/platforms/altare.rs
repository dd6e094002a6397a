// File: src/platforms/altare.rs
//
// Altare: bearer-token API under a tenant id. Reward accrual needs an
// explicit afk start/stop registration plus a 30s heartbeat, and the
// balance is polled (no countdown push). A long-lived server-push feed
// is held open purely for connection stability; its payload is ignored.
// Tokens are re-issued by logging in again every 30 minutes.

use async_trait::async_trait;
use futures_util::StreamExt;
use reqwest::header::{HeaderMap, HeaderValue};
use serde_json::json;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use afkbot_common::models::credential::Credential;
use afkbot_common::models::platform::Platform;
use afkbot_common::Error;

use super::{
    AdapterSession, DetectorMode, DisconnectClass, DisconnectInfo, RewardAdapter, StreamHandle,
};

const BASE_API: &str = "https://api.altare.sh";
const BASE_WEB: &str = "https://altare.sh";
const USER_AGENT: &str =
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36";

const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);
const TOKEN_REFRESH_INTERVAL: Duration = Duration::from_secs(1800);

pub struct AltareAdapter {
    http: reqwest::Client,
}

impl AltareAdapter {
    pub fn new() -> Self {
        Self {
            http: reqwest::Client::new(),
        }
    }

    fn headers(token: &str, tenant_id: Option<&str>) -> Result<HeaderMap, Error> {
        let mut h = HeaderMap::new();
        h.insert(
            reqwest::header::AUTHORIZATION,
            HeaderValue::from_str(token).map_err(|_| Error::Parse("token not header-safe".into()))?,
        );
        h.insert(reqwest::header::ACCEPT, HeaderValue::from_static("application/json"));
        h.insert(reqwest::header::ORIGIN, HeaderValue::from_static(BASE_WEB));
        h.insert(reqwest::header::USER_AGENT, HeaderValue::from_static(USER_AGENT));
        if let Some(tid) = tenant_id {
            h.insert(
                "altare-selected-tenant-id",
                HeaderValue::from_str(tid)
                    .map_err(|_| Error::Parse("tenant id not header-safe".into()))?,
            );
        }
        Ok(h)
    }

    async fn login(&self, email: &str, password: &str) -> Result<String, Error> {
        let resp = self
            .http
            .post(format!("{BASE_API}/api/auth/login"))
            .header(reqwest::header::ORIGIN, BASE_WEB)
            .header(reqwest::header::USER_AGENT, USER_AGENT)
            .json(&json!({ "identifier": email, "password": password }))
            .send()
            .await
            .map_err(|e| Error::Transport(format!("login request failed: {e}")))?;

        if !resp.status().is_success() {
            return Err(Error::Auth(format!("login failed: HTTP {}", resp.status())));
        }
        let body: serde_json::Value = resp.json().await?;
        match body.get("token").and_then(|v| v.as_str()) {
            Some(t) if !t.is_empty() => Ok(format!("Bearer {t}")),
            _ => Err(Error::Auth("login returned no token".into())),
        }
    }

    /// First tenant listed for the account, if any. The tenant id is a
    /// required derived field; workers refuse to run without one.
    async fn discover_tenant(&self, token: &str) -> Result<Option<String>, Error> {
        let resp = self
            .http
            .get(format!("{BASE_API}/api/tenants"))
            .headers(Self::headers(token, None)?)
            .send()
            .await
            .map_err(|e| Error::Transport(format!("tenant lookup failed: {e}")))?;
        if !resp.status().is_success() {
            return Ok(None);
        }
        let body: serde_json::Value = resp.json().await?;
        Ok(body
            .pointer("/items/0/id")
            .and_then(|v| v.as_str())
            .map(String::from))
    }

    fn session_parts<'a>(session: &'a AdapterSession) -> Result<(&'a str, &'a str), Error> {
        let token = session
            .token
            .as_deref()
            .ok_or_else(|| Error::SessionExpired("no bearer token".into()))?;
        let tenant = session
            .tenant_id
            .as_deref()
            .ok_or_else(|| Error::Config("no tenant id".into()))?;
        Ok((token, tenant))
    }

    async fn post_afk(&self, session: &AdapterSession, op: &str) -> Result<reqwest::Response, Error> {
        let (token, tenant) = Self::session_parts(session)?;
        self.http
            .post(format!("{BASE_API}/api/tenants/{tenant}/rewards/afk/{op}"))
            .headers(Self::headers(token, Some(tenant))?)
            .json(&json!({}))
            .send()
            .await
            .map_err(|e| Error::Transport(format!("afk {op} failed: {e}")))
    }
}

impl Default for AltareAdapter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RewardAdapter for AltareAdapter {
    fn platform(&self) -> Platform {
        Platform::Altare
    }

    fn capability(&self) -> DetectorMode {
        DetectorMode::Poll
    }

    fn classify_disconnect(&self, info: &DisconnectInfo) -> DisconnectClass {
        // The hold-open feed has no close codes; an auth rejection shows
        // up as a 401 in the error text, everything else is transient.
        let expired = info
            .reason
            .as_deref()
            .is_some_and(|r| r.contains("401") || r.to_lowercase().contains("unauthorized"));
        if expired {
            DisconnectClass::Expired
        } else {
            DisconnectClass::Transient
        }
    }

    async fn authenticate(&self, credential: &Credential) -> Result<AdapterSession, Error> {
        let Credential::Bearer {
            email,
            password,
            token,
            tenant_id,
        } = credential
        else {
            return Err(Error::InvalidCredentialType(format!(
                "altare expects a bearer credential, got {}",
                credential.kind()
            )));
        };

        // Prefer minting a fresh token: authenticate runs after the
        // previous session was invalidated, where the cached token is
        // the likely culprit. The stored token is only trusted when
        // there is no password to log in with.
        let token = if !password.is_empty() {
            self.login(email, password).await?
        } else if !token.is_empty() {
            token.clone()
        } else {
            return Err(Error::Auth(
                "credential has neither a password nor a token".into(),
            ));
        };

        let tenant = if tenant_id.is_empty() {
            self.discover_tenant(&token)
                .await?
                .ok_or_else(|| Error::Config("no tenant id found for this account".into()))?
        } else {
            tenant_id.clone()
        };

        Ok(AdapterSession {
            token: Some(token),
            tenant_id: Some(tenant),
            cookies: None,
        })
    }

    async fn fetch_balance(&self, session: &AdapterSession) -> Result<Option<f64>, Error> {
        let (token, tenant) = Self::session_parts(session)?;
        let resp = self
            .http
            .get(format!("{BASE_API}/api/tenants"))
            .headers(Self::headers(token, Some(tenant))?)
            .send()
            .await
            .map_err(|e| Error::Transport(format!("balance request failed: {e}")))?;

        if resp.status() == reqwest::StatusCode::UNAUTHORIZED {
            return Err(Error::SessionExpired("tenant list returned 401".into()));
        }
        if !resp.status().is_success() {
            debug!("[Altare] tenant list HTTP {}", resp.status());
            return Ok(None);
        }

        let body: serde_json::Value = resp.json().await?;
        let cents = body
            .get("items")
            .and_then(|v| v.as_array())
            .and_then(|items| {
                items
                    .iter()
                    .find(|i| i.get("id").and_then(|v| v.as_str()) == Some(tenant))
            })
            .and_then(|i| i.get("creditsCents"))
            .and_then(|v| v.as_f64());
        Ok(cents.map(|c| (c / 100.0 * 10_000.0).round() / 10_000.0))
    }

    async fn open_reward_session(&self, session: &AdapterSession) -> Result<(), Error> {
        let resp = self.post_afk(session, "start").await?;
        match resp.status().as_u16() {
            200 | 201 | 204 => Ok(()),
            401 => Err(Error::SessionExpired("afk start returned 401".into())),
            code => Err(Error::Transport(format!("afk start returned HTTP {code}"))),
        }
    }

    async fn close_reward_session(&self, session: &AdapterSession) -> Result<(), Error> {
        let _ = self.post_afk(session, "stop").await?;
        Ok(())
    }

    async fn heartbeat(&self, session: &AdapterSession) -> Result<bool, Error> {
        let resp = self.post_afk(session, "heartbeat").await?;
        Ok(matches!(resp.status().as_u16(), 200 | 201 | 204))
    }

    fn heartbeat_interval(&self) -> Option<Duration> {
        Some(HEARTBEAT_INTERVAL)
    }

    /// The server-push feed carries no reward signal we use; holding it
    /// open keeps the afk registration from being culled server-side.
    async fn open_stream(
        &self,
        session: &AdapterSession,
        stop: CancellationToken,
    ) -> Result<Option<StreamHandle>, Error> {
        let token = session
            .token
            .as_deref()
            .ok_or_else(|| Error::SessionExpired("no bearer token".into()))?;
        let raw = token.trim_start_matches("Bearer ").to_string();

        let resp = self
            .http
            .get(format!("{BASE_API}/subscribe?token={raw}"))
            .header(reqwest::header::ACCEPT, "text/event-stream")
            .header(reqwest::header::CACHE_CONTROL, "no-cache")
            .header(reqwest::header::ORIGIN, BASE_WEB)
            .header(reqwest::header::USER_AGENT, USER_AGENT)
            .send()
            .await
            .map_err(|e| Error::Transport(format!("feed connect failed: {e}")))?;

        if resp.status() == reqwest::StatusCode::UNAUTHORIZED {
            return Err(Error::SessionExpired("feed returned 401".into()));
        }
        if !resp.status().is_success() {
            return Err(Error::Transport(format!(
                "feed returned HTTP {}",
                resp.status()
            )));
        }

        // Keep the channel sender alive so the consumer sees an open but
        // silent stream until the feed actually drops.
        let (tx, rx) = mpsc::channel::<super::StreamEvent>(1);
        let (done_tx, done_rx) = oneshot::channel();
        tokio::spawn(async move {
            let _tx = tx;
            let mut body = resp.bytes_stream();
            let info = loop {
                tokio::select! {
                    _ = stop.cancelled() => break DisconnectInfo::default(),
                    chunk = body.next() => match chunk {
                        Some(Ok(_)) => continue,
                        Some(Err(e)) => break DisconnectInfo {
                            close_code: None,
                            reason: Some(e.to_string()),
                        },
                        None => break DisconnectInfo {
                            close_code: None,
                            reason: Some("feed ended".into()),
                        },
                    },
                }
            };
            let _ = done_tx.send(info);
        });

        Ok(Some(StreamHandle {
            events: rx,
            closed: done_rx,
        }))
    }

    async fn refresh_credential(&self, credential: &Credential) -> Result<Option<Credential>, Error> {
        let Credential::Bearer {
            email,
            password,
            tenant_id,
            ..
        } = credential
        else {
            return Ok(None);
        };
        if password.is_empty() {
            return Ok(None);
        }
        let token = self.login(email, password).await?;
        Ok(Some(Credential::Bearer {
            email: email.clone(),
            password: password.clone(),
            token,
            tenant_id: tenant_id.clone(),
        }))
    }

    fn refresh_interval(&self) -> Option<Duration> {
        Some(TOKEN_REFRESH_INTERVAL)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unauthorized_text_forces_reauth() {
        let adapter = AltareAdapter::new();
        let expired = DisconnectInfo {
            close_code: None,
            reason: Some("feed returned HTTP 401 Unauthorized".into()),
        };
        assert_eq!(adapter.classify_disconnect(&expired), DisconnectClass::Expired);

        let flaky = DisconnectInfo {
            close_code: None,
            reason: Some("connection reset by peer".into()),
        };
        assert_eq!(adapter.classify_disconnect(&flaky), DisconnectClass::Transient);
    }

    #[tokio::test]
    async fn session_without_tenant_is_a_config_error() {
        let adapter = AltareAdapter::new();
        let session = AdapterSession {
            token: Some("Bearer abc".into()),
            tenant_id: None,
            cookies: None,
        };
        match adapter.open_reward_session(&session).await {
            Err(Error::Config(_)) => {}
            other => panic!("expected Config error, got {:?}", other.map(|_| ())),
        }
    }

    #[tokio::test]
    async fn stored_token_is_only_trusted_without_a_password() {
        let adapter = AltareAdapter::new();

        // Token-only credential rides on the stored token, no login.
        let token_only = Credential::Bearer {
            email: "a@b.c".into(),
            password: String::new(),
            token: "Bearer abc".into(),
            tenant_id: "t1".into(),
        };
        let session = adapter.authenticate(&token_only).await.unwrap();
        assert_eq!(session.token.as_deref(), Some("Bearer abc"));
        assert_eq!(session.tenant_id.as_deref(), Some("t1"));

        // Nothing to authenticate with at all.
        let empty = Credential::Bearer {
            email: "a@b.c".into(),
            password: String::new(),
            token: String::new(),
            tenant_id: "t1".into(),
        };
        assert!(matches!(
            adapter.authenticate(&empty).await,
            Err(Error::Auth(_))
        ));
    }

    #[tokio::test]
    async fn refresh_is_skipped_without_a_password() {
        let adapter = AltareAdapter::new();
        let cred = Credential::Bearer {
            email: "a@b.c".into(),
            password: String::new(),
            token: "Bearer abc".into(),
            tenant_id: "t1".into(),
        };
        assert!(adapter.refresh_credential(&cred).await.unwrap().is_none());
    }
}
