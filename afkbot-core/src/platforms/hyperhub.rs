// File: src/platforms/hyperhub.rs
//
// HyperHub: password login over HTTPS, then a persistent websocket that
// pushes `afk_state` frames. Rewards are detected on the countdown
// rising edge. Disconnect causes arrive as close codes (4001 expired,
// 4002 duplicate session) or as "already connected" error text.

use async_trait::async_trait;
use reqwest::header::{HeaderValue, SET_COOKIE};
use serde_json::json;
use tokio::sync::{mpsc, oneshot};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use afkbot_common::models::credential::Credential;
use afkbot_common::models::platform::Platform;
use afkbot_common::Error;

use super::{
    drive_afk_socket, AdapterSession, DetectorMode, DisconnectClass, DisconnectInfo,
    RewardAdapter, StreamHandle,
};

const BASE_URL: &str = "https://hyper-hub.nl";
const WS_URL: &str = "wss://hyper-hub.nl/ws";
const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) \
     AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

const CLOSE_EXPIRED: u16 = 4001;
const CLOSE_CONFLICT: u16 = 4002;

pub struct HyperHubAdapter {
    http: reqwest::Client,
}

impl HyperHubAdapter {
    pub fn new() -> Self {
        Self {
            http: reqwest::Client::new(),
        }
    }
}

impl Default for HyperHubAdapter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RewardAdapter for HyperHubAdapter {
    fn platform(&self) -> Platform {
        Platform::HyperHub
    }

    fn capability(&self) -> DetectorMode {
        DetectorMode::Push
    }

    fn classify_disconnect(&self, info: &DisconnectInfo) -> DisconnectClass {
        match info.close_code {
            Some(CLOSE_CONFLICT) => DisconnectClass::Conflict,
            Some(CLOSE_EXPIRED) => DisconnectClass::Expired,
            _ => {
                let already_connected = info
                    .reason
                    .as_deref()
                    .is_some_and(|r| r.to_lowercase().contains("already connected"));
                if already_connected {
                    DisconnectClass::Conflict
                } else {
                    DisconnectClass::Transient
                }
            }
        }
    }

    async fn authenticate(&self, credential: &Credential) -> Result<AdapterSession, Error> {
        let Credential::Password { email, password } = credential else {
            return Err(Error::InvalidCredentialType(format!(
                "hyperhub expects a password credential, got {}",
                credential.kind()
            )));
        };

        let resp = self
            .http
            .post(format!("{BASE_URL}/auth/login"))
            .header(reqwest::header::USER_AGENT, USER_AGENT)
            .json(&json!({ "email": email, "password": password }))
            .send()
            .await
            .map_err(|e| Error::Transport(format!("login request failed: {e}")))?;

        if !resp.status().is_success() {
            return Err(Error::Auth(format!("login failed: HTTP {}", resp.status())));
        }

        // Session auth rides on cookies from the login response.
        let cookies = resp
            .headers()
            .get_all(SET_COOKIE)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .filter_map(|s| s.split(';').next())
            .collect::<Vec<_>>()
            .join("; ");
        if cookies.is_empty() {
            return Err(Error::Auth("login returned no session cookie".into()));
        }

        Ok(AdapterSession {
            cookies: Some(cookies),
            ..Default::default()
        })
    }

    async fn fetch_balance(&self, session: &AdapterSession) -> Result<Option<f64>, Error> {
        let cookies = session
            .cookies
            .as_deref()
            .ok_or_else(|| Error::SessionExpired("no session cookie".into()))?;

        let resp = self
            .http
            .get(format!("{BASE_URL}/wallet/balance"))
            .header(reqwest::header::USER_AGENT, USER_AGENT)
            .header(reqwest::header::COOKIE, cookies)
            .send()
            .await
            .map_err(|e| Error::Transport(format!("balance request failed: {e}")))?;

        if resp.status() == reqwest::StatusCode::UNAUTHORIZED {
            return Err(Error::SessionExpired("balance returned 401".into()));
        }
        if !resp.status().is_success() {
            debug!("[HyperHub] balance HTTP {}", resp.status());
            return Ok(None);
        }

        let body: serde_json::Value = resp.json().await?;
        Ok(body.get("XPL").and_then(|v| v.as_f64()))
    }

    async fn open_stream(
        &self,
        session: &AdapterSession,
        stop: CancellationToken,
    ) -> Result<Option<StreamHandle>, Error> {
        let cookies = session
            .cookies
            .clone()
            .ok_or_else(|| Error::SessionExpired("no session cookie".into()))?;

        let mut request = WS_URL
            .into_client_request()
            .map_err(|e| Error::Transport(format!("bad ws url: {e}")))?;
        let headers = request.headers_mut();
        headers.insert(
            "Cookie",
            HeaderValue::from_str(&cookies)
                .map_err(|_| Error::Parse("cookie not header-safe".into()))?,
        );
        headers.insert("Origin", HeaderValue::from_static(BASE_URL));
        headers.insert("User-Agent", HeaderValue::from_static(USER_AGENT));

        let (ws, _) = connect_async(request)
            .await
            .map_err(|e| Error::Transport(format!("ws connect failed: {e}")))?;

        let (tx, rx) = mpsc::channel(64);
        let (done_tx, done_rx) = oneshot::channel();
        tokio::spawn(async move {
            let info = drive_afk_socket(ws, "HyperHub", tx, stop).await;
            let _ = done_tx.send(info);
        });

        Ok(Some(StreamHandle {
            events: rx,
            closed: done_rx,
        }))
    }
}
