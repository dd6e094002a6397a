// File: src/platforms/overnode.rs
//
// Overnode: cookie-based auth (the credential is a browser cookie
// pasted in by the user), websocket push of `afk_state` frames, and a
// wallet endpoint for the authoritative balance. Close codes: 4001
// session expired, 4002 duplicate session, 4003 account suspended.

use async_trait::async_trait;
use reqwest::header::HeaderValue;
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

const HOST: &str = "console.overnode.fr";
const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) \
     AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36";

const CLOSE_EXPIRED: u16 = 4001;
const CLOSE_CONFLICT: u16 = 4002;
const CLOSE_SUSPENDED: u16 = 4003;

pub struct OvernodeAdapter {
    http: reqwest::Client,
}

impl OvernodeAdapter {
    pub fn new() -> Self {
        Self {
            http: reqwest::Client::new(),
        }
    }
}

impl Default for OvernodeAdapter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RewardAdapter for OvernodeAdapter {
    fn platform(&self) -> Platform {
        Platform::Overnode
    }

    fn capability(&self) -> DetectorMode {
        DetectorMode::Push
    }

    fn classify_disconnect(&self, info: &DisconnectInfo) -> DisconnectClass {
        match info.close_code {
            Some(CLOSE_CONFLICT) => DisconnectClass::Conflict,
            // A suspended account cannot ride the same cookie back in,
            // so it takes the re-auth path like an expiry.
            Some(CLOSE_EXPIRED) | Some(CLOSE_SUSPENDED) => DisconnectClass::Expired,
            _ => DisconnectClass::Transient,
        }
    }

    /// There is no login endpoint; the cookie is validated by hitting
    /// the wallet with it.
    async fn authenticate(&self, credential: &Credential) -> Result<AdapterSession, Error> {
        let Credential::Cookie { cookie } = credential else {
            return Err(Error::InvalidCredentialType(format!(
                "overnode expects a cookie credential, got {}",
                credential.kind()
            )));
        };

        let session = AdapterSession {
            cookies: Some(cookie.clone()),
            ..Default::default()
        };
        match self.fetch_balance(&session).await {
            Ok(_) => Ok(session),
            Err(Error::SessionExpired(msg)) => Err(Error::Auth(format!("cookie rejected: {msg}"))),
            Err(e) => Err(e),
        }
    }

    async fn fetch_balance(&self, session: &AdapterSession) -> Result<Option<f64>, Error> {
        let cookies = session
            .cookies
            .as_deref()
            .ok_or_else(|| Error::SessionExpired("no cookie".into()))?;

        let resp = self
            .http
            .get(format!("https://{HOST}/api/wallet/balance"))
            .header(reqwest::header::USER_AGENT, USER_AGENT)
            .header(reqwest::header::COOKIE, cookies)
            .header(reqwest::header::ORIGIN, format!("https://{HOST}"))
            .header(reqwest::header::REFERER, format!("https://{HOST}/wallet"))
            .send()
            .await
            .map_err(|e| Error::Transport(format!("balance request failed: {e}")))?;

        match resp.status().as_u16() {
            401 | 403 => Err(Error::SessionExpired(format!(
                "wallet returned HTTP {}",
                resp.status()
            ))),
            code if !(200..300).contains(&code) => {
                debug!("[Overnode] wallet HTTP {code}");
                Ok(None)
            }
            _ => {
                let body: serde_json::Value = resp.json().await?;
                Ok(body.get("balance").and_then(|v| v.as_f64()))
            }
        }
    }

    async fn open_stream(
        &self,
        session: &AdapterSession,
        stop: CancellationToken,
    ) -> Result<Option<StreamHandle>, Error> {
        let cookies = session
            .cookies
            .clone()
            .ok_or_else(|| Error::SessionExpired("no cookie".into()))?;

        let mut request = format!("wss://{HOST}/api/afk/ws")
            .into_client_request()
            .map_err(|e| Error::Transport(format!("bad ws url: {e}")))?;
        let origin = format!("https://{HOST}");
        let headers = request.headers_mut();
        headers.insert(
            "Cookie",
            HeaderValue::from_str(&cookies)
                .map_err(|_| Error::Parse("cookie not header-safe".into()))?,
        );
        headers.insert(
            "Origin",
            HeaderValue::from_str(&origin).map_err(|_| Error::Parse("bad origin header".into()))?,
        );
        headers.insert(
            "Referer",
            HeaderValue::from_str(&format!("{origin}/afk"))
                .map_err(|_| Error::Parse("bad referer header".into()))?,
        );
        headers.insert("User-Agent", HeaderValue::from_static(USER_AGENT));

        let (ws, _) = connect_async(request)
            .await
            .map_err(|e| Error::Transport(format!("ws connect failed: {e}")))?;

        let (tx, rx) = mpsc::channel(64);
        let (done_tx, done_rx) = oneshot::channel();
        tokio::spawn(async move {
            let info = drive_afk_socket(ws, "Overnode", tx, stop).await;
            let _ = done_tx.send(info);
        });

        Ok(Some(StreamHandle {
            events: rx,
            closed: done_rx,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn close_codes_classify_per_protocol() {
        let adapter = OvernodeAdapter::new();
        let class = |code: u16| {
            adapter.classify_disconnect(&DisconnectInfo {
                close_code: Some(code),
                reason: None,
            })
        };

        assert_eq!(class(4002), DisconnectClass::Conflict);
        assert_eq!(class(4001), DisconnectClass::Expired);
        assert_eq!(class(4003), DisconnectClass::Expired);
        assert_eq!(class(1000), DisconnectClass::Transient);
        assert_eq!(
            adapter.classify_disconnect(&DisconnectInfo::default()),
            DisconnectClass::Transient
        );
    }
}
