// File: src/platforms/mod.rs

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio_tungstenite::tungstenite::protocol::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use afkbot_common::models::credential::Credential;
use afkbot_common::models::platform::Platform;
use afkbot_common::Error;

pub mod altare;
pub mod hyperhub;
pub mod overnode;

/// How rewards are detected for a platform: `Push` platforms stream
/// countdown samples we edge-detect on; `Poll` platforms only expose a
/// balance we sample on an interval.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DetectorMode {
    Push,
    Poll,
}

/// Disconnect cause after per-platform classification. Drives the
/// cooldown the reconnect machine applies before re-dialing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectClass {
    /// Duplicate session detected remotely; short cooldown, keep creds.
    Conflict,
    /// Remote invalidated our auth; re-authenticate before next dial.
    Expired,
    /// Anything else; retried indefinitely while running.
    Transient,
}

/// Raw disconnect evidence handed to `classify_disconnect`. Platforms
/// encode the cause either as a numeric close code or as matchable
/// error text; some use both.
#[derive(Debug, Clone, Default)]
pub struct DisconnectInfo {
    pub close_code: Option<u16>,
    pub reason: Option<String>,
}

/// One pushed state sample: milliseconds until the next reward plus the
/// advertised accrual rate.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StreamEvent {
    pub countdown_ms: i64,
    pub rate_per_min: f64,
}

/// A live platform stream. Events arrive on `events` until the remote
/// disconnects; the cause is then delivered once on `closed`.
pub struct StreamHandle {
    pub events: mpsc::Receiver<StreamEvent>,
    pub closed: oneshot::Receiver<DisconnectInfo>,
}

/// Authenticated per-connection material. Kept deliberately flat so the
/// supervisor can stay adapter-agnostic; each platform fills only the
/// fields it uses.
#[derive(Debug, Clone, Default)]
pub struct AdapterSession {
    pub cookies: Option<String>,
    pub token: Option<String>,
    pub tenant_id: Option<String>,
}

/// The common capability set every reward platform realizes. All
/// transport variation (websocket vs. server-push feed, close codes vs.
/// string matching) stays behind this trait; the supervisor, reconnect
/// machine and detectors never see platform specifics.
///
/// Adapters convert every failure to one `Error` kind before returning;
/// raw transport errors never cross this boundary. Retry policy is the
/// caller's job, never the adapter's.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait RewardAdapter: Send + Sync {
    fn platform(&self) -> Platform;

    fn capability(&self) -> DetectorMode;

    /// Map a disconnect to its reconnect class. Pure per-platform
    /// function over close codes / error text.
    fn classify_disconnect(&self, info: &DisconnectInfo) -> DisconnectClass;

    async fn authenticate(&self, credential: &Credential) -> Result<AdapterSession, Error>;

    async fn fetch_balance(&self, session: &AdapterSession) -> Result<Option<f64>, Error>;

    /// Register remotely that reward accrual is active. Platforms
    /// without an explicit registration accept the default no-op.
    async fn open_reward_session(&self, _session: &AdapterSession) -> Result<(), Error> {
        Ok(())
    }

    /// Best-effort at shutdown; callers ignore failures.
    async fn close_reward_session(&self, _session: &AdapterSession) -> Result<(), Error> {
        Ok(())
    }

    async fn heartbeat(&self, _session: &AdapterSession) -> Result<bool, Error> {
        Ok(true)
    }

    /// `None` = no application-level heartbeat; transport pings cover it.
    fn heartbeat_interval(&self) -> Option<Duration> {
        None
    }

    /// Open the platform's push stream. `Ok(None)` for platforms with
    /// no stream at all. The returned task ends when `stop` fires or
    /// the remote drops the connection.
    async fn open_stream(
        &self,
        session: &AdapterSession,
        stop: CancellationToken,
    ) -> Result<Option<StreamHandle>, Error>;

    /// Re-issue credential material where the platform supports it.
    /// `Ok(None)` = unsupported or nothing to refresh.
    async fn refresh_credential(&self, _credential: &Credential) -> Result<Option<Credential>, Error> {
        Ok(None)
    }

    /// `None` = no background refresh loop for this platform.
    fn refresh_interval(&self) -> Option<Duration> {
        None
    }
}

/// Transport-level ping cadence on websocket streams.
const WS_PING_INTERVAL: Duration = Duration::from_secs(30);

/// Shared read loop for the websocket platforms. Forwards `afk_state`
/// frames as `StreamEvent`s and returns the disconnect evidence when
/// the socket ends. On cancellation the socket is closed best-effort.
pub(crate) async fn drive_afk_socket(
    mut ws: WebSocketStream<MaybeTlsStream<TcpStream>>,
    tag: &str,
    tx: mpsc::Sender<StreamEvent>,
    stop: CancellationToken,
) -> DisconnectInfo {
    let mut ping = tokio::time::interval(WS_PING_INTERVAL);
    ping.tick().await; // first tick completes immediately

    loop {
        tokio::select! {
            _ = stop.cancelled() => {
                let _ = ws.close(None).await;
                return DisconnectInfo::default();
            }
            _ = ping.tick() => {
                if ws.send(Message::Ping(Vec::new().into())).await.is_err() {
                    return DisconnectInfo {
                        close_code: None,
                        reason: Some("ping send failed".into()),
                    };
                }
            }
            msg = ws.next() => {
                match msg {
                    Some(Ok(Message::Text(txt))) => {
                        let Ok(parsed) = serde_json::from_str::<serde_json::Value>(&txt) else {
                            debug!("[{tag}] unparseable frame: {txt}");
                            continue;
                        };
                        if parsed.get("type").and_then(|v| v.as_str()) != Some("afk_state") {
                            trace!("[{tag}] ignoring frame type");
                            continue;
                        }
                        let event = StreamEvent {
                            countdown_ms: parsed
                                .get("nextRewardIn")
                                .and_then(|v| v.as_i64())
                                .unwrap_or(0),
                            rate_per_min: parsed
                                .get("coinsPerMinute")
                                .and_then(|v| v.as_f64())
                                .unwrap_or(0.0),
                        };
                        if tx.send(event).await.is_err() {
                            // Consumer went away; treat like a local stop.
                            let _ = ws.close(None).await;
                            return DisconnectInfo::default();
                        }
                    }
                    Some(Ok(Message::Close(frame))) => {
                        return DisconnectInfo {
                            close_code: frame.as_ref().map(|f| u16::from(f.code)),
                            reason: frame.map(|f| f.reason.to_string()),
                        };
                    }
                    Some(Ok(_)) => continue, // ping/pong/binary
                    Some(Err(e)) => {
                        return DisconnectInfo {
                            close_code: None,
                            reason: Some(e.to_string()),
                        };
                    }
                    None => return DisconnectInfo::default(),
                }
            }
        }
    }
}
